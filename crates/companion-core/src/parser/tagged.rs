//! Incremental parser for the `EMOTICON:` / `AFFECTION:` / `MESSAGE:` format.
//!
//! Fields are recognized strictly in order: the affection marker is only
//! searched for once the emoticon has been read, and the message body only
//! once the affection has been read. A field value ends at the first newline
//! or at the next marker, whichever comes first. Markers are matched
//! case-insensitively and may be split across chunk boundaries.

use super::{ParseEvent, ParsedResponse, ResponseParseError};

const EMOTICON: &str = "EMOTICON:";
const AFFECTION: &str = "AFFECTION:";
const MESSAGE: &str = "MESSAGE:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    Emoticon,
    Affection,
    AwaitMessage,
    Message,
}

/// Streaming parser for the tagged response format.
#[derive(Debug, Default)]
pub struct TaggedResponseParser {
    stage: Stage,
    /// Text received but not yet attributed to a field.
    buffer: String,
    emoticon: Option<String>,
    affection: Option<Result<i32, String>>,
    message: String,
    message_started: bool,
}

impl TaggedResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns the fields completed by this fragment, in
    /// order; a single fragment may complete several.
    pub fn on_chunk(&mut self, chunk: &str) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        if self.stage == Stage::Message {
            self.push_message(chunk, &mut events);
        } else {
            self.buffer.push_str(chunk);
            self.advance(false, &mut events);
        }
        events
    }

    /// Whether any tagged marker has been seen.
    pub fn saw_any_marker(&self) -> bool {
        if self.stage != Stage::Emoticon {
            return true;
        }
        let upper = self.buffer.to_ascii_uppercase();
        [EMOTICON, AFFECTION, MESSAGE]
            .iter()
            .any(|marker| upper.contains(marker))
    }

    /// Whether the emoticon field has been read, committing the output to
    /// the tagged format.
    pub fn read_emoticon(&self) -> bool {
        self.stage != Stage::Emoticon
    }

    /// Complete the parse. Values still waiting for a terminator are taken
    /// up to the end of input.
    pub fn finalize(mut self) -> Result<ParsedResponse, ResponseParseError> {
        let mut discard = Vec::new();
        self.advance(true, &mut discard);

        let mut missing = Vec::new();
        let emoticon = self.emoticon.filter(|e| !e.is_empty());
        if emoticon.is_none() {
            missing.push("emoticon");
        }
        if self.affection.is_none() {
            missing.push("affection");
        }
        let message = self.message.trim().to_string();
        if message.is_empty() {
            missing.push("message");
        }

        match (emoticon, self.affection) {
            (Some(emoticon), Some(Ok(affection_delta))) if missing.is_empty() => {
                Ok(ParsedResponse {
                    emoticon,
                    affection_delta,
                    message,
                })
            }
            (_, Some(Err(raw))) if missing.is_empty() => {
                Err(ResponseParseError::InvalidAffection(raw))
            }
            _ => Err(ResponseParseError::Incomplete { missing }),
        }
    }

    fn advance(&mut self, at_end: bool, events: &mut Vec<ParseEvent>) {
        loop {
            match self.stage {
                Stage::Emoticon => {
                    let Some((value, consumed)) =
                        take_field(&self.buffer, EMOTICON, AFFECTION, at_end)
                    else {
                        return;
                    };
                    self.buffer.drain(..consumed);
                    if !value.is_empty() {
                        events.push(ParseEvent::Emoticon(value.clone()));
                    }
                    self.emoticon = Some(value);
                    self.stage = Stage::Affection;
                }
                Stage::Affection => {
                    let Some((value, consumed)) =
                        take_field(&self.buffer, AFFECTION, MESSAGE, at_end)
                    else {
                        return;
                    };
                    self.buffer.drain(..consumed);
                    let parsed = parse_affection(&value);
                    if let Ok(delta) = parsed {
                        events.push(ParseEvent::Affection(delta));
                    }
                    self.affection = Some(parsed);
                    self.stage = Stage::AwaitMessage;
                }
                Stage::AwaitMessage => {
                    let upper = self.buffer.to_ascii_uppercase();
                    let Some(pos) = upper.find(MESSAGE) else {
                        return;
                    };
                    let rest = self.buffer.split_off(pos + MESSAGE.len());
                    self.buffer.clear();
                    self.stage = Stage::Message;
                    self.push_message(&rest, events);
                }
                Stage::Message => return,
            }
        }
    }

    fn push_message(&mut self, text: &str, events: &mut Vec<ParseEvent>) {
        let text = if self.message_started {
            text
        } else {
            text.trim_start()
        };
        if text.is_empty() {
            return;
        }
        self.message_started = true;
        self.message.push_str(text);
        events.push(ParseEvent::MessageChunk(text.to_string()));
    }
}

/// Locate `marker` in `buffer` and read its value.
///
/// Returns the trimmed value and the byte offset where it ends. Returns
/// `None` while the value is still open (no newline or `next_marker` yet),
/// unless `at_end` is set.
fn take_field(
    buffer: &str,
    marker: &str,
    next_marker: &str,
    at_end: bool,
) -> Option<(String, usize)> {
    let upper = buffer.to_ascii_uppercase();
    let after = upper.find(marker)? + marker.len();

    let rest = &buffer[after..];
    let value_start = after + (rest.len() - rest.trim_start().len());
    if value_start == buffer.len() && !at_end {
        return None;
    }

    let tail = &upper[value_start..];
    let terminator = match (tail.find('\n'), tail.find(next_marker)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let end = match terminator {
        Some(offset) => value_start + offset,
        None if at_end => buffer.len(),
        None => return None,
    };

    Some((buffer[value_start..end].trim().to_string(), end))
}

/// Read a leading signed integer, ignoring trailing commentary
/// (`"+5 (she liked that)"` reads as 5).
pub(super) fn parse_affection(raw: &str) -> Result<i32, String> {
    let trimmed = raw.trim();
    let sign_len = usize::from(trimmed.starts_with(['+', '-']));
    let digits = trimmed[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    trimmed[..sign_len + digits]
        .parse::<i32>()
        .map_err(|_| trimmed.to_string())
}

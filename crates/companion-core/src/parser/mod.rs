//! Extraction of structured fields from generator output.
//!
//! The generator is prompted to answer in a tagged format:
//!
//! ```text
//! EMOTICON: happy
//! AFFECTION: 5
//! MESSAGE:
//! Hello there
//! ```
//!
//! [`TaggedResponseParser`] consumes that format incrementally so the UI can
//! switch expression before the message finishes streaming.
//! [`extract_json_response`] handles the alternate whole-payload JSON format.
//! [`ResponseParser`] combines both: it streams through the tagged parser and
//! falls back to JSON extraction when the tagged format never got past its
//! first field.

pub mod json;
pub mod tagged;

pub use json::extract_json_response;
pub use tagged::TaggedResponseParser;

/// The three fields every character reply must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub emoticon: String,
    pub affection_delta: i32,
    pub message: String,
}

/// Incremental parse result surfaced while a stream is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Emoticon(String),
    Affection(i32),
    MessageChunk(String),
}

/// Errors from response parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseParseError {
    #[error("incomplete response: missing {}", missing.join(", "))]
    Incomplete { missing: Vec<&'static str> },

    #[error("invalid affection value '{0}'")]
    InvalidAffection(String),

    #[error("no JSON object found in generator output")]
    NoJsonObject { raw: String },

    #[error("malformed JSON in generator output: {reason}")]
    MalformedJson { raw: String, reason: String },
}

/// Streaming parser that accepts either output format.
///
/// Chunks are forwarded to the tagged parser as they arrive; the raw text is
/// kept so [`ResponseParser::finalize`] can fall back to JSON extraction.
#[derive(Debug, Default)]
pub struct ResponseParser {
    tagged: TaggedResponseParser,
    raw: String,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment, returning any fields recognized because of it.
    pub fn on_chunk(&mut self, chunk: &str) -> Vec<ParseEvent> {
        self.raw.push_str(chunk);
        self.tagged.on_chunk(chunk)
    }

    /// Everything fed so far.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Complete the parse.
    ///
    /// A marker word inside a JSON payload does not rule JSON out: until an
    /// emoticon has been read, a failed tagged parse still tries JSON and
    /// reports the tagged error only if that fails too.
    pub fn finalize(self) -> Result<ParsedResponse, ResponseParseError> {
        if !self.tagged.saw_any_marker() {
            return extract_json_response(&self.raw);
        }
        let committed = self.tagged.read_emoticon();
        match self.tagged.finalize() {
            Err(tagged) if !committed => extract_json_response(&self.raw).map_err(|_| tagged),
            result => result,
        }
    }

    /// Parse a complete payload in one step.
    pub fn parse_complete(raw: &str) -> Result<ParsedResponse, ResponseParseError> {
        let mut parser = Self::new();
        parser.on_chunk(raw);
        parser.finalize()
    }
}

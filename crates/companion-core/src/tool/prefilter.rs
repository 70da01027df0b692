//! Cheap keyword pre-filter deciding whether a turn needs the tool phase.
//!
//! Order matters: system events never use tools, domain keywords always do,
//! then greetings, acknowledgements, small talk and very short inputs are
//! skipped. Anything left over is ambiguous and goes to the tool phase,
//! where the generator may still decline to call a tool.

/// Outcome of the pre-filter with a short reason for the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDecision {
    Skip(&'static str),
    Run(&'static str),
}

impl ToolDecision {
    pub fn needs_tools(self) -> bool {
        matches!(self, ToolDecision::Run(_))
    }
}

const DOMAIN_KEYWORDS: &[&str] = &[
    "weather",
    "forecast",
    "temperature",
    "rain",
    "snow",
    "price",
    "prices",
    "cost",
    "stock",
    "stocks",
    "bitcoin",
    "crypto",
    "exchange rate",
    "schedule",
    "calendar",
    "remind",
    "reminder",
    "meeting",
    "appointment",
    "what time",
    "time is it",
    "date today",
    "what day",
    "today's date",
    "location",
    "where is",
    "directions",
    "near me",
    "file",
    "folder",
    "calculate",
    "calculation",
    "convert",
    "how much",
    "how many",
    "percent",
    "call me",
    "my name is",
    "remember that",
];

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hiya",
    "yo",
    "morning",
    "good morning",
    "good afternoon",
    "good evening",
    "good night",
    "night",
    "bye",
    "goodbye",
    "see you",
    "see ya",
    "later",
];

const ACKNOWLEDGEMENTS: &[&str] = &[
    "ok", "okay", "k", "sure", "thanks", "thank you", "thx", "ty", "yes", "no", "yeah", "yep",
    "nope", "nah", "cool", "nice", "great", "lol", "haha", "hmm", "alright", "got it", "i see",
    "right", "true", "wow",
];

const SMALL_TALK: &[&str] = &[
    "what's up",
    "whats up",
    "how are you",
    "how's it going",
    "hows it going",
    "how was your day",
    "i love you",
    "miss you",
    "i missed you",
    "i'm tired",
    "im tired",
    "i'm bored",
    "im bored",
    "who are you",
    "tell me about yourself",
    "tell me a joke",
];

/// Decide whether `text` should go through the tool phase.
pub fn decide(text: &str, is_system: bool) -> ToolDecision {
    if is_system {
        return ToolDecision::Skip("system event");
    }

    let normalized = normalize(text);
    if normalized.is_empty() {
        return ToolDecision::Skip("empty input");
    }
    // Padded so phrase matching only hits whole words.
    let padded = format!(" {normalized} ");

    if looks_like_arithmetic(text) {
        return ToolDecision::Run("arithmetic");
    }
    if contains_phrase(&padded, DOMAIN_KEYWORDS) {
        return ToolDecision::Run("domain keyword");
    }
    if is_exactly(&normalized, GREETINGS) || starts_with_phrase(&padded, GREETINGS, 3) {
        return ToolDecision::Skip("greeting");
    }
    if is_exactly(&normalized, ACKNOWLEDGEMENTS) {
        return ToolDecision::Skip("acknowledgement");
    }
    if contains_phrase(&padded, SMALL_TALK) {
        return ToolDecision::Skip("small talk");
    }

    let words = normalized.split(' ').count();
    if normalized.chars().count() < 4 || words <= 2 {
        return ToolDecision::Skip("short input");
    }

    ToolDecision::Run("ambiguous")
}

/// Lowercase, keep letters, digits and apostrophes, collapse whitespace.
fn normalize(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() || c == '\'' {
            cleaned.extend(c.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_phrase(padded: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| padded.contains(&format!(" {p} ")))
}

fn is_exactly(normalized: &str, phrases: &[&str]) -> bool {
    phrases.contains(&normalized)
}

/// A greeting followed by at most `max_tail` further words ("hey lumi").
fn starts_with_phrase(padded: &str, phrases: &[&str], max_tail: usize) -> bool {
    phrases.iter().any(|p| {
        padded
            .strip_prefix(&format!(" {p} "))
            .is_some_and(|tail| tail.split_whitespace().count() <= max_tail)
    })
}

fn looks_like_arithmetic(text: &str) -> bool {
    let has_digit = text.chars().any(|c| c.is_ascii_digit());
    let has_operator = text.chars().any(|c| matches!(c, '+' | '*' | '/' | '=' | '^' | '%'));
    has_digit && has_operator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_events_skip() {
        assert_eq!(
            decide("what's the weather like?", true),
            ToolDecision::Skip("system event")
        );
    }

    #[test]
    fn greetings_and_acks_skip() {
        for text in ["hi", "Hello!", "hey Lumi", "good morning :)", "thanks", "OK", "lol"] {
            assert!(!decide(text, false).needs_tools(), "{text}");
        }
    }

    #[test]
    fn small_talk_skips() {
        assert_eq!(decide("what's up with you today", false), ToolDecision::Skip("small talk"));
        assert_eq!(decide("How are you doing?", false), ToolDecision::Skip("small talk"));
    }

    #[test]
    fn domain_keywords_run_even_after_greeting() {
        assert_eq!(
            decide("hi! what's the weather tomorrow?", false),
            ToolDecision::Run("domain keyword")
        );
        assert!(decide("What time is it?", false).needs_tools());
        assert!(decide("please call me Sam from now on", false).needs_tools());
    }

    #[test]
    fn keywords_match_whole_words_only() {
        // "profile" must not match "file".
        assert!(!contains_phrase(" my profile picture ", DOMAIN_KEYWORDS));
    }

    #[test]
    fn normalization_lowercases_non_ascii() {
        assert_eq!(normalize("ÉTÉ Ärger"), "été ärger");
        assert_eq!(decide("HÉLLO! WHAT TIME IS IT?", false), ToolDecision::Run("domain keyword"));
    }

    #[test]
    fn arithmetic_runs() {
        assert_eq!(decide("12*7", false), ToolDecision::Run("arithmetic"));
    }

    #[test]
    fn short_input_skips() {
        assert_eq!(decide("mm", false), ToolDecision::Skip("short input"));
        assert_eq!(decide("sounds good", false), ToolDecision::Skip("short input"));
        assert_eq!(decide("   ", false), ToolDecision::Skip("empty input"));
    }

    #[test]
    fn ambiguous_defaults_to_tools() {
        assert_eq!(
            decide("can you look into the thing we talked about", false),
            ToolDecision::Run("ambiguous")
        );
    }
}

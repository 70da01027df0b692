//! Fallback parser for replies that embed a JSON object.
//!
//! The object is located with a brace-matching scan that understands string
//! literals and escapes and refuses to descend past [`MAX_DEPTH`] levels, so
//! adversarial output costs at most one linear pass. The first balanced
//! object wins; surrounding prose is ignored.

use serde_json::{Map, Value};

use super::tagged::parse_affection;
use super::{ParsedResponse, ResponseParseError};

/// Deepest brace nesting the scanner accepts.
pub const MAX_DEPTH: usize = 32;

const EMOTICON_KEYS: &[&str] = &["emoticon", "emotion", "expression"];
const AFFECTION_KEYS: &[&str] = &["affection", "affection_delta", "affectionDelta"];
const MESSAGE_KEYS: &[&str] = &["message", "content", "text"];

/// Extract the three reply fields from the first JSON object in `raw`.
///
/// Never panics on malformed input: a missing object yields
/// [`ResponseParseError::NoJsonObject`], an unbalanced, too deep, or
/// syntactically invalid one yields [`ResponseParseError::MalformedJson`].
/// Both carry the raw text for diagnostics.
pub fn extract_json_response(raw: &str) -> Result<ParsedResponse, ResponseParseError> {
    let candidate = match find_first_object(raw) {
        Ok(Some(candidate)) => candidate,
        Ok(None) => {
            return Err(ResponseParseError::NoJsonObject {
                raw: raw.to_string(),
            });
        }
        Err(reason) => {
            return Err(ResponseParseError::MalformedJson {
                raw: raw.to_string(),
                reason,
            });
        }
    };

    let object: Map<String, Value> =
        serde_json::from_str(candidate).map_err(|e| ResponseParseError::MalformedJson {
            raw: raw.to_string(),
            reason: e.to_string(),
        })?;

    let emoticon = lookup(&object, EMOTICON_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let affection = lookup(&object, AFFECTION_KEYS).map(read_affection);
    let message = lookup(&object, MESSAGE_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let mut missing = Vec::new();
    if emoticon.is_none() {
        missing.push("emoticon");
    }
    if affection.is_none() {
        missing.push("affection");
    }
    if message.is_none() {
        missing.push("message");
    }

    match (emoticon, affection, message) {
        (Some(emoticon), Some(Ok(affection_delta)), Some(message)) => Ok(ParsedResponse {
            emoticon: emoticon.to_string(),
            affection_delta,
            message: message.to_string(),
        }),
        (_, Some(Err(raw)), _) if missing.is_empty() => {
            Err(ResponseParseError::InvalidAffection(raw))
        }
        _ => Err(ResponseParseError::Incomplete { missing }),
    }
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

fn read_affection(value: &Value) -> Result<i32, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| n.to_string()),
        Value::String(s) => parse_affection(s),
        other => Err(other.to_string()),
    }
}

/// Return the first balanced `{...}` slice, `Ok(None)` when there is no `{`.
fn find_first_object(raw: &str) -> Result<Option<&str>, String> {
    let Some(start) = raw.find('{') else {
        return Ok(None);
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in raw.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(format!("object nesting deeper than {MAX_DEPTH} levels"));
                }
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(&raw[start..=start + offset]));
                }
            }
            _ => {}
        }
    }

    Err("unbalanced braces".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_surrounded_by_prose() {
        let raw = r#"Here you go: {"emoticon": "happy", "affection": 3, "message": "Hi!"} hope it helps"#;
        let parsed = extract_json_response(raw).unwrap();
        assert_eq!(parsed.emoticon, "happy");
        assert_eq!(parsed.affection_delta, 3);
        assert_eq!(parsed.message, "Hi!");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_scanner() {
        let raw = r#"{"emoticon": "smug", "affection": "+1", "message": "use {curly} \"braces\" }"}"#;
        let parsed = extract_json_response(raw).unwrap();
        assert_eq!(parsed.message, r#"use {curly} "braces" }"#);
        assert_eq!(parsed.affection_delta, 1);
    }

    #[test]
    fn first_balanced_object_wins() {
        let raw = r#"{"emotion": "sad", "affectionDelta": -1, "content": "first"} {"message": "second"}"#;
        let parsed = extract_json_response(raw).unwrap();
        assert_eq!(parsed.message, "first");
        assert_eq!(parsed.emoticon, "sad");
    }

    #[test]
    fn no_object_carries_raw_text() {
        let err = extract_json_response("nothing here").unwrap_err();
        assert_eq!(
            err,
            ResponseParseError::NoJsonObject {
                raw: "nothing here".into()
            }
        );
    }

    #[test]
    fn malformed_object_is_error_not_panic() {
        let err = extract_json_response("{emoticon: happy}").unwrap_err();
        assert!(matches!(err, ResponseParseError::MalformedJson { .. }));

        let err = extract_json_response(r#"{"message": "unterminated"#).unwrap_err();
        assert!(matches!(
            err,
            ResponseParseError::MalformedJson { ref reason, .. } if reason == "unbalanced braces"
        ));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let raw = format!("{}{}", "{\"a\":".repeat(40), "1");
        let err = extract_json_response(&raw).unwrap_err();
        assert!(matches!(
            err,
            ResponseParseError::MalformedJson { ref reason, .. } if reason.contains("nesting")
        ));
    }

    #[test]
    fn missing_fields_are_listed() {
        let err = extract_json_response(r#"{"message": "hi"}"#).unwrap_err();
        assert_eq!(
            err,
            ResponseParseError::Incomplete {
                missing: vec!["emoticon", "affection"]
            }
        );
    }

    #[test]
    fn fractional_affection_rounds() {
        let parsed =
            extract_json_response(r#"{"emoticon": "ok", "affection": 2.6, "message": "fine"}"#)
                .unwrap();
        assert_eq!(parsed.affection_delta, 3);
    }
}

//! Safe JSON extraction from raw model output.
//!
//! Model responses routinely arrive wrapped in markdown fences, padded
//! with prose, truncated mid-string, or double-encoded. Extraction runs
//! a prioritized chain of recovery strategies, each a pure function,
//! stopping at the first that yields a parseable value.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

const PREVIEW_LEN: usize = 120;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Empty input is always a parse failure, never an empty object.
    #[error("empty response text")]
    Empty,
    #[error("unparseable response text: {preview:?}")]
    Unparseable { preview: String },
}

/// Parse raw model output into a JSON value, recovering from fences,
/// surrounding prose, truncation and double encoding.
pub fn parse_json_safe(raw: &str) -> Result<Value, ExtractError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }

    let candidate = strip_code_fences(trimmed);

    // Fast path: already valid JSON.
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Ok(value);
    }

    // Recovery (a): slice to the outermost bracketed region, dropping
    // leading/trailing prose.
    let sliced = slice_outer(candidate);
    if let Some(value) = sliced.and_then(|s| serde_json::from_str::<Value>(s).ok()) {
        return Ok(decode_nested_strings(value));
    }

    // Recovery (b): close unterminated strings and brackets.
    if let Some(value) = repair_truncation(sliced.unwrap_or(candidate)) {
        return Ok(decode_nested_strings(value));
    }

    Err(ExtractError::Unparseable {
        preview: candidate.chars().take(PREVIEW_LEN).collect(),
    })
}

/// Lenient form: on failure logs the error and returns `default`.
pub fn parse_json_lenient(raw: &str, default: Value) -> Value {
    match parse_json_safe(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!("json extraction failed, using default: {err}");
            default
        }
    }
}

/// Remove leading/trailing markdown code fences (```json and bare ```).
fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Substring from the first `{`/`[` to the matching last `}`/`]`.
fn slice_outer(text: &str) -> Option<&str> {
    let (start, closer) = text
        .char_indices()
        .find_map(|(i, c)| match c {
            '{' => Some((i, '}')),
            '[' => Some((i, ']')),
            _ => None,
        })?;
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

/// Attempt to repair common truncation: close an unterminated string,
/// drop a dangling separator, then close every open bracket.
fn repair_truncation(text: &str) -> Option<Value> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        // Balanced already; repair has nothing to add.
        return None;
    }

    let mut repaired = text.to_string();
    if in_string {
        if escaped {
            repaired.pop();
        }
        repaired.push('"');
    } else {
        repaired.truncate(repaired.trim_end().len());
        if repaired.ends_with(',') {
            repaired.pop();
        } else if repaired.ends_with(':') {
            repaired.push_str("null");
        }
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }

    serde_json::from_str(&repaired).ok()
}

/// Recovery (c): recursively parse string-typed values that themselves
/// hold JSON (double-encoded payloads from some providers).
fn decode_nested_strings(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                if let Ok(inner) = serde_json::from_str::<Value>(trimmed) {
                    return decode_nested_strings(inner);
                }
            }
            Value::String(s)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(decode_nested_strings).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, decode_nested_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_json_round_trips_unchanged() {
        for value in [
            json!({"a": 1, "b": [1, 2, 3]}),
            json!([{"nested": {"deep": true}}]),
            json!("just a string"),
            json!(42),
            json!(null),
        ] {
            let raw = serde_json::to_string(&value).expect("serialize");
            assert_eq!(parse_json_safe(&raw).expect("parse"), value);
        }
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(parse_json_safe(raw).expect("parse"), json!({"a": 1}));

        let raw = "```\n{\"a\":1}\n```";
        assert_eq!(parse_json_safe(raw).expect("parse"), json!({"a": 1}));
    }

    #[test]
    fn recovers_from_surrounding_prose() {
        let raw = "Sure! Here is your content: {\"a\":1} Hope that helps.";
        assert_eq!(parse_json_safe(raw).expect("parse"), json!({"a": 1}));
    }

    #[test]
    fn recovers_truncated_string_value() {
        let raw = "{\"headline\": \"Big summer sa";
        assert_eq!(
            parse_json_safe(raw).expect("parse"),
            json!({"headline": "Big summer sa"})
        );
    }

    #[test]
    fn recovers_truncated_after_comma_and_colon() {
        let raw = "{\"a\": 1,";
        assert_eq!(parse_json_safe(raw).expect("parse"), json!({"a": 1}));

        let raw = "{\"a\": 1, \"b\":";
        assert_eq!(
            parse_json_safe(raw).expect("parse"),
            json!({"a": 1, "b": null})
        );
    }

    #[test]
    fn recovers_unclosed_nested_brackets() {
        let raw = "{\"items\": [{\"name\": \"one\"}, {\"name\": \"two\"";
        assert_eq!(
            parse_json_safe(raw).expect("parse"),
            json!({"items": [{"name": "one"}, {"name": "two"}]})
        );
    }

    #[test]
    fn decodes_double_encoded_values_on_recovery() {
        let raw = "Here you go: {\"data\": \"{\\\"x\\\": 2}\"}";
        assert_eq!(
            parse_json_safe(raw).expect("parse"),
            json!({"data": {"x": 2}})
        );
    }

    #[test]
    fn direct_parse_preserves_plain_strings() {
        // The fast path returns valid JSON as-is, including strings
        // that merely look like they hold JSON.
        let value = parse_json_safe("\"{\\\"a\\\": 1}\"").expect("parse");
        assert!(value.is_string());
    }

    #[test]
    fn empty_input_is_always_a_failure() {
        assert!(matches!(parse_json_safe(""), Err(ExtractError::Empty)));
        assert!(matches!(parse_json_safe("  \n "), Err(ExtractError::Empty)));
    }

    #[test]
    fn unparseable_error_carries_a_preview() {
        let raw = "no json here at all";
        match parse_json_safe(raw) {
            Err(ExtractError::Unparseable { preview }) => {
                assert!(preview.starts_with("no json"));
            }
            other => panic!("expected unparseable, got {other:?}"),
        }
    }

    #[test]
    fn lenient_returns_default_without_panicking() {
        let value = parse_json_lenient("complete garbage", json!({}));
        assert_eq!(value, json!({}));

        let value = parse_json_lenient("{\"ok\": true}", json!({}));
        assert_eq!(value, json!({"ok": true}));
    }
}

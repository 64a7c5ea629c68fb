//! JSON extraction from LLM responses.
//!
//! Models wrap their JSON in code fences, prepend explanations, or append
//! commentary. The extraction functions here try, in order:
//! 1. Direct JSON (content starts with the expected opening delimiter)
//! 2. JSON inside a fenced code block
//! 3. The first balanced structure anywhere in the content
//!
//! # Example
//!
//! ```
//! use prep_forge::utils::json_extraction::extract_json_array;
//!
//! let response = "Here are the arguments:\n```json\n[{\"argument\": \"Prices rise\"}]\n```";
//! let json = extract_json_array(response).unwrap();
//! assert!(json.starts_with('['));
//! ```

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated ({unclosed} unclosed). Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed: usize,
    },

    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },

    #[error("Extracted JSON did not match the expected shape: {0}")]
    Invalid(String),
}

fn preview(s: &str, max_chars: usize) -> String {
    s.trim().chars().take(max_chars).collect()
}

/// Finds the index of the delimiter closing the structure that `s` starts with.
///
/// Handles nesting, string literals, and escape sequences inside strings.
///
/// # Arguments
///
/// * `s` - A string starting with `open`
/// * `open` - Opening delimiter, `{` or `[`
/// * `close` - Matching closing delimiter
///
/// # Returns
///
/// The byte index of the matching `close`, or None if the structure never closes.
pub fn find_matching(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Counts delimiters left open when scanning `s` from its start.
fn unclosed_count(s: &str, open: char, close: char) -> usize {
    let mut depth = 0isize;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

/// Returns the body of the first fenced code block, if any.
pub fn extract_from_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    Some(caps.get(1)?.as_str().trim().to_string())
}

fn extract_delimited(
    content: &str,
    open: char,
    close: char,
) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    let mut candidates: Vec<String> = Vec::with_capacity(2);
    if let Some(block) = extract_from_code_block(trimmed) {
        candidates.push(block);
    }
    candidates.push(trimmed.to_string());

    let mut truncated: Option<(String, usize)> = None;
    for candidate in &candidates {
        let Some(start) = candidate.find(open) else {
            continue;
        };
        let slice = &candidate[start..];
        match find_matching(slice, open, close) {
            Some(end) => return Ok(slice[..=end].to_string()),
            None => {
                if truncated.is_none() {
                    truncated = Some((slice.to_string(), unclosed_count(slice, open, close)));
                }
            }
        }
    }

    match truncated {
        Some((partial, unclosed)) => Err(JsonExtractionError::Truncated {
            partial_preview: preview(&partial, 100),
            unclosed,
        }),
        None => Err(JsonExtractionError::NotFound {
            content_preview: preview(trimmed, 50),
        }),
    }
}

/// Extracts the first JSON array from an LLM response.
///
/// # Errors
///
/// Returns `JsonExtractionError::NotFound` if no `[` appears, or
/// `JsonExtractionError::Truncated` if the array never closes.
pub fn extract_json_array(content: &str) -> Result<String, JsonExtractionError> {
    extract_delimited(content, '[', ']')
}

/// Extracts the first JSON object from an LLM response.
pub fn extract_json_object(content: &str) -> Result<String, JsonExtractionError> {
    extract_delimited(content, '{', '}')
}

/// Extracts and deserializes a JSON array of `T`.
///
/// A bare object is accepted as a one-element array, since models
/// occasionally drop the brackets when asked for a single entry.
pub fn parse_json_array<T: DeserializeOwned>(content: &str) -> Result<Vec<T>, JsonExtractionError> {
    match extract_json_array(content) {
        Ok(json) => serde_json::from_str(&json).map_err(|e| JsonExtractionError::Invalid(e.to_string())),
        Err(array_err) => match extract_json_object(content) {
            Ok(json) => serde_json::from_str::<T>(&json)
                .map(|item| vec![item])
                .map_err(|e| JsonExtractionError::Invalid(e.to_string())),
            Err(_) => Err(array_err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_direct_array() {
        assert_eq!(extract_json_array("[1, 2, 3]").unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn test_array_in_code_fence() {
        let response = "Sure!\n```json\n[{\"a\": \"]\"}]\n```\nLet me know.";
        assert_eq!(extract_json_array(response).unwrap(), "[{\"a\": \"]\"}]");
    }

    #[test]
    fn test_array_in_prose() {
        let response = "The tasks are [{\"argument\": \"x\"}] as requested.";
        let json = extract_json_array(response).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["argument"], "x");
    }

    #[test]
    fn test_truncated_array() {
        let err = extract_json_array("[{\"argument\": \"x\"},").unwrap_err();
        assert!(matches!(err, JsonExtractionError::Truncated { unclosed: 1, .. }));
    }

    #[test]
    fn test_not_found() {
        let err = extract_json_array("no json here").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
    }

    #[test]
    fn test_object_extraction() {
        let json = extract_json_object("result: {\"query\": \"tariffs {2024}\"} done").unwrap();
        assert_eq!(json, "{\"query\": \"tariffs {2024}\"}");
    }

    #[test]
    fn test_parse_array_accepts_single_object() {
        let values: Vec<Value> = parse_json_array("{\"argument\": \"solo\"}").unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["argument"], "solo");
    }

    #[test]
    fn test_find_matching_handles_escapes() {
        let s = r#"{"a": "quote \" and }"}"#;
        assert_eq!(find_matching(s, '{', '}'), Some(s.len() - 1));
    }
}

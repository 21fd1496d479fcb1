//! Defensive extraction of JSON objects from LLM response text.
//!
//! Models wrap their JSON in prose preambles and fenced code blocks; the
//! loop never trusts the raw response to be clean.

/// Strip a leading/trailing markdown fence if the whole response is one
/// fenced block.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(trimmed)
}

/// Extract the first balanced top-level JSON object.
///
/// Scans to the first `{` (skipping prose preambles and fence markers)
/// and walks brace depth, honoring string literals and escapes.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let text = strip_code_fences(text);
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        return start.map(|s| &text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the first JSON object in the text into `T`, tolerating fences
/// and preambles. Returns `None` on any shape mismatch.
pub fn parse_first_object<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let candidate = extract_json_object(text)?;
    serde_json::from_str(candidate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_extract_from_fenced_block() {
        let text = "Here is the plan:\n```json\n{\"key\": \"value\"}\n```\n";
        assert_eq!(extract_json_object(text), Some("{\"key\": \"value\"}"));
    }

    #[test]
    fn test_extract_skips_prose_preamble() {
        let text = "Sure! The answer is below. {\"a\": 1} trailing";
        assert_eq!(extract_json_object(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_handles_braces_in_strings() {
        let text = r#"{"code": "if x { y }"}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_extract_nested() {
        let text = r#"{"outer": {"inner": [1, 2]}} and then {"second": true}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"outer": {"inner": [1, 2]}}"#)
        );
    }

    #[test]
    fn test_no_object_returns_none() {
        assert_eq!(extract_json_object("just words"), None);
        assert_eq!(extract_json_object(""), None);
        assert!(parse_first_object::<Value>("nothing here").is_none());
    }

    #[test]
    fn test_parse_first_object_typed() {
        #[derive(serde::Deserialize)]
        struct Tiny {
            a: u32,
        }
        let parsed: Tiny = parse_first_object("noise {\"a\": 7} noise").unwrap();
        assert_eq!(parsed.a, 7);
    }
}

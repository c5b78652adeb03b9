//! Resilient extraction of a single JSON value from loosely-formatted model output.
//!
//! Models wrap JSON in code fences, prefix it with prose, or trail it with
//! commentary. [`Recovered::parse`] tolerates all of that and never fails: text
//! with nothing extractable comes back as [`Recovered::Unparsed`] carrying the
//! original input.

use serde_json::Value;

use crate::text::{strip_json_fences, strip_reasoning};

/// Result of running recovery over raw model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovered {
    /// A JSON value was recovered.
    Parsed(Value),
    /// Nothing parseable was found. `raw` is the untouched input.
    Unparsed { raw: String },
}

impl Recovered {
    /// Recover a JSON value from `input`.
    ///
    /// Strategies, in order:
    /// 1. strip reasoning blocks, fences and any text before the first `{` or `[`
    /// 2. parse directly
    /// 3. parse the first balanced `{...}` / `[...]` span
    pub fn parse(input: &str) -> Self {
        let cleaned = cleaned_text(input);
        let candidate = match cleaned.find(['{', '[']) {
            Some(start) => &cleaned[start..],
            None => cleaned.as_str(),
        };

        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Recovered::Parsed(value);
        }

        if let Some(value) = first_balanced_value(candidate) {
            return Recovered::Parsed(value);
        }

        Recovered::Unparsed {
            raw: input.to_string(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Recovered::Parsed(v) => Some(v),
            Recovered::Unparsed { .. } => None,
        }
    }

    /// Non-empty (after trimming) string field of a recovered object.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.value()?
            .get(key)?
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Model output with reasoning blocks and fence markers removed.
/// Stages fall back to this text when the recovered shape is wrong.
pub fn cleaned_text(input: &str) -> String {
    strip_json_fences(&strip_reasoning(input))
}

/// Scan for the first balanced brace/bracket span that parses as JSON.
/// String literals and escapes are honoured, so braces inside strings don't count.
fn first_balanced_value(text: &str) -> Option<Value> {
    for (start, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let Some(end) = balanced_end(&text[start..]) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..start + end]) {
            return Some(value);
        }
    }
    None
}

/// Byte length of the balanced span opening at the start of `text`, if it closes.
fn balanced_end(text: &str) -> Option<usize> {
    let mut expected: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => expected.push('}'),
            '[' => expected.push(']'),
            '}' | ']' => {
                if expected.pop() != Some(ch) {
                    return None;
                }
                if expected.is_empty() {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        let r = Recovered::parse(r#"{"search_query": "solar", "reasoning": "r"}"#);
        assert_eq!(r.field_str("search_query"), Some("solar"));
    }

    #[test]
    fn test_fenced_object() {
        let r = Recovered::parse("```json\n{\"a\": 1}\n```");
        assert_eq!(r, Recovered::Parsed(json!({"a": 1})));
    }

    #[test]
    fn test_prose_before_and_after() {
        let input = "Sure! Here is the plan:\n[{\"title\": \"A\", \"content\": \"B\"}]\nHope this helps.";
        let r = Recovered::parse(input);
        assert_eq!(r, Recovered::Parsed(json!([{"title": "A", "content": "B"}])));
    }

    #[test]
    fn test_bracketed_prose_before_object() {
        let input = "[note] the answer follows {\"search_query\": \"wind power\"} done";
        let r = Recovered::parse(input);
        assert_eq!(r.field_str("search_query"), Some("wind power"));
    }

    #[test]
    fn test_braces_inside_strings() {
        let input = "text {\"a\": \"curly } and [ bracket\", \"b\": \"esc \\\" }\"} tail }";
        let r = Recovered::parse(input);
        assert_eq!(
            r,
            Recovered::Parsed(json!({"a": "curly } and [ bracket", "b": "esc \" }"}))
        );
    }

    #[test]
    fn test_reasoning_block_removed() {
        let input = "<think>maybe {not json}</think>{\"ok\": true}";
        assert_eq!(Recovered::parse(input), Recovered::Parsed(json!({"ok": true})));
    }

    #[test]
    fn test_unparsed_keeps_original_text() {
        let input = "I could not come up with anything useful.";
        assert_eq!(
            Recovered::parse(input),
            Recovered::Unparsed {
                raw: input.to_string()
            }
        );
    }

    #[test]
    fn test_broken_json_is_unparsed() {
        let input = "```json\n{\"a\": 1, \"b\": \n```";
        let r = Recovered::parse(input);
        assert_eq!(r.value(), None);
        assert!(matches!(r, Recovered::Unparsed { raw } if raw == input));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(Recovered::parse("").value(), None);
    }

    #[test]
    fn test_field_str_rejects_blank_and_non_string() {
        let r = Recovered::parse(r#"{"q": "   ", "n": 3}"#);
        assert_eq!(r.field_str("q"), None);
        assert_eq!(r.field_str("n"), None);
        assert_eq!(r.field_str("missing"), None);
    }
}

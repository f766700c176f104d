//! Tolerant helpers for text payloads: JSON embedded in strings and a
//! Markdown classifier.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").expect("fence regex")
});

/// Markdown feature detectors, checked in order.
static MARKDOWN_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("headers", r"(?m)^#{1,6}\s+\S"),
        ("bold", r"\*\*[^*\n]+\*\*|__[^_\n]+__"),
        ("italic", r"(?:^|[^*\w])\*[^*\s][^*\n]*\*(?:[^*\w]|$)|(?:^|\W)_[^_\s][^_\n]*_(?:\W|$)"),
        ("code", r"```|`[^`\n]+`"),
        ("lists", r"(?m)^\s*(?:[-*+]|\d+\.)\s+\S"),
        ("links", r"\[[^\]\n]+\]\([^)\s]+\)"),
        ("blockquote", r"(?m)^\s*>\s?\S"),
        ("tables", r"(?m)^\s*\|.+\|\s*$"),
    ]
    .into_iter()
    .map(|(name, pat)| (name, Regex::new(pat).expect("markdown regex")))
    .collect()
});

/// Remove one surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    match FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Parse JSON carried inside a text field.
///
/// Strips a code fence, then tries the whole text, then the outermost
/// `{...}` or `[...]` span. Falls back to the raw text as a JSON string.
pub fn extract_json_from_text(text: &str) -> Value {
    let body = strip_code_fences(text);
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        return v;
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&body[start..=end]) {
                    return v;
                }
            }
        }
    }
    Value::String(text.to_string())
}

/// Names of the Markdown features found in `text`.
pub fn markdown_features(text: &str) -> Vec<&'static str> {
    MARKDOWN_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(name, _)| *name)
        .collect()
}

/// Best-effort: does `text` look like Markdown?
pub fn is_markdown(text: &str) -> bool {
    MARKDOWN_PATTERNS.iter().any(|(_, re)| re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_json_is_parsed() {
        let v = extract_json_from_text("```json\n{\"generated_html\": \"<h1>Hi</h1>\"}\n```");
        assert_eq!(v, json!({"generated_html": "<h1>Hi</h1>"}));
    }

    #[test]
    fn bare_json_is_parsed() {
        assert_eq!(extract_json_from_text(r#" {"a": 1} "#), json!({"a": 1}));
        assert_eq!(extract_json_from_text("[1,2]"), json!([1, 2]));
    }

    #[test]
    fn json_embedded_in_prose_is_found() {
        let v = extract_json_from_text("Here you go: {\"slide\": 2} hope that helps");
        assert_eq!(v, json!({"slide": 2}));
    }

    #[test]
    fn unparsable_falls_back_to_raw_text() {
        let raw = "```\nnot { json\n```";
        assert_eq!(extract_json_from_text(raw), Value::String(raw.into()));
        assert_eq!(extract_json_from_text("plain"), json!("plain"));
    }

    #[test]
    fn strip_fences_without_fence_is_trim() {
        assert_eq!(strip_code_fences("  x  "), "x");
        assert_eq!(strip_code_fences("```\ny\n```"), "y");
    }

    #[test]
    fn markdown_battery() {
        assert_eq!(markdown_features("# Title"), vec!["headers"]);
        assert!(markdown_features("some **bold** text").contains(&"bold"));
        assert!(markdown_features("an *italic* word").contains(&"italic"));
        assert!(markdown_features("run `cargo`").contains(&"code"));
        assert!(markdown_features("- one\n- two").contains(&"lists"));
        assert!(markdown_features("1. first").contains(&"lists"));
        assert!(markdown_features("see [docs](https://x.y)").contains(&"links"));
        assert!(markdown_features("> quoted").contains(&"blockquote"));
        assert!(markdown_features("| a | b |\n|---|---|").contains(&"tables"));
    }

    #[test]
    fn plain_prose_is_not_markdown() {
        assert!(!is_markdown("Checking whether the topic is appropriate."));
        assert!(!is_markdown("2 * 3 = 6"));
    }
}

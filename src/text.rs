use std::sync::LazyLock;

use regex::Regex;

/// Marker appended to every truncated snippet.
pub const ELLIPSIS: &str = "...";

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think(?:ing)?>.*?</think(?:ing)?>").expect("valid regex"));

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json5?|javascript|js)?").expect("valid regex"));

/// Truncate `content` to at most `max_len` chars plus [`ELLIPSIS`].
///
/// Prefers cutting at the last space inside the window, but only when that space
/// falls within the final 20% of it. Otherwise the cut lands on the hard limit.
pub fn truncate_content(content: &str, max_len: usize) -> String {
    let Some((cut, _)) = content.char_indices().nth(max_len) else {
        return content.to_string();
    };
    let window = &content[..cut];

    match window.rfind(' ') {
        // char position of the space must exceed 0.8 * max_len
        Some(pos) if window[..pos].chars().count() * 5 > max_len * 4 => {
            format!("{}{}", &window[..pos], ELLIPSIS)
        }
        _ => format!("{}{}", window, ELLIPSIS),
    }
}

/// Drop `<think>...</think>` blocks emitted by reasoning models.
pub fn strip_reasoning(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// Remove every ```json / ``` fence marker, keeping the fenced body.
pub fn strip_json_fences(text: &str) -> String {
    JSON_FENCE.replace_all(text, "").trim().to_string()
}

/// Unwrap a markdown document that the model wrapped in a single code fence.
/// Fences inside the document body are left alone.
pub fn unwrap_markdown_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let body = match trimmed.find('\n') {
        Some(i) => &trimmed[i + 1..],
        None => "",
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}

/// Filesystem-safe slug of a query: alphanumerics, space, `-` and `_` survive,
/// spaces become underscores, capped at 30 chars.
pub fn query_slug(query: &str) -> String {
    let kept: String = query
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let slug: String = kept.trim_end().replace(' ', "_").chars().take(30).collect();
    if slug.is_empty() {
        "report".to_string()
    } else {
        slug
    }
}

/// First `max` chars of `text`, for log previews.
pub fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

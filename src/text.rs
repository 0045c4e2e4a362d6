//! Small text helpers shared by the stages.

use regex::Regex;

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Case-insensitive containment of `needle` in `haystack` where the match is
/// not embedded in a longer alphanumeric run.
///
/// `"Jan"` is found in `"in Jan 2024"` but not in `"January"`.
pub fn contains_bounded(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    let pattern = format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}]){}(?:$|[^\p{{L}}\p{{N}}])",
        regex::escape(needle)
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(haystack),
        Err(_) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

/// First `max_chars` characters of `text` (char-boundary safe).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

//! Post-processing: deterministic cleanup and parsing of model answers.
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted models wrap answers in ` ``` ` fences, mix line
//! endings, pad lines with whitespace, or put a JSON object in the middle of
//! a friendly sentence. The rules here fix those quirks without touching
//! content, so prompts can stay focused on *what* to write.
//!
//! Three consumers:
//!
//! - [`clean_report`] normalises the final report text before it is written.
//! - [`parse_list_response`] reads the `- item` lists that compression and
//!   perspective prompts ask for.
//! - [`extract_json`] recovers the extraction object from JSON-mode answers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Apply every cleanup rule to a model-written report.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of blank lines
/// 5. Ensure heading lines have a blank line before them
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 7. Ensure the text ends with exactly one newline
pub fn clean_report(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer fences ───────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?\n(.*)\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    let trimmed = input.trim().replace("\r\n", "\n");
    if let Some(caps) = RE_OUTER_FENCES.captures(&trimmed) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 5: Normalise heading spacing ────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if RE_HEADING.is_match(line) && i > 0 {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 6: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 7: Ensure text ends with a single newline ───────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Dash lists ───────────────────────────────────────────────────────────────

/// Items of a `- item` list; lines not starting with `-` are ignored, as are
/// items shorter than `min_words`.
pub fn parse_list_response(response: &str, min_words: usize) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix('-'))
        .map(str::trim)
        .filter(|item| !item.is_empty() && item.split_whitespace().count() >= min_words)
        .map(str::to_string)
        .collect()
}

// ── Markdown sections ────────────────────────────────────────────────────────

static RE_H2: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^##\s+(.+?)\s*$").unwrap());

/// Split markdown at `## ` headers into `(header, body)` pairs.
///
/// Text before the first header is dropped.
pub fn split_markdown_sections(markdown: &str) -> Vec<(String, String)> {
    let headers: Vec<(usize, usize, String)> = RE_H2
        .captures_iter(markdown)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), whole.end(), caps[1].trim().to_string()))
        })
        .collect();

    headers
        .iter()
        .enumerate()
        .map(|(i, (_, body_start, name))| {
            let body_end = headers
                .get(i + 1)
                .map(|(next_start, _, _)| *next_start)
                .unwrap_or(markdown.len());
            (name.clone(), markdown[*body_start..body_end].trim().to_string())
        })
        .collect()
}

// ── JSON recovery ────────────────────────────────────────────────────────────

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").unwrap());

/// Recover a JSON object from a model answer.
///
/// Tries, in order: the whole answer, the first fenced block, and the span
/// from the first `{` to the last `}`. Only objects are accepted.
pub fn extract_json(text: &str) -> Option<Value> {
    let as_object = |candidate: &str| -> Option<Value> {
        serde_json::from_str::<Value>(candidate.trim())
            .ok()
            .filter(Value::is_object)
    };

    if let Some(v) = as_object(text) {
        return Some(v);
    }
    if let Some(v) = RE_JSON_FENCE
        .captures(text)
        .and_then(|caps| as_object(&caps[1]))
    {
        return Some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(&text[start..=end])
}

// ── Tests ────────────────────────────────────────────────────────────────────

//! Report shape inputs: the `format.md` structure file and the free-text
//! user preferences file.
//!
//! `format.md` is a loose markdown convention, not a schema:
//!
//! ```markdown
//! ## Metadata
//! - title: "Q3 Incident Review"
//! - max_words: 1200
//!
//! ## Structure
//! ### Executive Summary
//! ### Timeline
//! ```
//!
//! Section names come from the `###` headers under `## Structure`, or from
//! every `###` header when no structure block exists, or from a fixed
//! default list when there are none at all.

use crate::error::ReportError;
use crate::prompts::DEFAULT_PREFERENCES;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Sections used when the format file names none.
pub const DEFAULT_SECTIONS: [&str; 5] = [
    "Executive Summary",
    "Timeline",
    "Root Cause Analysis",
    "Impact Assessment",
    "Action Items",
];

/// Title used when the format file names none.
pub const DEFAULT_TITLE: &str = "Report";

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"-\s*title:\s*["']?([^"'\n]+)["']?"#).unwrap());
static RE_MAX_WORDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\s*max_words:\s*(\d+)").unwrap());
static RE_STRUCTURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"##\s+Structure\s*\n").unwrap());
static RE_NEXT_H2: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n##\s+[^#]").unwrap());
static RE_H3: Lazy<Regex> = Lazy::new(|| Regex::new(r"###\s+([^\n]+)").unwrap());

/// Section layout of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatSpec {
    pub title: String,
    pub max_words: usize,
    /// Allowed section names.
    pub sections: Vec<String>,
    /// Render order; defaults to `sections`.
    pub section_order: Vec<String>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self::with_defaults(crate::config::DEFAULT_MAX_WORDS)
    }
}

impl FormatSpec {
    /// The default five-section layout.
    pub fn with_defaults(max_words: usize) -> Self {
        let sections: Vec<String> = DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect();
        Self {
            title: DEFAULT_TITLE.to_string(),
            max_words,
            section_order: sections.clone(),
            sections,
        }
    }

    /// Parse `format.md` content.
    pub fn parse(content: &str, default_max_words: usize) -> Self {
        let mut spec = Self::with_defaults(default_max_words);

        if let Some(caps) = RE_TITLE.captures(content) {
            spec.title = caps[1].trim().to_string();
        }
        if let Some(n) = RE_MAX_WORDS
            .captures(content)
            .and_then(|caps| caps[1].parse::<usize>().ok())
        {
            spec.max_words = n;
        }

        let headers_in = |text: &str| -> Vec<String> {
            RE_H3
                .captures_iter(text)
                .map(|c| c[1].trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let sections = match RE_STRUCTURE.find(content) {
            Some(m) => {
                let body = &content[m.end()..];
                let end = RE_NEXT_H2.find(body).map(|n| n.start()).unwrap_or(body.len());
                headers_in(&body[..end])
            }
            None => headers_in(content),
        };

        if !sections.is_empty() {
            spec.section_order = sections.clone();
            spec.sections = sections;
        }
        spec
    }

    /// Load and parse a format file; `None` or a missing file yields the
    /// default layout.
    pub async fn load(path: Option<&Path>, default_max_words: usize) -> Result<Self, ReportError> {
        let Some(path) = path else {
            return Ok(Self::with_defaults(default_max_words));
        };
        if !path.exists() {
            info!("Format file {} not found, using default sections", path.display());
            return Ok(Self::with_defaults(default_max_words));
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ReportError::FormatSpecUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::parse(&content, default_max_words))
    }
}

/// Strip `#` comment lines and blanks; `None` if nothing remains.
pub fn parse_preferences(content: &str) -> Option<String> {
    let lines: Vec<&str> = content
        .lines()
        .filter(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .collect();
    let joined = lines.join("\n");
    let joined = joined.trim();
    (!joined.is_empty()).then(|| format!("USER PREFERENCES:\n{joined}"))
}

/// Preferences block for the synthesis prompt.
///
/// Falls back to [`DEFAULT_PREFERENCES`] when the file is absent, unreadable
/// or contains only comments.
pub async fn load_preferences(path: Option<&Path>) -> String {
    if let Some(path) = path {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                if let Some(prefs) = parse_preferences(&content) {
                    info!("Using user preferences from {}", path.display());
                    return prefs;
                }
            }
            Err(e) => {
                tracing::warn!("Could not read preferences {}: {e}", path.display());
            }
        }
    }
    info!("Using default report format (detailed executive report)");
    DEFAULT_PREFERENCES.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: &str = "# Report format\n\n## Metadata\n- title: \"Q3 Incident Review\"\n- max_words: 1200\n\n## Structure\n### Summary\n### Timeline\n### Next Steps\n\n## Notes\n### Not a section\n";

    #[test]
    fn parses_metadata_and_structure_block() {
        let spec = FormatSpec::parse(FORMAT, 1500);
        assert_eq!(spec.title, "Q3 Incident Review");
        assert_eq!(spec.max_words, 1200);
        assert_eq!(spec.sections, vec!["Summary", "Timeline", "Next Steps"]);
        assert_eq!(spec.section_order, spec.sections);
    }

    #[test]
    fn falls_back_to_all_h3_headers() {
        let spec = FormatSpec::parse("### Alpha\ntext\n### Beta\n", 900);
        assert_eq!(spec.sections, vec!["Alpha", "Beta"]);
        assert_eq!(spec.max_words, 900);
        assert_eq!(spec.title, DEFAULT_TITLE);
    }

    #[test]
    fn falls_back_to_default_sections() {
        let spec = FormatSpec::parse("just prose", 1500);
        assert_eq!(spec.sections.len(), 5);
        assert_eq!(spec.sections[1], "Timeline");
    }

    #[test]
    fn preferences_strip_comments() {
        let prefs = parse_preferences("# comment\n\nWrite for engineers.\n  # indented comment\nKeep it short.\n");
        assert_eq!(
            prefs.as_deref(),
            Some("USER PREFERENCES:\nWrite for engineers.\nKeep it short.")
        );
        assert!(parse_preferences("# only\n# comments\n").is_none());
    }

    #[tokio::test]
    async fn load_missing_files_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let spec = FormatSpec::load(Some(&dir.path().join("format.md")), 1500)
            .await
            .unwrap();
        assert_eq!(spec, FormatSpec::with_defaults(1500));

        let prefs = load_preferences(Some(&dir.path().join("prefs.txt"))).await;
        assert_eq!(prefs, DEFAULT_PREFERENCES);
    }

    #[tokio::test]
    async fn load_reads_format_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("format.md");
        std::fs::write(&path, FORMAT).unwrap();
        let spec = FormatSpec::load(Some(&path), 1500).await.unwrap();
        assert_eq!(spec.title, "Q3 Incident Review");
    }
}

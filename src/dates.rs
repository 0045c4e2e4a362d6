//! Date normalization: heterogeneous date strings → canonical `YYYY[-MM[-DD]]`.
//!
//! Extracted pages carry dates in whatever form the document used ("3/15/24",
//! "15.03.2024", "Mar 15", "March 2019"). The protected-term machinery needs
//! one canonical form to compare against and a set of renderings to search
//! for, so every date sighting goes through [`DateNormalizer::parse_date`].
//!
//! ## Pattern order
//!
//! Patterns are tried in a fixed order and the **first** that matches
//! anywhere in the string wins:
//!
//! | # | Format | Example | Confidence |
//! |---|--------|---------|-----------:|
//! | 1 | ISO | `2024-03-15` | 1.0 |
//! | 2 | US | `3/15/24` | 1.0 |
//! | 3 | EU | `15.03.2024` | 1.0, 0.8 if ambiguous |
//! | 4 | written with year | `March 15, 2024` | 1.0 |
//! | 5 | written without year | `Mar 15` | 0.7, year inferred |
//! | 6 | day month year | `15 March 2024` | 1.0 |
//! | 7 | year only | `2024` | 0.5 |
//! | 8 | month year | `March 1999` | 0.8 |
//!
//! A string that matches nothing still yields a [`NormalizedDate`] with
//! `normalized == original` and confidence 0.3.

use crate::text::contains_bounded;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Confidence assigned when no pattern matched.
pub const UNPARSED_CONFIDENCE: f64 = 0.3;

/// A parsed calendar date of partial precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDate {
    /// Verbatim source string.
    pub original: String,
    /// `YYYY-MM-DD`, `YYYY-MM` or `YYYY`; equals `original` when unparsed.
    pub normalized: String,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    /// 0.0–1.0, lower for ambiguous or partial parses.
    pub confidence: f64,
    /// The year was filled from context rather than stated.
    pub inferred: bool,
}

impl NormalizedDate {
    fn unparsed(original: &str) -> Self {
        Self {
            original: original.to_string(),
            normalized: original.to_string(),
            year: None,
            month: None,
            day: None,
            confidence: UNPARSED_CONFIDENCE,
            inferred: false,
        }
    }

    /// Year-month prefix used for bucketing (`YYYY-MM`, or shorter).
    pub fn month_key(&self) -> String {
        self.normalized.chars().take(7).collect()
    }

    /// A new date with `year` filled in and confidence scaled by 0.8.
    pub fn with_inferred_year(&self, year: i32) -> Self {
        Self {
            original: self.original.clone(),
            normalized: build_normalized(Some(year), self.month, self.day),
            year: Some(year),
            month: self.month,
            day: self.day,
            confidence: self.confidence * 0.8,
            inferred: true,
        }
    }

    /// Textual renderings used for robust matching elsewhere.
    ///
    /// Always contains `original` and `normalized`; full-precision dates add
    /// `M/D/Y`, `D/M/Y`, `M-D-Y` and the month-name forms.
    pub fn variants(&self) -> BTreeSet<String> {
        let mut variants = BTreeSet::new();
        variants.insert(self.original.clone());
        variants.insert(self.normalized.clone());

        if let (Some(y), Some(m), Some(d)) = (self.year, self.month, self.day) {
            variants.insert(format!("{m}/{d}/{y}"));
            variants.insert(format!("{d}/{m}/{y}"));
            variants.insert(format!("{m}-{d}-{y}"));

            if (1..=12).contains(&m) {
                let name = MONTH_NAMES[(m - 1) as usize];
                let abbrev = &name[..3];
                variants.insert(format!("{name} {d}, {y}"));
                variants.insert(format!("{d} {name} {y}"));
                variants.insert(format!("{abbrev} {d}, {y}"));
            }
        }

        variants.retain(|v| !v.trim().is_empty());
        variants
    }
}

// ── Static tables ────────────────────────────────────────────────────────

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Three-letter prefix lookup.
const MONTH_PREFIXES: [(&str, u32); 12] = [
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const MONTH: &str = r"(Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateFormat {
    Iso,
    Us,
    Eu,
    WrittenFull,
    WrittenNoYear,
    EuWritten,
    YearOnly,
    MonthYear,
}

static DATE_PATTERNS: Lazy<Vec<(Regex, DateFormat)>> = Lazy::new(|| {
    let specs: [(String, DateFormat); 8] = [
        (r"\b(\d{4})-(\d{1,2})-(\d{1,2})".to_string(), DateFormat::Iso),
        (
            r"\b(0?[1-9]|1[0-2])/(\d{1,2})/(\d{2,4})\b".to_string(),
            DateFormat::Us,
        ),
        (
            r"\b(\d{1,2})[./](\d{1,2})[./](\d{2,4})\b".to_string(),
            DateFormat::Eu,
        ),
        (
            format!(r"\b{MONTH}\s+(\d{{1,2}})(?:st|nd|rd|th)?[,\s]+(\d{{4}})\b"),
            DateFormat::WrittenFull,
        ),
        (
            format!(r"\b{MONTH}\s+(\d{{1,2}})(?:st|nd|rd|th)?\b"),
            DateFormat::WrittenNoYear,
        ),
        (
            format!(r"\b(\d{{1,2}})(?:st|nd|rd|th)?\s+{MONTH}[,\s]+(\d{{4}})\b"),
            DateFormat::EuWritten,
        ),
        (r"\b(20\d{2})\b".to_string(), DateFormat::YearOnly),
        (format!(r"\b{MONTH}\s+(\d{{4}})\b"), DateFormat::MonthYear),
    ];

    specs
        .into_iter()
        .filter_map(|(pattern, format)| {
            Regex::new(&format!("(?i){pattern}"))
                .ok()
                .map(|re| (re, format))
        })
        .collect()
});

// ── Normalizer ───────────────────────────────────────────────────────────

/// Parses date strings relative to a default document year.
#[derive(Debug, Clone, Copy)]
pub struct DateNormalizer {
    document_year: i32,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DateNormalizer {
    /// Create a normalizer; `None` uses the current calendar year.
    pub fn new(document_year: Option<i32>) -> Self {
        Self {
            document_year: document_year.unwrap_or_else(|| chrono::Local::now().year()),
        }
    }

    /// Year used when a date carries none and no context is given.
    pub fn document_year(&self) -> i32 {
        self.document_year
    }

    /// Parse the first recognisable date anywhere in `text`.
    ///
    /// Returns `None` only for empty input. Unrecognised text yields a
    /// low-confidence placeholder, never `None`.
    pub fn parse_date(&self, text: &str, context_year: Option<i32>) -> Option<NormalizedDate> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let year_context = context_year.unwrap_or(self.document_year);

        for (re, format) in DATE_PATTERNS.iter() {
            let Some(caps) = re
                .captures_iter(text)
                .find(|caps| !runs_on(text, caps, *format))
            else {
                continue;
            };
            if let Some(date) = parse_match(&caps, *format, text, year_context) {
                return Some(date);
            }
        }

        Some(NormalizedDate::unparsed(text))
    }

    /// Every non-overlapping date in `text`, in reading order, deduplicated
    /// by normalized value.
    pub fn extract_all_dates(&self, text: &str) -> Vec<NormalizedDate> {
        let mut found: Vec<(usize, usize, NormalizedDate)> = Vec::new();

        for (re, format) in DATE_PATTERNS.iter() {
            for caps in re.captures_iter(text) {
                let Some(m) = caps.get(0) else { continue };
                if runs_on(text, &caps, *format) {
                    continue;
                }
                let overlaps = found
                    .iter()
                    .any(|(start, end, _)| m.start() < *end && *start < m.end());
                if overlaps {
                    continue;
                }
                if let Some(date) = parse_match(&caps, *format, m.as_str(), self.document_year) {
                    if !date.normalized.is_empty() {
                        found.push((m.start(), m.end(), date));
                    }
                }
            }
        }

        found.sort_by_key(|(start, _, _)| *start);

        let mut seen = BTreeSet::new();
        found
            .into_iter()
            .filter_map(|(_, _, date)| seen.insert(date.normalized.clone()).then_some(date))
            .collect()
    }

    /// Whether `date_str` (in any of its renderings) appears in `text`
    /// on word/date boundaries, case-insensitively.
    pub fn date_mentioned(&self, text: &str, date_str: &str) -> bool {
        let date_str = date_str.trim();
        if date_str.is_empty() {
            return true;
        }
        let mut candidates = BTreeSet::new();
        candidates.insert(date_str.to_string());
        candidates.insert(date_str.replace('-', "/"));
        if let Some(parsed) = self.parse_date(date_str, None) {
            candidates.extend(parsed.variants());
        }
        candidates.iter().any(|c| contains_bounded(text, c))
    }
}

/// An ISO match has no trailing word boundary so `2024-03-15T10:30` still
/// matches; a following digit means the day was cut from a longer number.
fn runs_on(text: &str, caps: &Captures<'_>, format: DateFormat) -> bool {
    format == DateFormat::Iso
        && caps
            .get(0)
            .and_then(|m| text[m.end()..].chars().next())
            .is_some_and(|c| c.is_ascii_digit())
}

/// Free-function form of [`NormalizedDate::variants`].
pub fn get_date_variants(date: &NormalizedDate) -> BTreeSet<String> {
    date.variants()
}

fn parse_match(
    caps: &Captures<'_>,
    format: DateFormat,
    original: &str,
    year_context: i32,
) -> Option<NormalizedDate> {
    let num = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };
    let text = |i: usize| -> Option<&str> { caps.get(i).map(|m| m.as_str()) };

    // (year, month, day, confidence, inferred)
    let (year, month, day, confidence, inferred) = match format {
        DateFormat::Iso => (Some(num(1)? as i32), num(2), num(3), 1.0, false),
        DateFormat::Us => (Some(normalize_year(num(3)?)), num(1), num(2), 1.0, false),
        DateFormat::Eu => {
            let first = num(1)?;
            let second = num(2)?;
            let year = Some(normalize_year(num(3)?));
            if first > 12 {
                (year, Some(second), Some(first), 1.0, false)
            } else if second > 12 {
                (year, Some(first), Some(second), 1.0, false)
            } else {
                // No locale signal: assume day-first.
                (year, Some(second), Some(first), 0.8, false)
            }
        }
        DateFormat::WrittenFull => (
            Some(num(3)? as i32),
            Some(month_to_int(text(1)?)),
            num(2),
            1.0,
            false,
        ),
        DateFormat::WrittenNoYear => (
            Some(year_context),
            Some(month_to_int(text(1)?)),
            num(2),
            0.7,
            true,
        ),
        DateFormat::EuWritten => (
            Some(num(3)? as i32),
            Some(month_to_int(text(2)?)),
            num(1),
            1.0,
            false,
        ),
        DateFormat::YearOnly => (Some(num(1)? as i32), None, None, 0.5, false),
        DateFormat::MonthYear => (
            Some(num(2)? as i32),
            Some(month_to_int(text(1)?)),
            None,
            0.8,
            false,
        ),
    };

    Some(NormalizedDate {
        original: original.to_string(),
        normalized: build_normalized(year, month, day),
        year,
        month,
        day,
        confidence,
        inferred,
    })
}

/// Two-digit years pivot at 50: `<=50` → 2000s, else 1900s.
fn normalize_year(year: u32) -> i32 {
    let year = year as i32;
    if year < 100 {
        if year <= 50 {
            year + 2000
        } else {
            year + 1900
        }
    } else {
        year
    }
}

fn month_to_int(name: &str) -> u32 {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    MONTH_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, m)| *m)
        .unwrap_or(1)
}

fn build_normalized(year: Option<i32>, month: Option<u32>, day: Option<u32>) -> String {
    match (year, month, day) {
        (Some(y), Some(m), Some(d)) => format!("{y:04}-{m:02}-{d:02}"),
        (Some(y), Some(m), None) => format!("{y:04}-{m:02}"),
        (Some(y), _, _) => format!("{y:04}"),
        _ => String::new(),
    }
}

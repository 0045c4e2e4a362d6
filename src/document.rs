//! The living report: section-ordered content items plus protected terms.
//!
//! [`LiveDocument`] is built page by page on the legacy path. Writes are
//! lenient: a section name that is not in the [`FormatSpec`] is dropped
//! silently, since section names may come straight from a model answer, and
//! an out-of-range update index is a no-op.
//!
//! Three protected-term sets only ever grow. Compression consults them to
//! decide what must survive a rewrite.

use crate::extraction::PageExtraction;
use crate::format::FormatSpec;
use crate::text::{truncate_chars, word_count};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Items previewed per section in the compact state.
const COMPACT_PREVIEW_ITEMS: usize = 5;
/// Characters per item preview in the compact state.
const COMPACT_PREVIEW_CHARS: usize = 80;

/// Fallback section used when a name cannot be resolved.
pub const TIMELINE_SECTION: &str = "Timeline";

// ── Sections ─────────────────────────────────────────────────────────────

/// Insertion-ordered map of section name → content items.
///
/// Serialized as a JSON object whose key order is the section order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections(Vec<(String, Vec<String>)>);

impl Sections {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sections = Sections::default();
        for name in names {
            let name = name.into();
            if !sections.contains(&name) {
                sections.0.push((name, Vec::new()));
            }
        }
        sections
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&Vec<String>> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, items)| items)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        self.0
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, items)| items)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Vec<String>)> {
        self.0.iter().map(|(n, items)| (n.as_str(), items))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<String>)> {
        self.0.iter_mut().map(|(n, items)| (n.as_str(), items))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Sections {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, items) in &self.0 {
            map.serialize_entry(name, items)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Sections {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SectionsVisitor;

        impl<'de> Visitor<'de> for SectionsVisitor {
            type Value = Sections;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of section name to list of items")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Sections, A::Error> {
                let mut entries = Vec::new();
                while let Some((name, items)) = access.next_entry::<String, Vec<String>>()? {
                    entries.push((name, items));
                }
                Ok(Sections(entries))
            }
        }

        deserializer.deserialize_map(SectionsVisitor)
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────────

/// Serialized document state stored in checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSnapshot {
    pub sections: Sections,
    pub tracked_dates: BTreeSet<String>,
    pub tracked_entities: BTreeSet<String>,
    pub tracked_topics: BTreeSet<String>,
}

// ── LiveDocument ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LiveDocument {
    pub max_words: usize,
    pub format_spec: FormatSpec,
    pub sections: Sections,
    pub tracked_dates: BTreeSet<String>,
    pub tracked_entities: BTreeSet<String>,
    pub tracked_topics: BTreeSet<String>,
}

impl LiveDocument {
    pub fn new(format_spec: FormatSpec, max_words: usize) -> Self {
        let sections = Sections::from_names(format_spec.sections.iter().cloned());
        Self {
            max_words,
            format_spec,
            sections,
            tracked_dates: BTreeSet::new(),
            tracked_entities: BTreeSet::new(),
            tracked_topics: BTreeSet::new(),
        }
    }

    /// Sum of whitespace-split words over every item of every section.
    pub fn current_word_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|(_, items)| items.iter())
            .map(|item| word_count(item))
            .sum()
    }

    /// `current_word_count() > threshold * max_words`.
    pub fn needs_compression(&self, threshold: f64) -> bool {
        self.current_word_count() as f64 > self.max_words as f64 * threshold
    }

    /// Append to a known section; unknown sections are ignored.
    pub fn add_content(&mut self, section: &str, content: impl Into<String>) {
        if let Some(items) = self.sections.get_mut(section) {
            items.push(content.into());
        }
    }

    /// Replace an item in place; unknown section or bad index is a no-op.
    pub fn update_content(&mut self, section: &str, index: usize, content: impl Into<String>) {
        if let Some(slot) = self
            .sections
            .get_mut(section)
            .and_then(|items| items.get_mut(index))
        {
            *slot = content.into();
        }
    }

    /// Record the page's dates, actors, entities and topics as protected.
    pub fn track_protected_items(&mut self, page: &PageExtraction) {
        for event in &page.events {
            if let Some(date) = event.date.as_deref().filter(|d| !d.trim().is_empty()) {
                self.tracked_dates.insert(date.to_string());
            }
            for actor in event.actors.iter().filter(|a| !a.trim().is_empty()) {
                self.tracked_entities.insert(actor.clone());
            }
        }
        for entity in page.entities.iter().filter(|e| !e.trim().is_empty()) {
            self.tracked_entities.insert(entity.clone());
        }
        for date in page.dates.iter().filter(|d| !d.trim().is_empty()) {
            self.tracked_dates.insert(date.clone());
        }
        for topic in page.topics.iter().filter(|t| !t.trim().is_empty()) {
            self.tracked_topics.insert(topic.clone());
        }
    }

    /// Index of the item sharing the most case-folded words with `topic`.
    ///
    /// Requires at least one shared word; the lowest index wins ties.
    pub fn find_related_item(&self, section: &str, topic: &str) -> Option<usize> {
        let topic_lower = topic.to_lowercase();
        let topic_words: HashSet<&str> = topic_lower.split_whitespace().collect();
        let items = self.sections.get(section)?;

        let mut best: Option<(usize, usize)> = None;
        for (idx, item) in items.iter().enumerate() {
            let item_lower = item.to_lowercase();
            let overlap = item_lower
                .split_whitespace()
                .collect::<HashSet<_>>()
                .intersection(&topic_words)
                .count();
            if overlap > best.map(|(_, score)| score).unwrap_or(0) {
                best = Some((idx, overlap));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Resolve a possibly misspelled or decorated section name.
    pub fn find_closest_section(&self, name: &str) -> String {
        let wanted = name.to_lowercase();
        if let Some(hit) = self.sections.names().find(|s| {
            let s = s.to_lowercase();
            wanted.contains(&s) || s.contains(&wanted)
        }) {
            return hit.to_string();
        }
        if self.sections.contains(TIMELINE_SECTION) {
            return TIMELINE_SECTION.to_string();
        }
        self.sections
            .names()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string())
    }

    /// Token-cheap digest: item counts plus short previews per section.
    pub fn get_compact_state(&self) -> String {
        let lines: Vec<String> = self
            .sections
            .iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(name, items)| {
                let previews: Vec<&str> = items
                    .iter()
                    .take(COMPACT_PREVIEW_ITEMS)
                    .map(|item| {
                        let head = item.split('.').next().unwrap_or("");
                        truncate_chars(head, COMPACT_PREVIEW_CHARS)
                    })
                    .collect();
                format!("[{name}]: {} items - {}", items.len(), previews.join(", "))
            })
            .collect();

        if lines.is_empty() {
            "(empty document)".to_string()
        } else {
            lines.join("\n")
        }
    }

    /// Render as markdown: title, then each non-empty section as a dash list.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![format!("# {}\n", self.format_spec.title)];

        let order: Vec<&str> = if self.format_spec.section_order.is_empty() {
            self.sections.names().collect()
        } else {
            self.format_spec
                .section_order
                .iter()
                .map(String::as_str)
                .collect()
        };

        for name in order {
            let Some(items) = self.sections.get(name).filter(|i| !i.is_empty()) else {
                continue;
            };
            lines.push(format!("## {name}\n"));
            lines.extend(items.iter().map(|item| format!("- {item}")));
            lines.push(String::new());
        }

        lines.join("\n")
    }

    /// Snapshot for checkpointing.
    pub fn to_snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            sections: self.sections.clone(),
            tracked_dates: self.tracked_dates.clone(),
            tracked_entities: self.tracked_entities.clone(),
            tracked_topics: self.tracked_topics.clone(),
        }
    }

    /// Rebuild from a (possibly partial) snapshot.
    ///
    /// Sections come from `format_spec`; snapshot items are copied only into
    /// sections the format knows.
    pub fn from_snapshot(snapshot: DocumentSnapshot, format_spec: FormatSpec, max_words: usize) -> Self {
        let mut doc = Self::new(format_spec, max_words);
        for (name, items) in snapshot.sections.0 {
            if let Some(slot) = doc.sections.get_mut(&name) {
                *slot = items;
            }
        }
        doc.tracked_dates = snapshot.tracked_dates;
        doc.tracked_entities = snapshot.tracked_entities;
        doc.tracked_topics = snapshot.tracked_topics;
        doc
    }

    /// Snapshot as JSON.
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self.to_snapshot()).unwrap_or(serde_json::Value::Null)
    }

    /// Restore from JSON; missing or malformed keys fall back to a fresh
    /// document.
    pub fn from_dict(data: &serde_json::Value, format_spec: FormatSpec, max_words: usize) -> Self {
        let field = |key: &str| data.get(key).cloned().unwrap_or(serde_json::Value::Null);
        let snapshot = DocumentSnapshot {
            sections: serde_json::from_value(field("sections")).unwrap_or_default(),
            tracked_dates: serde_json::from_value(field("tracked_dates")).unwrap_or_default(),
            tracked_entities: serde_json::from_value(field("tracked_entities")).unwrap_or_default(),
            tracked_topics: serde_json::from_value(field("tracked_topics")).unwrap_or_default(),
        };
        Self::from_snapshot(snapshot, format_spec, max_words)
    }

    /// All section text joined, for protected-term scans.
    pub fn full_text(&self) -> String {
        self.sections
            .iter()
            .flat_map(|(_, items)| items.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

//! Typed page extractions and the coercion boundary in front of them.
//!
//! The vision model is asked for a fixed JSON schema but nothing guarantees it
//! answers with one. Every field read from a model payload therefore goes
//! through a `coerce_*` helper here: wrong types are stringified or replaced
//! by defaults, never raised. Past this module the rest of the crate only
//! sees [`PageExtraction`] and its typed children.
//!
//! Older payloads used `dates_mentioned` and `key_facts`; both are folded
//! into `dates` and `facts` during coercion.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Importance tier: must survive compression.
pub const CRITICAL: u8 = 3;
/// Importance tier: important context.
pub const HIGH: u8 = 2;
/// Importance tier: supporting detail.
pub const SUPPORTING: u8 = 1;

/// Table rows kept per table.
pub const MAX_TABLE_ROWS: usize = 10;

/// Keys probed, in order, when a string list item arrives as an object.
const STRING_ITEM_KEYS: [&str; 7] = ["text", "value", "name", "fact", "topic", "entity", "date"];

// ── Event type ───────────────────────────────────────────────────────────

/// Category of an extracted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Incident,
    Decision,
    Action,
    #[default]
    Other,
}

impl EventType {
    /// Lenient parse: anything unrecognised is [`EventType::Other`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "incident" => EventType::Incident,
            "decision" => EventType::Decision,
            "action" => EventType::Action,
            _ => EventType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Incident => "incident",
            EventType::Decision => "decision",
            EventType::Action => "action",
            EventType::Other => "other",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub summary: String,
    pub importance: u8,
}

impl Default for TableData {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
            summary: String::new(),
            importance: HIGH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualData {
    /// chart, graph, image or diagram.
    #[serde(rename = "type")]
    pub visual_type: String,
    pub description: String,
    pub data_points: Vec<String>,
    pub trend: String,
    pub importance: u8,
}

impl Default for VisualData {
    fn default() -> Self {
        Self {
            visual_type: "image".to_string(),
            description: String::new(),
            data_points: Vec::new(),
            trend: "n/a".to_string(),
            importance: HIGH,
        }
    }
}

/// An event as the model reported it, before date normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedEvent {
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub summary: String,
    pub actors: Vec<String>,
    pub importance: u8,
}

impl Default for ExtractedEvent {
    fn default() -> Self {
        Self {
            date: None,
            event_type: EventType::Other,
            summary: String::new(),
            actors: Vec::new(),
            importance: HIGH,
        }
    }
}

impl ExtractedEvent {
    /// Coerce any JSON value into an event. Non-objects yield the default.
    pub fn coerce(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            date: coerce_optional_string(obj.get("date")),
            event_type: EventType::from_label(&coerce_string(obj.get("type"))),
            summary: coerce_string(obj.get("summary")),
            actors: coerce_string_list(obj.get("actors")),
            importance: coerce_importance(obj.get("importance"), HIGH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fact {
    pub text: String,
    pub importance: u8,
}

impl Default for Fact {
    fn default() -> Self {
        Self {
            text: String::new(),
            importance: SUPPORTING,
        }
    }
}

/// Everything extracted from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageExtraction {
    /// 1-based page number across the whole collection.
    #[serde(rename = "_page_index")]
    pub page_index: usize,
    #[serde(rename = "_source_image")]
    pub source_image: String,

    pub content_types: Vec<String>,
    pub tables: Vec<TableData>,
    pub visuals: Vec<VisualData>,
    pub events: Vec<ExtractedEvent>,
    pub entities: Vec<String>,
    pub dates: Vec<String>,
    pub facts: Vec<Fact>,
    pub topics: Vec<String>,

    pub continues_previous: bool,
    pub continues_next: bool,
}

impl PageExtraction {
    /// Empty extraction used when the model call fails.
    pub fn empty(page_index: usize, source_image: impl Into<String>) -> Self {
        Self {
            page_index,
            source_image: source_image.into(),
            ..Default::default()
        }
    }

    /// Coerce a raw model payload into a typed extraction.
    pub fn from_value(value: &Value, page_index: usize, source_image: impl Into<String>) -> Self {
        let empty = Map::new();
        let obj = value.as_object().unwrap_or(&empty);

        let mut dates = coerce_string_list(obj.get("dates"));
        dates.extend(coerce_string_list(obj.get("dates_mentioned")));

        let mut facts = coerce_facts(obj.get("facts"));
        facts.extend(coerce_facts(obj.get("key_facts")));

        Self {
            page_index,
            source_image: source_image.into(),
            content_types: coerce_string_list(obj.get("content_types")),
            tables: coerce_tables(obj.get("tables")),
            visuals: coerce_visuals(obj.get("visuals")),
            events: coerce_events(obj.get("events")),
            entities: coerce_string_list(obj.get("entities")),
            dates,
            facts,
            topics: coerce_string_list(obj.get("topics")),
            continues_previous: coerce_bool(obj.get("continues_previous")),
            continues_next: coerce_bool(obj.get("continues_next")),
        }
    }

    /// Nothing a decision could route: no events, facts or topics.
    pub fn has_routable_content(&self) -> bool {
        !(self.events.is_empty() && self.facts.is_empty() && self.topics.is_empty())
    }

    /// Unique actor names from events, then entities, in first-seen order.
    pub fn actors(&self) -> Vec<String> {
        let mut actors: Vec<String> = Vec::new();
        let candidates = self
            .events
            .iter()
            .flat_map(|e| e.actors.iter())
            .chain(self.entities.iter());
        for name in candidates {
            if !name.is_empty() && !actors.contains(name) {
                actors.push(name.clone());
            }
        }
        actors
    }

    /// JSON for debug dumps, without the bookkeeping fields.
    pub fn to_debug_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.retain(|k, _| !k.starts_with('_'));
        }
        value
    }
}

// ── Coercion helpers ─────────────────────────────────────────────────────

/// String as-is, `null`/missing as empty, anything else as its JSON text.
pub fn coerce_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Like [`coerce_string`] but empty and literal `"null"` become `None`.
pub fn coerce_optional_string(value: Option<&Value>) -> Option<String> {
    let s = coerce_string(value);
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(s)
    }
}

/// A list of non-empty strings. Object items resolve through the first
/// string-valued key among `text`, `value`, `name`, `fact`, `topic`,
/// `entity`, `date`; a bare scalar becomes a one-item list.
pub fn coerce_string_list(value: Option<&Value>) -> Vec<String> {
    let items = match value {
        Some(Value::Array(items)) => items.as_slice(),
        Some(Value::String(s)) if !s.is_empty() => return vec![s.clone()],
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            Value::Object(obj) => Some(
                STRING_ITEM_KEYS
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| item.to_string()),
            ),
            other => Some(other.to_string()),
        })
        .collect()
}

/// Clamp to 1..=3. Missing uses `default`; present but non-numeric is 2.
pub fn coerce_importance(value: Option<&Value>, default: u8) -> u8 {
    let raw = match value {
        None | Some(Value::Null) => return default,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        Some(_) => None,
    };
    match raw {
        Some(n) => n.clamp(1, 3) as u8,
        None => HIGH,
    }
}

fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn as_array(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

fn coerce_tables(value: Option<&Value>) -> Vec<TableData> {
    as_array(value)
        .iter()
        .filter_map(Value::as_object)
        .map(|t| TableData {
            headers: coerce_string_list(t.get("headers")),
            rows: coerce_table_rows(t.get("rows")),
            summary: coerce_string(t.get("summary")),
            importance: coerce_importance(t.get("importance"), HIGH),
        })
        .collect()
}

fn coerce_table_rows(value: Option<&Value>) -> Vec<Vec<String>> {
    let cell = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    as_array(value)
        .iter()
        .take(MAX_TABLE_ROWS)
        .filter_map(|row| match row {
            Value::Array(cells) => Some(cells.iter().map(cell).collect()),
            Value::Object(obj) => Some(obj.values().map(cell).collect()),
            _ => None,
        })
        .collect()
}

fn coerce_visuals(value: Option<&Value>) -> Vec<VisualData> {
    as_array(value)
        .iter()
        .filter_map(Value::as_object)
        .map(|v| {
            let visual_type = v
                .get("type")
                .or_else(|| v.get("visual_type"))
                .map(|t| coerce_string(Some(t)))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "image".to_string());
            let trend = Some(coerce_string(v.get("trend")))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "n/a".to_string());
            VisualData {
                visual_type,
                description: coerce_string(v.get("description")),
                data_points: coerce_string_list(v.get("data_points")),
                trend,
                importance: coerce_importance(v.get("importance"), HIGH),
            }
        })
        .collect()
}

/// Events without a summary are dropped.
fn coerce_events(value: Option<&Value>) -> Vec<ExtractedEvent> {
    as_array(value)
        .iter()
        .filter(|e| e.is_object())
        .map(ExtractedEvent::coerce)
        .filter(|e| !e.summary.trim().is_empty())
        .collect()
}

fn coerce_facts(value: Option<&Value>) -> Vec<Fact> {
    as_array(value)
        .iter()
        .filter_map(|fact| match fact {
            Value::String(s) if !s.is_empty() => Some(Fact {
                text: s.clone(),
                importance: SUPPORTING,
            }),
            Value::Object(obj) => {
                let text = coerce_string(obj.get("text").or_else(|| obj.get("fact")));
                (!text.is_empty()).then(|| Fact {
                    text,
                    importance: coerce_importance(obj.get("importance"), SUPPORTING),
                })
            }
            _ => None,
        })
        .collect()
}

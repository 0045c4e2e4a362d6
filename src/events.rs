//! Event enrichment, semantic signatures and near-duplicate removal.
//!
//! The same incident is usually reported on several pages with different
//! wording. Each raw [`ExtractedEvent`] is enriched into an
//! [`EnrichedEvent`] carrying a normalized date and a semantic signature:
//!
//! ```text
//! {date.normalized}|{up to 8 sorted keywords}|{sorted actor prefixes}
//! ```
//!
//! [`EventEnricher::deduplicate_events`] then compares keyword sets inside a
//! year-month bucket and keeps the highest-importance phrasing of each fact.

use crate::dates::{DateNormalizer, NormalizedDate};
use crate::extraction::{EventType, ExtractedEvent};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Keywords kept per signature.
pub const MAX_SIGNATURE_TERMS: usize = 8;
/// Actors contributing to a signature.
pub const MAX_SIGNATURE_ACTORS: usize = 3;
/// Characters kept from each actor name.
pub const ACTOR_PREFIX_CHARS: usize = 20;
/// Default keyword-overlap ratio at which two events are duplicates.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

const NO_DATE_BUCKET: &str = "no_date";
const UNDATED_SORT_KEY: &str = "9999";

static STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "was", "were", "is", "are", "been", "be", "has", "have", "had", "this", "that",
    "these", "those", "it", "its", "which", "who", "what", "when", "where", "why", "how",
];

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-zA-Z]+\b").unwrap());

/// Sorted, unique, lowercase keywords of `text`: alphabetic tokens longer
/// than two characters that are not stop words.
pub fn keywords(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    WORD_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// An extracted event with a normalized date and a dedup signature.
///
/// Never mutated after creation; year inference produces new instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub date: Option<NormalizedDate>,
    pub event_type: EventType,
    pub summary: String,
    pub actors: Vec<String>,
    /// 1 supporting, 2 high, 3 critical.
    pub importance: u8,
    pub semantic_signature: String,
}

impl EnrichedEvent {
    /// Keyword segment of the signature as a set.
    pub fn signature_terms(&self) -> BTreeSet<&str> {
        self.semantic_signature
            .split('|')
            .nth(1)
            .map(|terms| terms.split(',').filter(|t| !t.is_empty()).collect())
            .unwrap_or_default()
    }

    fn bucket_key(&self) -> String {
        match &self.date {
            Some(d) => d.month_key(),
            None => NO_DATE_BUCKET.to_string(),
        }
    }

    fn sort_key(&self) -> &str {
        self.date
            .as_ref()
            .map(|d| d.normalized.as_str())
            .unwrap_or(UNDATED_SORT_KEY)
    }

    /// Same event with a new date and recomputed signature.
    fn with_date(&self, date: NormalizedDate) -> Self {
        let semantic_signature = build_signature(&self.summary, Some(&date), &self.actors);
        Self {
            date: Some(date),
            semantic_signature,
            ..self.clone()
        }
    }
}

/// Build `date|keywords|actors` for an event.
pub fn build_signature(summary: &str, date: Option<&NormalizedDate>, actors: &[String]) -> String {
    let date_part = date.map(|d| d.normalized.as_str()).unwrap_or("");

    let terms: Vec<String> = keywords(summary)
        .into_iter()
        .take(MAX_SIGNATURE_TERMS)
        .collect();

    let mut actor_part: Vec<String> = actors
        .iter()
        .take(MAX_SIGNATURE_ACTORS)
        .map(|a| a.to_lowercase().chars().take(ACTOR_PREFIX_CHARS).collect())
        .collect();
    actor_part.sort();

    format!("{date_part}|{}|{}", terms.join(","), actor_part.join(","))
}

/// `|A∩B| / max(|A|,|B|)`; zero when either side is empty.
pub fn term_overlap(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f64 / a.len().max(b.len()) as f64
}

/// Enriches, deduplicates and year-fills events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventEnricher {
    normalizer: DateNormalizer,
}

impl EventEnricher {
    pub fn new(normalizer: DateNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn normalizer(&self) -> &DateNormalizer {
        &self.normalizer
    }

    /// Enrich a typed event.
    pub fn enrich_event(&self, raw: &ExtractedEvent, context_year: Option<i32>) -> EnrichedEvent {
        let date = raw
            .date
            .as_deref()
            .and_then(|d| self.normalizer.parse_date(d, context_year));
        let actors: Vec<String> = raw
            .actors
            .iter()
            .filter(|a| !a.trim().is_empty())
            .cloned()
            .collect();
        let importance = raw.importance.clamp(1, 3);
        let semantic_signature = build_signature(&raw.summary, date.as_ref(), &actors);

        EnrichedEvent {
            date,
            event_type: raw.event_type,
            summary: raw.summary.clone(),
            actors,
            importance,
            semantic_signature,
        }
    }

    /// Enrich an untyped payload by coercing it first.
    pub fn enrich_value(&self, raw: &Value, context_year: Option<i32>) -> EnrichedEvent {
        self.enrich_event(&ExtractedEvent::coerce(raw), context_year)
    }

    /// Drop near-duplicates.
    ///
    /// Events are bucketed by year-month (or undated), each bucket is scanned
    /// by descending importance (stable, so first-seen wins ties), and an
    /// event is dropped when its keyword overlap with an accepted event in
    /// the same bucket reaches `similarity_threshold`. The survivors are
    /// sorted by normalized date, undated last.
    pub fn deduplicate_events(
        &self,
        events: &[EnrichedEvent],
        similarity_threshold: f64,
    ) -> Vec<EnrichedEvent> {
        let mut bucket_order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, Vec<&EnrichedEvent>> = HashMap::new();
        for event in events {
            let key = event.bucket_key();
            if !buckets.contains_key(&key) {
                bucket_order.push(key.clone());
            }
            buckets.entry(key).or_default().push(event);
        }

        let mut result: Vec<EnrichedEvent> = Vec::new();
        for key in &bucket_order {
            let Some(group) = buckets.get_mut(key) else {
                continue;
            };
            group.sort_by(|a, b| b.importance.cmp(&a.importance));

            let mut accepted: Vec<BTreeSet<&str>> = Vec::new();
            for event in group.iter() {
                let terms = event.signature_terms();
                let duplicate = accepted
                    .iter()
                    .any(|seen| term_overlap(&terms, seen) >= similarity_threshold);
                if duplicate {
                    continue;
                }
                accepted.push(terms);
                result.push((*event).clone());
            }
        }

        result.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));
        result
    }

    /// Whether `candidate` repeats any of `known` under the dedup rule.
    pub fn is_duplicate_of_any(
        &self,
        candidate: &EnrichedEvent,
        known: &[EnrichedEvent],
        similarity_threshold: f64,
    ) -> bool {
        let key = candidate.bucket_key();
        let terms = candidate.signature_terms();
        known
            .iter()
            .filter(|k| k.bucket_key() == key)
            .any(|k| term_overlap(&terms, &k.signature_terms()) >= similarity_threshold)
    }

    /// Fill missing years with the latest explicitly stated year, falling
    /// back to `document_year` and then to the normalizer's default.
    pub fn infer_missing_years(
        &self,
        events: &[EnrichedEvent],
        document_year: Option<i32>,
    ) -> Vec<EnrichedEvent> {
        let likely_year = events
            .iter()
            .filter_map(|e| e.date.as_ref())
            .filter(|d| !d.inferred)
            .filter_map(|d| d.year)
            .max()
            .or(document_year)
            .unwrap_or_else(|| self.normalizer.document_year());

        events
            .iter()
            .map(|event| match &event.date {
                Some(date) if date.year.is_none() => {
                    event.with_date(date.with_inferred_year(likely_year))
                }
                _ => event.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn enricher() -> EventEnricher {
        EventEnricher::new(DateNormalizer::new(Some(2024)))
    }

    fn event(date: Option<&str>, summary: &str, importance: u8) -> EnrichedEvent {
        enricher().enrich_event(
            &ExtractedEvent {
                date: date.map(str::to_string),
                summary: summary.to_string(),
                importance,
                ..Default::default()
            },
            None,
        )
    }

    #[test]
    fn signature_layout() {
        let e = enricher().enrich_value(
            &json!({
                "date": "2024-03-15",
                "summary": "The database failover was triggered by the on-call engineer",
                "actors": ["Zoe Platform-Engineering-Team-Lead", "alice"],
                "importance": 3
            }),
            None,
        );
        assert_eq!(
            e.semantic_signature,
            "2024-03-15|call,database,engineer,failover,triggered|alice,zoe platform-enginee"
        );
    }

    #[test]
    fn signature_caps_terms_at_eight() {
        let e = event(None, "alpha bravo charlie delta echo foxtrot golf hotel india juliet", 2);
        assert_eq!(e.signature_terms().len(), MAX_SIGNATURE_TERMS);
        assert!(e.semantic_signature.starts_with('|'));
    }

    #[test]
    fn enrich_value_coerces_bad_shapes() {
        let e = enricher().enrich_value(
            &json!({"summary": "Budget approved", "actors": "Finance", "importance": "urgent"}),
            None,
        );
        assert_eq!(e.actors, vec!["Finance"]);
        assert_eq!(e.importance, 2);
        assert!(e.date.is_none());
        assert_eq!(e.event_type, EventType::Other);
    }

    #[test]
    fn duplicates_on_same_day_collapse_to_one() {
        let events = vec![
            event(Some("2024-03-15"), "Server outage reported by ops", 2),
            event(Some("2024-03-15"), "Ops reported server outage", 2),
        ];
        let deduped = enricher().deduplicate_events(&events, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].summary, "Server outage reported by ops");
    }

    #[test]
    fn higher_importance_phrasing_survives() {
        let events = vec![
            event(Some("2024-03-15"), "Server outage reported by ops", 1),
            event(Some("2024-03-15"), "Ops reported server outage", 3),
        ];
        let deduped = enricher().deduplicate_events(&events, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].importance, 3);
    }

    #[test]
    fn different_months_never_merge() {
        let events = vec![
            event(Some("2024-03-15"), "Server outage reported by ops", 2),
            event(Some("2024-04-15"), "Server outage reported by ops", 2),
        ];
        let deduped = enricher().deduplicate_events(&events, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn dissimilar_events_survive_and_sort_by_date() {
        let events = vec![
            event(None, "Vendor contract renewed quietly", 2),
            event(Some("2024-05-02"), "Budget approved by finance", 2),
            event(Some("2024-01-10"), "Kickoff meeting held downtown", 2),
        ];
        let deduped = enricher().deduplicate_events(&events, DEFAULT_SIMILARITY_THRESHOLD);
        let order: Vec<&str> = deduped.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "Kickoff meeting held downtown",
                "Budget approved by finance",
                "Vendor contract renewed quietly"
            ]
        );
    }

    #[test]
    fn empty_keyword_sets_are_never_duplicates() {
        let events = vec![event(None, "a to be", 2), event(None, "it is", 2)];
        let deduped = enricher().deduplicate_events(&events, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn is_duplicate_of_any_matches_dedup_rule() {
        let known = vec![event(Some("2024-03-15"), "Server outage reported by ops", 2)];
        let e = enricher();
        assert!(e.is_duplicate_of_any(
            &event(Some("2024-03-02"), "Ops reported server outage", 2),
            &known,
            DEFAULT_SIMILARITY_THRESHOLD
        ));
        assert!(!e.is_duplicate_of_any(
            &event(None, "Ops reported server outage", 2),
            &known,
            DEFAULT_SIMILARITY_THRESHOLD
        ));
    }

    #[test]
    fn infer_years_from_latest_explicit_year() {
        let events = vec![
            event(Some("2022-06-01"), "Launch", 2),
            event(Some("2023-02-01"), "Review", 2),
            event(Some("sometime"), "Retrospective", 2),
        ];
        let filled = enricher().infer_missing_years(&events, Some(2019));
        let date = filled[2].date.as_ref().unwrap();
        assert_eq!(date.year, Some(2023));
        assert_eq!(date.normalized, "2023");
        assert!(date.inferred);
        assert!(filled[2].semantic_signature.starts_with("2023|"));
        // inputs are untouched
        assert_eq!(events[2].date.as_ref().unwrap().year, None);
    }

    #[test]
    fn infer_years_falls_back_to_document_year() {
        let events = vec![event(Some("sometime"), "Retrospective", 2)];
        let filled = enricher().infer_missing_years(&events, Some(2019));
        assert_eq!(filled[0].date.as_ref().unwrap().year, Some(2019));
    }

    proptest! {
        #[test]
        fn signature_is_order_independent(
            words in proptest::collection::vec("[a-z]{3,8}", 1..10),
            actors in proptest::collection::vec("[A-Za-z ]{1,30}", 0..3),
        ) {
            let forward = words.join(" ");
            let mut rev = words.clone();
            rev.reverse();
            let backward = rev.join(" ");
            let mut rev_actors = actors.clone();
            rev_actors.reverse();
            prop_assert_eq!(
                build_signature(&forward, None, &actors),
                build_signature(&backward, None, &rev_actors)
            );
        }

        #[test]
        fn dedup_never_grows(summaries in proptest::collection::vec("[a-z ]{0,40}", 0..12)) {
            let events: Vec<EnrichedEvent> =
                summaries.iter().map(|s| event(None, s, 2)).collect();
            let deduped = enricher().deduplicate_events(&events, DEFAULT_SIMILARITY_THRESHOLD);
            prop_assert!(deduped.len() <= events.len());
        }
    }
}

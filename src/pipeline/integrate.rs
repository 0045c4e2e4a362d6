//! Integrate stage: route each page into the [`LiveDocument`].
//!
//! Per page, the text model sees a compact page summary and the document's
//! compact state and answers with one line:
//!
//! ```text
//! action: ADD|UPDATE|SKIP, topic: <topic>, section: <section>
//! ```
//!
//! | Action | Effect |
//! |--------|--------|
//! | `ADD`    | append a generated item to the section |
//! | `UPDATE` | merge into the most related item, or `ADD` when none relates |
//! | `SKIP`   | nothing |
//!
//! An answer that cannot be parsed is a `SKIP`; the stage never guesses an
//! action. Protected terms are tracked for every page whatever the action.
//! The document is compressed inline once it crosses the threshold, and a
//! checkpoint is written after every page.

use super::compress::compress_document;
use super::{PipelineContext, Stage};
use crate::document::{LiveDocument, TIMELINE_SECTION};
use crate::error::ReportError;
use crate::events::{EnrichedEvent, EventEnricher, DEFAULT_SIMILARITY_THRESHOLD};
use crate::extraction::{ExtractedEvent, PageExtraction};
use crate::llm::ChatClient;
use crate::prompts::decision_prompt;
use crate::text::truncate_chars;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const STAGE: &str = "integrate";

/// Summary plus compact state above this many characters get trimmed.
const DECISION_CONTEXT_CHARS: usize = 2000;
/// Length a trimmed page summary is cut to.
const SUMMARY_TRIM_CHARS: usize = 1500;

static RE_DECISION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)action:\s*(ADD|UPDATE|SKIP)\s*,\s*topic:\s*([^,\n]+?)\s*,\s*section:\s*([^\n]+)")
        .unwrap()
});
static RE_ACTION_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)action:\s*(ADD|UPDATE|SKIP)").unwrap());

// ── Decisions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Update,
    Skip,
}

impl Action {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "ADD" => Some(Action::Add),
            "UPDATE" => Some(Action::Update),
            "SKIP" => Some(Action::Skip),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Add => "ADD",
            Action::Update => "UPDATE",
            Action::Skip => "SKIP",
        })
    }
}

/// A parsed routing answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub topic: String,
    pub section: String,
}

/// Parse a routing answer, tolerating markdown emphasis and quoting.
///
/// A bare `action: X` parses with topic `unknown` and section `Timeline`.
pub fn parse_decision(response: &str) -> Option<Decision> {
    let cleaned: String = response
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`' | '"' | '>' | '[' | ']'))
        .collect();

    if let Some(caps) = RE_DECISION.captures(&cleaned) {
        return Some(Decision {
            action: Action::from_label(&caps[1])?,
            topic: caps[2].trim().to_string(),
            section: caps[3].trim().trim_end_matches('.').trim().to_string(),
        });
    }

    let caps = RE_ACTION_ONLY.captures(&cleaned)?;
    Some(Decision {
        action: Action::from_label(&caps[1])?,
        topic: "unknown".to_string(),
        section: TIMELINE_SECTION.to_string(),
    })
}

// ── Page rendering ───────────────────────────────────────────────────────

/// Compact text of a page for the routing prompt.
pub fn summarize_page(page: &PageExtraction) -> String {
    let mut parts = Vec::new();
    for event in page.events.iter().take(3) {
        let date = event
            .date
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or("no date");
        parts.push(format!(
            "- Event ({date}): {}",
            truncate_chars(&event.summary, 100)
        ));
    }
    if !page.topics.is_empty() {
        let topics: Vec<&str> = page.topics.iter().take(5).map(String::as_str).collect();
        parts.push(format!("- Topics: {}", topics.join(", ")));
    }
    if !page.facts.is_empty() {
        let facts: Vec<&str> = page.facts.iter().take(3).map(|f| f.text.as_str()).collect();
        parts.push(format!("- Facts: {}", facts.join("; ")));
    }

    if parts.is_empty() {
        "No significant content extracted".to_string()
    } else {
        parts.join("\n")
    }
}

/// The item a page contributes: up to two dated event summaries, or up to
/// two facts when it has no usable events.
pub fn content_item(page: &PageExtraction) -> Option<String> {
    let mut parts: Vec<String> = page
        .events
        .iter()
        .take(2)
        .filter(|e| !e.summary.is_empty())
        .map(|e| {
            let summary = truncate_chars(&e.summary, 150);
            match e.date.as_deref().filter(|d| !d.is_empty()) {
                Some(date) => format!("({date}) {summary}"),
                None => summary.to_string(),
            }
        })
        .collect();

    if parts.is_empty() {
        parts = page
            .facts
            .iter()
            .take(2)
            .filter(|f| !f.text.is_empty())
            .map(|f| truncate_chars(&f.text, 150).to_string())
            .collect();
    }

    (!parts.is_empty()).then(|| parts.join("; "))
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Ask for a decision on one page and apply it.
///
/// Protected terms are the caller's job: they come from the unfiltered
/// page, not the deduplicated copy routed here.
pub async fn route_page(
    client: &dyn ChatClient,
    doc: &mut LiveDocument,
    page: &PageExtraction,
) -> Action {
    let compact = doc.get_compact_state();
    let mut summary = summarize_page(page);
    if summary.len() + compact.len() > DECISION_CONTEXT_CHARS {
        summary = format!("{}...", truncate_chars(&summary, SUMMARY_TRIM_CHARS));
    }
    let sections: Vec<String> = doc.sections.names().map(str::to_string).collect();
    let prompt = decision_prompt(&summary, &compact, &sections);

    let decision = match client.chat(&prompt, &[], false).await {
        Ok(response) => {
            let parsed = parse_decision(&response);
            if parsed.is_none() {
                warn!(
                    "    Could not parse decision, skipping. Response: {}",
                    truncate_chars(&response, 100)
                );
            }
            parsed
        }
        Err(e) => {
            warn!("    Decision call failed: {e}; skipping");
            None
        }
    };

    let action = match decision {
        Some(mut decision) => {
            if !doc.sections.contains(&decision.section) {
                let remapped = doc.find_closest_section(&decision.section);
                debug!("    Section '{}' → '{remapped}'", decision.section);
                decision.section = remapped;
            }
            apply_decision(doc, page, &decision);
            decision.action
        }
        None => Action::Skip,
    };
    action
}

fn apply_decision(doc: &mut LiveDocument, page: &PageExtraction, decision: &Decision) {
    let section = decision.section.as_str();
    match decision.action {
        Action::Skip => {}
        Action::Add => add_item(doc, page, section),
        Action::Update => {
            let has_items = doc.sections.get(section).is_some_and(|items| !items.is_empty());
            let related = if has_items {
                doc.find_related_item(section, &decision.topic)
            } else {
                None
            };
            let Some(idx) = related else {
                add_item(doc, page, section);
                return;
            };
            let Some(new_content) = content_item(page) else {
                return;
            };
            let existing = doc
                .sections
                .get(section)
                .and_then(|items| items.get(idx))
                .cloned()
                .unwrap_or_default();
            doc.update_content(section, idx, format!("{existing}. Additionally: {new_content}"));
        }
    }
}

fn add_item(doc: &mut LiveDocument, page: &PageExtraction, section: &str) {
    if let Some(item) = content_item(page) {
        doc.add_content(section, item);
    }
}

// ── Stage ────────────────────────────────────────────────────────────────

/// Builds the live document page by page.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrateStage;

#[async_trait]
impl Stage for IntegrateStage {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn should_skip(&self, ctx: &PipelineContext) -> bool {
        ctx.extractions.is_empty()
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ReportError> {
        let client = Arc::clone(&ctx.clients.text);
        let enricher = ctx.enricher();
        let year = ctx.config.document_year;
        let threshold = ctx.config.compression_threshold;
        let total = ctx.extractions.len();

        // Events from pages already routed, for cross-page dedup. Replaying
        // the same accept/drop pass keeps a resumed run equal to a straight one.
        let mut seen: Vec<EnrichedEvent> = Vec::new();
        for page in ctx
            .extractions
            .iter()
            .filter(|e| e.page_index <= ctx.last_processed_page)
        {
            accept_new_events(&enricher, page.events.clone(), year, &mut seen);
        }
        ctx.document_mut();

        for idx in 0..total {
            let mut page = ctx.extractions[idx].clone();
            let page_num = page.page_index;
            if page_num <= ctx.last_processed_page {
                continue;
            }
            ctx.progress().on_page_start(STAGE, page_num, total);

            // Tracked from the full page, repeats included, whatever the action.
            ctx.document_mut().track_protected_items(&page);

            let before = page.events.len();
            let events = std::mem::take(&mut page.events);
            page.events = accept_new_events(&enricher, events, year, &mut seen);
            if page.events.len() < before {
                debug!("  Page {page_num}: dropped {} repeated events", before - page.events.len());
            }

            let action = if page.has_routable_content() {
                let action = route_page(client.as_ref(), ctx.document_mut(), &page).await;
                info!(
                    "  Page {page_num}: {action} (words: {})",
                    ctx.document_mut().current_word_count()
                );
                action
            } else {
                info!("  Page {page_num}: SKIP (no significant content)");
                Action::Skip
            };

            if ctx.document_mut().needs_compression(threshold) {
                compress_document(ctx).await;
            }

            ctx.last_processed_page = page_num;
            ctx.save_checkpoint().await?;
            ctx.progress()
                .on_page_complete(STAGE, page_num, total, &action.to_string());
        }
        Ok(())
    }
}

/// Keep the events that repeat nothing in `seen`, adding each kept one to it.
fn accept_new_events(
    enricher: &EventEnricher,
    events: Vec<ExtractedEvent>,
    year: Option<i32>,
    seen: &mut Vec<EnrichedEvent>,
) -> Vec<ExtractedEvent> {
    events
        .into_iter()
        .filter(|event| {
            let enriched = enricher.enrich_event(event, year);
            if enricher.is_duplicate_of_any(&enriched, seen.as_slice(), DEFAULT_SIMILARITY_THRESHOLD) {
                false
            } else {
                seen.push(enriched);
                true
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractedEvent, Fact};
    use crate::llm::testing::ScriptedClient;
    use crate::pipeline::testing::context;

    fn page(index: usize, events: &[(&str, &str)]) -> PageExtraction {
        let mut p = PageExtraction::empty(index, format!("doc_001_page_{index:03}"));
        p.events = events
            .iter()
            .map(|(date, summary)| ExtractedEvent {
                date: Some(date.to_string()),
                summary: summary.to_string(),
                actors: vec!["Alice".into()],
                ..Default::default()
            })
            .collect();
        p
    }

    #[test]
    fn parses_plain_and_decorated_decisions() {
        let plain = parse_decision("action: ADD, topic: db outage, section: Timeline").unwrap();
        assert_eq!(plain.action, Action::Add);
        assert_eq!(plain.topic, "db outage");
        assert_eq!(plain.section, "Timeline");

        let bold = parse_decision("**action:** UPDATE, **topic:** outage, **section:** Impact Assessment.")
            .unwrap();
        assert_eq!(bold.action, Action::Update);
        assert_eq!(bold.section, "Impact Assessment");

        let quoted = parse_decision("> \"action: skip, topic: noise, section: Timeline\"").unwrap();
        assert_eq!(quoted.action, Action::Skip);
        assert_eq!(quoted.section, "Timeline");

        let bracketed = parse_decision("action: [ADD], topic: [billing], section: [Action Items]").unwrap();
        assert_eq!(bracketed.action, Action::Add);
        assert_eq!(bracketed.section, "Action Items");
    }

    #[test]
    fn action_only_falls_back_to_timeline() {
        let d = parse_decision("I would say action: update here").unwrap();
        assert_eq!(d.action, Action::Update);
        assert_eq!(d.topic, "unknown");
        assert_eq!(d.section, "Timeline");
        assert_eq!(parse_decision("not sure what to do"), None);
    }

    #[test]
    fn page_summary_and_content_item() {
        let mut p = page(1, &[("2024-03-15", "Outage began")]);
        p.events.push(ExtractedEvent {
            summary: "Vendor paged".into(),
            ..Default::default()
        });
        p.topics = vec!["outage".into(), "vendor".into()];
        p.facts = vec![Fact {
            text: "Three regions down".into(),
            importance: 1,
        }];
        assert_eq!(
            summarize_page(&p),
            "- Event (2024-03-15): Outage began\n- Event (no date): Vendor paged\n- Topics: outage, vendor\n- Facts: Three regions down"
        );
        assert_eq!(
            content_item(&p).unwrap(),
            "(2024-03-15) Outage began; Vendor paged"
        );

        p.events.clear();
        assert_eq!(content_item(&p).unwrap(), "Three regions down");
        p.facts.clear();
        assert_eq!(content_item(&p), None);
        assert_eq!(summarize_page(&PageExtraction::empty(2, "x")), "No significant content extracted");
    }

    #[tokio::test]
    async fn add_then_update_merges_related_item() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new([
            "action: ADD, topic: outage, section: Timeline",
            "action: UPDATE, topic: outage began, section: timeline events",
        ]);
        let mut ctx = context(client.clone(), dir.path());
        ctx.extractions = vec![
            page(1, &[("2024-03-15", "Outage began in region east")]),
            page(2, &[("2024-04-02", "Postmortem published for the team")]),
        ];

        IntegrateStage.execute(&mut ctx).await.unwrap();

        let doc = ctx.document.as_ref().unwrap();
        assert_eq!(
            doc.sections.get("Timeline").unwrap(),
            &vec!["(2024-03-15) Outage began in region east. Additionally: (2024-04-02) Postmortem published for the team".to_string()]
        );
        assert!(doc.tracked_dates.contains("2024-04-02"));
        assert_eq!(ctx.last_processed_page, 2);
        assert!(ctx.checkpoints.exists());
        assert!(client.prompts()[1].contains("[Timeline]: 1 items"));
    }

    #[tokio::test]
    async fn unparseable_answer_skips_but_still_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(["I am not sure."]);
        let mut ctx = context(client, dir.path());
        ctx.extractions = vec![page(1, &[("2024-03-15", "Outage began")])];

        IntegrateStage.execute(&mut ctx).await.unwrap();

        let doc = ctx.document.as_ref().unwrap();
        assert_eq!(doc.current_word_count(), 0);
        assert!(doc.tracked_dates.contains("2024-03-15"));
        assert!(doc.tracked_entities.contains("Alice"));
        assert_eq!(ctx.last_processed_page, 1);
    }

    #[tokio::test]
    async fn repeated_event_from_earlier_page_is_not_routed() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(["action: ADD, topic: outage, section: Timeline"]);
        let mut ctx = context(client.clone(), dir.path());
        ctx.extractions = vec![
            page(1, &[("2024-03-15", "Server outage reported by ops")]),
            page(2, &[("2024-03-15", "Server outage reported by ops")]),
        ];

        IntegrateStage.execute(&mut ctx).await.unwrap();

        assert_eq!(client.prompts().len(), 1);
        assert_eq!(ctx.document.unwrap().sections.get("Timeline").unwrap().len(), 1);
        assert_eq!(ctx.last_processed_page, 2);
    }

    #[tokio::test]
    async fn repeated_events_still_protect_their_dates_and_actors() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(["action: ADD, topic: outage, section: Timeline"]);
        let mut ctx = context(client.clone(), dir.path());
        let mut second = page(2, &[("2024-03-20", "Ops reported server outage")]);
        second.events[0].actors = vec!["Bob".into()];
        ctx.extractions = vec![
            page(1, &[("2024-03-15", "Server outage reported by ops")]),
            second,
        ];

        IntegrateStage.execute(&mut ctx).await.unwrap();

        assert_eq!(client.prompts().len(), 1);
        let doc = ctx.document.unwrap();
        assert!(doc.tracked_dates.contains("2024-03-15"));
        assert!(doc.tracked_dates.contains("2024-03-20"));
        assert!(doc.tracked_entities.contains("Alice"));
        assert!(doc.tracked_entities.contains("Bob"));
    }

    #[tokio::test]
    async fn page_without_routable_content_is_tracked_without_a_call() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(Vec::<String>::new());
        let mut ctx = context(client.clone(), dir.path());
        let mut p = PageExtraction::empty(1, "doc_001_page_001");
        p.entities = vec!["Acme Corp".into()];
        p.dates = vec!["2024-05-01".into()];
        ctx.extractions = vec![p];

        IntegrateStage.execute(&mut ctx).await.unwrap();

        assert!(client.prompts().is_empty());
        let doc = ctx.document.unwrap();
        assert!(doc.tracked_entities.contains("Acme Corp"));
        assert!(doc.tracked_dates.contains("2024-05-01"));
        assert_eq!(ctx.last_processed_page, 1);
    }

    #[tokio::test]
    async fn resumed_dedup_matches_a_straight_run() {
        let pages = || {
            vec![
                page(1, &[("2024-03-15", "alpha bravo charlie delta echo")]),
                page(2, &[("2024-03-16", "alpha bravo charlie delta foxtrot")]),
                page(3, &[("2024-03-17", "alpha bravo charlie foxtrot golf")]),
            ]
        };

        // Page 2 repeats page 1 and is dropped; page 3 only resembles the
        // dropped page 2, so it is routed.
        let dir = tempfile::tempdir().unwrap();
        let straight = ScriptedClient::new([
            "action: ADD, topic: alpha, section: Timeline",
            "action: ADD, topic: golf, section: Action Items",
        ]);
        let mut ctx = context(straight.clone(), dir.path());
        ctx.extractions = pages();
        IntegrateStage.execute(&mut ctx).await.unwrap();
        assert_eq!(straight.prompts().len(), 2);
        assert!(straight.prompts()[1].contains("alpha bravo charlie foxtrot golf"));

        let dir = tempfile::tempdir().unwrap();
        let resumed = ScriptedClient::new(["action: ADD, topic: golf, section: Action Items"]);
        let mut ctx = context(resumed.clone(), dir.path());
        ctx.extractions = pages();
        ctx.last_processed_page = 2;
        IntegrateStage.execute(&mut ctx).await.unwrap();
        assert_eq!(resumed.prompts().len(), 1);
        assert_eq!(
            ctx.document.unwrap().sections.get("Action Items").unwrap(),
            &vec!["(2024-03-17) alpha bravo charlie foxtrot golf".to_string()]
        );
    }

    #[tokio::test]
    async fn resumes_after_last_processed_page() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(["action: ADD, topic: review, section: Action Items"]);
        let mut ctx = context(client.clone(), dir.path());
        ctx.extractions = vec![
            page(1, &[("2024-03-15", "Outage began")]),
            page(2, &[("2024-03-20", "Review scheduled with leadership")]),
        ];
        ctx.last_processed_page = 1;

        IntegrateStage.execute(&mut ctx).await.unwrap();

        assert_eq!(client.prompts().len(), 1);
        assert!(client.prompts()[0].contains("Review scheduled"));
        let doc = ctx.document.unwrap();
        assert_eq!(doc.sections.get("Action Items").unwrap().len(), 1);
        assert!(doc.sections.get("Timeline").unwrap().is_empty());
    }

    #[tokio::test]
    async fn compresses_inline_when_over_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new([
            "action: ADD, topic: outage, section: Timeline",
            "action: ADD, topic: escalation, section: Timeline",
            "action: ADD, topic: resolution, section: Timeline",
            "- 2024-03-15, 2024-03-16, 2024-03-17: database outage in region east",
        ]);
        let mut ctx = context(client.clone(), dir.path());
        ctx.max_words = 20;
        ctx.extractions = vec![
            page(1, &[("2024-03-15", "Database outage began in region east")]),
            page(2, &[("2024-03-16", "Database outage escalated to vendor support in region east")]),
            page(3, &[("2024-03-17", "Database outage resolved after failover in region east")]),
        ];

        IntegrateStage.execute(&mut ctx).await.unwrap();

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[3].starts_with("Merge these related report items"));
        let doc = ctx.document.unwrap();
        assert_eq!(
            doc.sections.get("Timeline").unwrap(),
            &vec!["2024-03-15, 2024-03-16, 2024-03-17: database outage in region east".to_string()]
        );
        assert!(doc.current_word_count() <= 20);
    }
}

//! Finalize stage: one bounded synthesis call over every page extraction.
//!
//! ```text
//! extractions ─▶ Buckets::consolidate ─▶ prompt ─(over budget?)─▶ truncate
//!                                            │
//!                                            ▼
//!                                    text model ─▶ clean_report ─▶ final_report
//!                                            │ (error)
//!                                            ▼
//!                                    Buckets::fallback_report
//! ```
//!
//! ## Truncation priority
//!
//! Critical content is always sent whole, even when it alone overflows the
//! budget. High-priority content keeps its full text while it fits in 60% of
//! the content allowance and is otherwise clipped to 30% of what critical
//! content left over. Tables and visuals split half of the rest evenly, and
//! supporting items absorb the remainder.

use super::postprocess::clean_report;
use super::{PipelineContext, Stage};
use crate::budget::TokenBudget;
use crate::error::ReportError;
use crate::extraction::{ExtractedEvent, PageExtraction, TableData, VisualData, CRITICAL, HIGH};
use crate::prompts::{finalize_prompt, FinalizeBlocks};
use crate::text::{truncate_chars, word_count};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, warn};

/// Supporting items sent in the prompt.
const MEDIUM_PROMPT_CAP: usize = 20;
/// Supporting items listed in the fallback report.
const MEDIUM_FALLBACK_CAP: usize = 15;
/// Characters of lowercased text used as a dedup signature.
const SIGNATURE_CHARS: usize = 50;

const TRUNCATION_MARKER: &str = "- ... (truncated)";
const FALLBACK_NOTE: &str =
    "Note: This is a raw extraction. The LLM synthesis step was unable to complete.";

/// Synthesises `final_report` from `extractions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeStage;

#[async_trait]
impl Stage for FinalizeStage {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn should_skip(&self, ctx: &PipelineContext) -> bool {
        ctx.extractions.is_empty()
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ReportError> {
        let buckets = Buckets::consolidate(&ctx.extractions);
        info!(
            "Consolidated {} pages: critical {}, high {}, medium {}, tables {}, visuals {}",
            ctx.extractions.len(),
            buckets.critical.len(),
            buckets.high.len(),
            buckets.medium.len(),
            buckets.tables.len(),
            buckets.visuals.len()
        );

        let budget = ctx.config.token_budget;
        let prompt = build_bounded_prompt(&buckets, &ctx.preferences, ctx.max_words, &budget);

        let report = match ctx.clients.text.chat(&prompt, &[], false).await {
            Ok(response) => clean_report(&response),
            Err(e) => {
                warn!("Error generating report: {e}; using fallback");
                buckets.fallback_report()
            }
        };
        info!("Generated report: {} words", word_count(&report));
        ctx.final_report = Some(report);
        Ok(())
    }
}

// ── Buckets ──────────────────────────────────────────────────────────────

/// Extraction content grouped by importance, ready for the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buckets {
    pub critical: Vec<String>,
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub tables: Vec<String>,
    pub visuals: Vec<String>,
}

impl Buckets {
    /// Sort every page's events, facts, tables and visuals into buckets.
    ///
    /// Events and facts are deduplicated by signature, each kind against
    /// itself. Tables and visuals without enough to describe are dropped.
    pub fn consolidate(extractions: &[PageExtraction]) -> Self {
        let mut buckets = Self::default();
        let mut seen_events = HashSet::new();
        let mut seen_facts = HashSet::new();

        for page in extractions {
            for event in &page.events {
                if event.summary.is_empty() || !seen_events.insert(signature(&event.summary)) {
                    continue;
                }
                buckets.push(event.importance, format_event(event));
            }
            buckets
                .tables
                .extend(page.tables.iter().filter_map(format_table));
            buckets
                .visuals
                .extend(page.visuals.iter().filter_map(format_visual));
            for fact in &page.facts {
                if fact.text.is_empty() || !seen_facts.insert(signature(&fact.text)) {
                    continue;
                }
                buckets.push(fact.importance, fact.text.clone());
            }
        }
        buckets
    }

    fn push(&mut self, importance: u8, item: String) {
        match importance {
            i if i >= CRITICAL => self.critical.push(item),
            i if i >= HIGH => self.high.push(item),
            _ => self.medium.push(item),
        }
    }

    fn medium_for_prompt(&self) -> &[String] {
        &self.medium[..self.medium.len().min(MEDIUM_PROMPT_CAP)]
    }

    /// Deterministic report built straight from the buckets.
    pub fn fallback_report(&self) -> String {
        let mut lines = vec!["# Report\n".to_string()];
        let medium = &self.medium[..self.medium.len().min(MEDIUM_FALLBACK_CAP)];
        let sections: [(&str, &[String]); 5] = [
            ("Critical Information", self.critical.as_slice()),
            ("Key Details", self.high.as_slice()),
            ("Tables", self.tables.as_slice()),
            ("Visual Content", self.visuals.as_slice()),
            ("Supporting Information", medium),
        ];
        for (title, items) in sections {
            if items.is_empty() {
                continue;
            }
            lines.push(format!("## {title}\n"));
            lines.push(format_list(items));
            lines.push(String::new());
        }
        lines.push("---".to_string());
        lines.push(FALLBACK_NOTE.to_string());
        lines.join("\n")
    }
}

fn signature(text: &str) -> String {
    truncate_chars(&text.to_lowercase(), SIGNATURE_CHARS).to_string()
}

/// `[date] summary (actors)` with at most three actors.
pub fn format_event(event: &ExtractedEvent) -> String {
    let date = match event.date.as_deref() {
        Some(d) if !d.is_empty() => format!("[{d}] "),
        _ => String::new(),
    };
    let actors = if event.actors.is_empty() {
        String::new()
    } else {
        let shown: Vec<&str> = event.actors.iter().take(3).map(String::as_str).collect();
        format!(" ({})", shown.join(", "))
    };
    format!("{date}{}{actors}", event.summary)
}

/// One-line table description, or `None` with neither summary nor headers.
pub fn format_table(table: &TableData) -> Option<String> {
    if table.summary.is_empty() && table.headers.is_empty() {
        return None;
    }
    let headers = if table.headers.is_empty() {
        "data".to_string()
    } else {
        let shown: Vec<&str> = table.headers.iter().take(5).map(String::as_str).collect();
        shown.join(", ")
    };

    if !table.summary.is_empty() {
        return Some(format!(
            "Table ({headers}, {} rows): {}",
            table.rows.len(),
            table.summary
        ));
    }
    match table.rows.first().filter(|row| !row.is_empty()) {
        Some(row) => {
            let sample: Vec<&str> = row.iter().take(3).map(|c| truncate_chars(c, 20)).collect();
            Some(format!("Table ({headers}): Sample data: {}...", sample.join(", ")))
        }
        None => Some(format!("Table with columns: {headers}")),
    }
}

/// `Type: description - Trend: t Key values: …`, or `None` without a
/// description.
pub fn format_visual(visual: &VisualData) -> Option<String> {
    if visual.description.is_empty() {
        return None;
    }
    let trend = if visual.trend.is_empty() || visual.trend == "n/a" {
        String::new()
    } else {
        format!(" - Trend: {}", visual.trend)
    };
    let values = if visual.data_points.is_empty() {
        String::new()
    } else {
        let shown: Vec<&str> = visual.data_points.iter().take(5).map(String::as_str).collect();
        format!(" Key values: {}", shown.join(", "))
    };
    Some(format!(
        "{}: {}{trend}{values}",
        title_case(&visual.visual_type),
        visual.description
    ))
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

// ── Prompt assembly ──────────────────────────────────────────────────────

/// `- item` per line; empty items are skipped.
fn format_list(items: &[String]) -> String {
    items
        .iter()
        .filter(|i| !i.is_empty())
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// As many leading items as fit in `max_chars`, with a marker when the list
/// was clipped after at least one item.
fn truncate_items(items: &[String], max_chars: usize) -> String {
    let mut lines = Vec::new();
    let mut total = 0;
    for item in items {
        let line = format!("- {item}");
        if total + line.len() > max_chars {
            if !lines.is_empty() {
                lines.push(TRUNCATION_MARKER.to_string());
            }
            break;
        }
        total += line.len() + 1;
        lines.push(line);
    }
    lines.join("\n")
}

/// The synthesis prompt with every bucket in full (supporting items capped).
pub fn build_prompt(buckets: &Buckets, preferences: &str, target_words: usize) -> String {
    let critical = format_list(&buckets.critical);
    let high = format_list(&buckets.high);
    let tables = format_list(&buckets.tables);
    let visuals = format_list(&buckets.visuals);
    let medium = format_list(buckets.medium_for_prompt());
    finalize_prompt(
        FinalizeBlocks {
            critical: &critical,
            high: &high,
            tables: &tables,
            visuals: &visuals,
            medium: &medium,
        },
        preferences,
        target_words,
    )
}

/// [`build_prompt`], falling back to [`truncate_to_budget`] when the
/// estimate exceeds the total budget.
pub fn build_bounded_prompt(
    buckets: &Buckets,
    preferences: &str,
    target_words: usize,
    budget: &TokenBudget,
) -> String {
    let prompt = build_prompt(buckets, preferences, target_words);
    let estimate = budget.estimate(&prompt);
    info!("Prompt size: ~{estimate} tokens");
    if estimate <= budget.total {
        return prompt;
    }
    warn!("Prompt exceeds budget ({} tokens), truncating content", budget.total);
    truncate_to_budget(buckets, preferences, target_words, budget)
}

/// Rebuild the prompt so the non-critical buckets fit the content budget.
pub fn truncate_to_budget(
    buckets: &Buckets,
    preferences: &str,
    target_words: usize,
    budget: &TokenBudget,
) -> String {
    let overhead = budget.estimate(&finalize_prompt(
        FinalizeBlocks::default(),
        preferences,
        target_words,
    ));
    let available = budget.chars_for(budget.content.saturating_sub(overhead));
    let share = |fraction: f64| (available as f64 * fraction) as usize;

    let critical = format_list(&buckets.critical);
    let mut used = critical.len();

    let mut high = format_list(&buckets.high);
    if used + high.len() >= share(0.6) {
        let allowance = available.saturating_sub(used) as f64 * 0.3;
        high = truncate_items(&buckets.high, allowance as usize);
    }
    used += high.len();

    let mut tables = format_list(&buckets.tables);
    let mut visuals = format_list(&buckets.visuals);
    if used + tables.len() + visuals.len() >= share(0.8) {
        let each = available.saturating_sub(used) / 2 / 2;
        tables = truncate_items(&buckets.tables, each);
        visuals = truncate_items(&buckets.visuals, each);
    }
    used += tables.len() + visuals.len();

    let remaining = available.saturating_sub(used);
    let medium = truncate_items(
        buckets.medium_for_prompt(),
        (remaining as f64 * 0.8) as usize,
    );

    finalize_prompt(
        FinalizeBlocks {
            critical: &critical,
            high: &high,
            tables: &tables,
            visuals: &visuals,
            medium: &medium,
        },
        preferences,
        target_words,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{Fact, SUPPORTING};
    use crate::llm::testing::ScriptedClient;
    use crate::pipeline::testing::context;
    use crate::prompts::DEFAULT_PREFERENCES;

    fn event(date: Option<&str>, summary: &str, importance: u8) -> ExtractedEvent {
        ExtractedEvent {
            date: date.map(str::to_string),
            summary: summary.to_string(),
            actors: vec!["Alice".into(), "Bob".into(), "Carol".into(), "Dave".into()],
            importance,
            ..Default::default()
        }
    }

    fn page(index: usize) -> PageExtraction {
        PageExtraction::empty(index, format!("doc_001_page_{index:03}"))
    }

    #[test]
    fn formats_events_tables_and_visuals() {
        assert_eq!(
            format_event(&event(Some("2024-03-15"), "Outage began", CRITICAL)),
            "[2024-03-15] Outage began (Alice, Bob, Carol)"
        );

        let summarised = TableData {
            headers: vec!["Region".into(), "Errors".into()],
            rows: vec![vec!["east".into(), "42".into()]],
            summary: "Errors by region".into(),
            importance: HIGH,
        };
        assert_eq!(
            format_table(&summarised).unwrap(),
            "Table (Region, Errors, 1 rows): Errors by region"
        );
        let sampled = TableData {
            summary: String::new(),
            rows: vec![vec!["a-very-long-cell-value-beyond-twenty".into(), "2".into()]],
            ..summarised.clone()
        };
        assert_eq!(
            format_table(&sampled).unwrap(),
            "Table (Region, Errors): Sample data: a-very-long-cell-val, 2..."
        );
        let bare = TableData {
            headers: vec![],
            summary: String::new(),
            rows: vec![],
            importance: HIGH,
        };
        assert_eq!(format_table(&bare), None);

        let chart = VisualData {
            visual_type: "line chart".into(),
            description: "Error rate".into(),
            data_points: vec!["5%".into(), "40%".into()],
            trend: "increasing".into(),
            importance: HIGH,
        };
        assert_eq!(
            format_visual(&chart).unwrap(),
            "Line Chart: Error rate - Trend: increasing Key values: 5%, 40%"
        );
        let flat = VisualData {
            trend: "n/a".into(),
            data_points: vec![],
            ..chart
        };
        assert_eq!(format_visual(&flat).unwrap(), "Line Chart: Error rate");
    }

    #[test]
    fn consolidation_buckets_by_importance_and_dedups() {
        let mut p1 = page(1);
        p1.events = vec![
            event(Some("2024-03-15"), "Outage began", CRITICAL),
            event(None, "Status page updated", HIGH),
        ];
        p1.facts = vec![Fact {
            text: "Three regions affected".into(),
            importance: SUPPORTING,
        }];
        let mut p2 = page(2);
        p2.events = vec![event(Some("2024-03-15"), "OUTAGE BEGAN", CRITICAL)];
        p2.facts = vec![Fact {
            text: "three regions affected".into(),
            importance: CRITICAL,
        }];

        let b = Buckets::consolidate(&[p1, p2]);
        assert_eq!(b.critical, vec!["[2024-03-15] Outage began (Alice, Bob, Carol)"]);
        assert_eq!(b.high.len(), 1);
        assert_eq!(b.medium, vec!["Three regions affected"]);
    }

    #[test]
    fn medium_is_capped_in_prompt() {
        let b = Buckets {
            medium: (0..30).map(|i| format!("supporting item {i}")).collect(),
            ..Default::default()
        };
        let prompt = build_prompt(&b, DEFAULT_PREFERENCES, 900);
        assert!(prompt.contains("- supporting item 19"));
        assert!(!prompt.contains("- supporting item 20"));
        assert!(prompt.contains("CRITICAL (preserve exactly):\n(none)"));
    }

    #[test]
    fn truncate_items_marks_clipped_lists() {
        let items: Vec<String> = (0..5).map(|i| format!("item {i}")).collect();
        assert_eq!(truncate_items(&items, 14), "- item 0\n- ... (truncated)");
        assert_eq!(truncate_items(&items, 3), "");
        assert_eq!(truncate_items(&items, 1000), format_list(&items));
    }

    #[test]
    fn critical_content_survives_any_overflow() {
        let critical: Vec<String> = (0..300)
            .map(|i| format!("[2024-03-{:02}] critical finding number {i} with enough text to weigh on the budget", i % 28 + 1))
            .collect();
        let b = Buckets {
            critical: critical.clone(),
            high: (0..50).map(|i| format!("high item {i}")).collect(),
            medium: (0..50).map(|i| format!("medium item {i}")).collect(),
            ..Default::default()
        };
        let budget = TokenBudget::default();
        assert!(budget.estimate(&build_prompt(&b, DEFAULT_PREFERENCES, 900)) > budget.total);

        let prompt = build_bounded_prompt(&b, DEFAULT_PREFERENCES, 900, &budget);
        for item in &critical {
            assert!(prompt.contains(item.as_str()), "missing critical item: {item}");
        }
        // Nothing else fits once critical content has used the allowance.
        assert!(prompt.contains("HIGH PRIORITY:\n(none)"));
        assert!(prompt.contains("SUPPORTING:\n(none)"));
    }

    #[test]
    fn high_priority_is_clipped_before_supporting_is_dropped() {
        let b = Buckets {
            high: (0..400)
                .map(|i| format!("high priority observation {i} about the incident"))
                .collect(),
            medium: vec!["short supporting note".into()],
            ..Default::default()
        };
        let budget = TokenBudget::default();
        let prompt = truncate_to_budget(&b, DEFAULT_PREFERENCES, 900, &budget);
        assert!(prompt.contains("- high priority observation 0 about the incident"));
        assert!(prompt.contains(TRUNCATION_MARKER));
        assert!(prompt.contains("- short supporting note"));
        assert!(budget.estimate(&prompt) <= budget.total);
    }

    #[test]
    fn fallback_report_lists_non_empty_buckets() {
        let b = Buckets {
            critical: vec!["[2024-03-15] Outage began".into()],
            visuals: vec!["Chart: errors".into()],
            medium: (0..20).map(|i| format!("note {i}")).collect(),
            ..Default::default()
        };
        let report = b.fallback_report();
        assert!(report.starts_with("# Report\n\n## Critical Information\n\n- [2024-03-15] Outage began"));
        assert!(report.contains("## Visual Content"));
        assert!(!report.contains("## Key Details"));
        assert!(report.contains("- note 14"));
        assert!(!report.contains("- note 15"));
        assert!(report.ends_with(FALLBACK_NOTE));
    }

    #[tokio::test]
    async fn stage_writes_cleaned_report() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(["```markdown\n# Incident Report\n\nThe outage began on 2024-03-15.\n```"]);
        let mut ctx = context(client.clone(), dir.path());
        let mut p = page(1);
        p.events = vec![event(Some("2024-03-15"), "Outage began", CRITICAL)];
        ctx.extractions = vec![p];

        assert!(!FinalizeStage.should_skip(&ctx));
        FinalizeStage.execute(&mut ctx).await.unwrap();

        let report = ctx.final_report.unwrap();
        assert!(report.starts_with("# Incident Report"));
        assert!(!report.contains("```"));
        assert!(client.prompts()[0].contains("- [2024-03-15] Outage began (Alice, Bob, Carol)"));
    }

    #[tokio::test]
    async fn stage_falls_back_when_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(ScriptedClient::failing(), dir.path());
        let mut p = page(1);
        p.events = vec![event(None, "Outage began", HIGH)];
        ctx.extractions = vec![p];

        FinalizeStage.execute(&mut ctx).await.unwrap();

        let report = ctx.final_report.unwrap();
        assert!(report.contains("## Key Details\n\n- Outage began (Alice, Bob, Carol)"));
        assert!(report.ends_with(FALLBACK_NOTE));
    }

    #[test]
    fn skipped_without_extractions() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(ScriptedClient::failing(), dir.path());
        assert!(FinalizeStage.should_skip(&ctx));
    }
}

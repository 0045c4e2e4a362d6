//! Compression: bring a [`LiveDocument`] back under its word budget without
//! losing protected dates and names.
//!
//! ## Strategy ladder
//!
//! ```text
//! Consolidate ──(still over?)──▶ ScoredReduction
//!  group similar items
//!  merge each group via the model
//!  verify tracked dates survived
//! ```
//!
//! The first rung always runs; every later rung runs only while the document
//! is still over `max_words`. Adding a rung means adding a [`Strategy`]
//! variant and listing it in [`LADDER`].
//!
//! ## Failure semantics
//!
//! A failed or empty merge keeps the group's original items. A merge that
//! comes back longer than its input is discarded. Dates that a merge drops
//! are restored by re-adding the source item as `[Restored] …`; tracked dates
//! missing from the whole document afterwards get a `[Key dates: …]` note.
//! Scored reduction never removes an item carrying a protected term.

use super::postprocess::parse_list_response;
use super::{PipelineContext, Stage};
use crate::budget::TokenBudget;
use crate::config::CompressionConfig;
use crate::dates::DateNormalizer;
use crate::document::LiveDocument;
use crate::error::ReportError;
use crate::events::keywords;
use crate::llm::ChatClient;
use crate::prompts::{consolidation_prompt, protected_terms_block};
use crate::text::{contains_bounded, truncate_chars, word_count};
use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sections need at least this many items to be consolidated.
const MIN_ITEMS_TO_GROUP: usize = 3;
/// Shared significant words that make two items similar.
const SHARED_WORDS: usize = 3;
/// Relaxed threshold when either item is short.
const SHARED_WORDS_SHORT: usize = 2;
/// Items under this many words count as short.
const SHORT_ITEM_WORDS: usize = 10;

/// Score per protected date an item mentions.
const DATE_SCORE: u32 = 10;
/// Score per protected entity an item mentions.
const ENTITY_SCORE: u32 = 5;
/// Items scoring at or above this are never dropped.
const PROTECTED_SCORE: u32 = 5;

/// One rung of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Merge similar items with the model, then verify tracked dates.
    Consolidate,
    /// Drop the lowest-value unprotected items.
    ScoredReduction,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Consolidate => write!(f, "consolidate"),
            Strategy::ScoredReduction => write!(f, "scored-reduction"),
        }
    }
}

/// Rungs in escalation order.
pub const LADDER: [Strategy; 2] = [Strategy::Consolidate, Strategy::ScoredReduction];

/// What a compression pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionReport {
    pub words_before: usize,
    pub words_after: usize,
    pub strategies: Vec<Strategy>,
    /// Model merges that were accepted.
    pub groups_merged: usize,
    /// Items re-added because a merge dropped their date.
    pub items_restored: usize,
    /// Tracked dates listed in a `[Key dates: …]` note.
    pub dates_noted: usize,
    pub items_dropped: usize,
}

/// Runs the ladder against one document.
pub struct Compressor<'a> {
    client: &'a dyn ChatClient,
    config: CompressionConfig,
    budget: TokenBudget,
    normalizer: DateNormalizer,
}

impl fmt::Debug for Compressor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("client", &self.client.model())
            .field("config", &self.config)
            .field("budget", &self.budget)
            .finish()
    }
}

impl<'a> Compressor<'a> {
    pub fn new(
        client: &'a dyn ChatClient,
        config: CompressionConfig,
        budget: TokenBudget,
        normalizer: DateNormalizer,
    ) -> Self {
        Self {
            client,
            config,
            budget,
            normalizer,
        }
    }

    /// Whether the document is over its hard budget.
    pub fn over_budget(doc: &LiveDocument) -> bool {
        doc.current_word_count() > doc.max_words
    }

    /// Climb the ladder until the document fits or the rungs run out.
    pub async fn compress(&self, doc: &mut LiveDocument) -> CompressionReport {
        let mut report = CompressionReport {
            words_before: doc.current_word_count(),
            ..Default::default()
        };
        info!(
            "Compressing... (current: {} words, target: {})",
            report.words_before, doc.max_words
        );

        for (rung, strategy) in LADDER.iter().enumerate() {
            if rung > 0 && !Self::over_budget(doc) {
                break;
            }
            match strategy {
                Strategy::Consolidate => {
                    self.consolidate(doc, &mut report).await;
                    report.dates_noted = self.verify_protected_dates(doc);
                }
                Strategy::ScoredReduction => {
                    report.items_dropped = self.scored_reduction(doc);
                }
            }
            report.strategies.push(*strategy);
            debug!("After {strategy}: {} words", doc.current_word_count());
        }

        report.words_after = doc.current_word_count();
        if Self::over_budget(doc) {
            warn!(
                "Could not reduce below word limit. Final: {} words (limit {})",
                report.words_after, doc.max_words
            );
        } else {
            info!("After compression: {} words", report.words_after);
        }
        report
    }

    // ── Rung 1: grouping + consolidation ─────────────────────────────────

    async fn consolidate(&self, doc: &mut LiveDocument, report: &mut CompressionReport) {
        let names: Vec<String> = doc.sections.names().map(str::to_string).collect();
        for name in names {
            let Some(items) = doc.sections.get(&name).cloned() else {
                continue;
            };
            if items.len() < MIN_ITEMS_TO_GROUP {
                continue;
            }

            let mut rebuilt = Vec::with_capacity(items.len());
            for group in group_similar(&items, self.config.group_cap) {
                let members: Vec<String> = group.iter().map(|&i| items[i].clone()).collect();
                if members.len() == 1 {
                    rebuilt.extend(members);
                    continue;
                }
                let merged = self
                    .merge_group(&members, &doc.tracked_dates, &doc.tracked_entities, report)
                    .await;
                rebuilt.extend(merged);
            }

            if rebuilt.len() < items.len() {
                info!("  {name}: {} → {} items", items.len(), rebuilt.len());
            }
            if let Some(slot) = doc.sections.get_mut(&name) {
                *slot = rebuilt;
            }
        }
    }

    /// Merge one group, bisecting anything whose prompt is over budget.
    ///
    /// Sub-groups are processed in order, so the output keeps the input's
    /// ordering.
    async fn merge_group(
        &self,
        members: &[String],
        tracked_dates: &BTreeSet<String>,
        tracked_entities: &BTreeSet<String>,
        report: &mut CompressionReport,
    ) -> Vec<String> {
        let limit = self.budget.content.min(self.config.max_prompt_tokens);
        let mut pending: VecDeque<Vec<String>> = VecDeque::from([members.to_vec()]);
        let mut out = Vec::new();

        while let Some(group) = pending.pop_front() {
            if group.len() < 2 {
                out.extend(group);
                continue;
            }

            let dates = self.dates_in(&group, tracked_dates);
            let names: Vec<String> = tracked_entities
                .iter()
                .filter(|e| group.iter().any(|item| contains_bounded(item, e)))
                .cloned()
                .collect();
            let prompt = consolidation_prompt(
                &group,
                &protected_terms_block(&dates, &names),
                &self.distinct_dates(&group),
                self.config.min_words_per_item,
            );

            let estimate = self.budget.estimate(&prompt);
            if estimate > limit {
                debug!("Group of {} is ~{estimate} tokens; bisecting", group.len());
                let right = group[group.len() / 2..].to_vec();
                let left = group[..group.len() / 2].to_vec();
                pending.push_front(right);
                pending.push_front(left);
                continue;
            }

            out.extend(self.merge_once(&group, &prompt, &dates, report).await);
        }
        out
    }

    async fn merge_once(
        &self,
        group: &[String],
        prompt: &str,
        dates: &[String],
        report: &mut CompressionReport,
    ) -> Vec<String> {
        let response = match self.client.chat(prompt, &[], false).await {
            Ok(response) => response,
            Err(e) => {
                warn!("    Consolidation failed: {e}; keeping {} items", group.len());
                return group.to_vec();
            }
        };

        let min_words = self.config.min_words_per_item;
        let (mut merged, short): (Vec<String>, Vec<String>) = parse_list_response(&response, 0)
            .into_iter()
            .partition(|item| word_count(item) >= min_words);
        if !short.is_empty() {
            // Dates they carried are caught by the restore pass below.
            debug!(
                "    Dropped {} merged items under {min_words} words: {:?}",
                short.len(),
                short
            );
        }
        if merged.is_empty() {
            warn!("    Consolidation returned no usable items; keeping originals");
            return group.to_vec();
        }
        let before: usize = group.iter().map(|i| word_count(i)).sum();
        let after: usize = merged.iter().map(|i| word_count(i)).sum();
        if after > before {
            debug!("    Merge grew {before} → {after} words; keeping originals");
            return group.to_vec();
        }
        report.groups_merged += 1;

        let merged_text = merged.join("\n");
        let mut restored: Vec<&String> = Vec::new();
        for date in dates {
            if self.normalizer.date_mentioned(&merged_text, date) {
                continue;
            }
            if let Some(source) = group
                .iter()
                .find(|item| self.normalizer.date_mentioned(item, date))
            {
                if !restored.contains(&source) {
                    info!("    Restoring item for missing date: {date}");
                    restored.push(source);
                }
            }
        }
        report.items_restored += restored.len();
        merged.extend(restored.into_iter().map(|item| format!("[Restored] {item}")));
        merged
    }

    /// Tracked dates mentioned anywhere in `group`.
    fn dates_in(&self, group: &[String], tracked_dates: &BTreeSet<String>) -> Vec<String> {
        tracked_dates
            .iter()
            .filter(|d| group.iter().any(|item| self.normalizer.date_mentioned(item, d)))
            .cloned()
            .collect()
    }

    /// Distinct normalized dates written in `group`, in reading order.
    fn distinct_dates(&self, group: &[String]) -> Vec<String> {
        let mut seen = Vec::new();
        for item in group {
            for date in self.normalizer.extract_all_dates(item) {
                if !seen.contains(&date.normalized) {
                    seen.push(date.normalized);
                }
            }
        }
        seen
    }

    // ── Protected-term verification ──────────────────────────────────────

    /// Append a `[Key dates: …]` note listing tracked dates no longer found
    /// in the document. Returns how many were listed.
    fn verify_protected_dates(&self, doc: &mut LiveDocument) -> usize {
        let text = doc.full_text();
        let missing: Vec<String> = doc
            .tracked_dates
            .iter()
            .filter(|d| !self.normalizer.date_mentioned(&text, d))
            .cloned()
            .collect();
        if missing.is_empty() {
            return 0;
        }

        let target = doc
            .sections
            .iter()
            .find(|(_, items)| !items.is_empty())
            .or_else(|| doc.sections.iter().next())
            .map(|(name, _)| name.to_string());
        let Some(target) = target else {
            return 0;
        };

        warn!("    {} tracked dates lost; noting them in {target}", missing.len());
        doc.add_content(&target, format!("[Key dates: {}]", missing.join(", ")));
        missing.len()
    }

    // ── Rung 2: scored reduction ─────────────────────────────────────────

    /// Protection score of one item.
    pub fn score_item(&self, item: &str, doc: &LiveDocument) -> u32 {
        let dates = doc
            .tracked_dates
            .iter()
            .filter(|d| self.normalizer.date_mentioned(item, d))
            .count() as u32;
        let entities = doc
            .tracked_entities
            .iter()
            .filter(|e| contains_bounded(item, e))
            .count() as u32;
        dates * DATE_SCORE + entities * ENTITY_SCORE
    }

    /// Drop unprotected items, lowest score first, until the excess is
    /// covered. At most half of a section goes per pass. Returns the number
    /// of items dropped.
    fn scored_reduction(&self, doc: &mut LiveDocument) -> usize {
        let excess = doc.current_word_count().saturating_sub(doc.max_words);
        if excess == 0 {
            return 0;
        }

        let mut removed_words = 0;
        let mut dropped = 0;
        let names: Vec<String> = doc.sections.names().map(str::to_string).collect();

        for name in names {
            if removed_words >= excess {
                break;
            }
            let Some(items) = doc.sections.get(&name) else {
                continue;
            };
            if items.len() <= 2 {
                continue;
            }

            let mut candidates: Vec<(u32, usize)> = items
                .iter()
                .enumerate()
                .map(|(idx, item)| (self.score_item(item, doc), idx))
                .filter(|(score, _)| *score < PROTECTED_SCORE)
                .collect();
            candidates.sort();

            let cap = items.len() / 2;
            let mut to_remove = Vec::new();
            for (_, idx) in candidates.into_iter().take(cap) {
                if removed_words >= excess {
                    break;
                }
                removed_words += word_count(&items[idx]);
                to_remove.push(idx);
            }

            if let Some(items) = doc.sections.get_mut(&name) {
                to_remove.sort_unstable_by(|a, b| b.cmp(a));
                for idx in to_remove {
                    let gone = items.remove(idx);
                    debug!("    Dropped from {name}: {}", truncate_chars(&gone, 50));
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

/// Greedy similarity groups over item indices, each capped at `cap`.
///
/// Every group is seeded by its lowest unassigned index; later items join
/// when they share enough significant words with the seed.
pub fn group_similar(items: &[String], cap: usize) -> Vec<Vec<usize>> {
    let terms: Vec<BTreeSet<String>> = items.iter().map(|i| keywords(i)).collect();
    let words: Vec<usize> = items.iter().map(|i| word_count(i)).collect();
    let mut assigned = vec![false; items.len()];
    let mut groups = Vec::new();

    for seed in 0..items.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut group = vec![seed];

        for other in seed + 1..items.len() {
            if group.len() >= cap.max(1) {
                break;
            }
            if assigned[other] {
                continue;
            }
            let shared = terms[seed].intersection(&terms[other]).count();
            let needed = if words[seed] < SHORT_ITEM_WORDS || words[other] < SHORT_ITEM_WORDS {
                SHARED_WORDS_SHORT
            } else {
                SHARED_WORDS
            };
            if shared >= needed {
                assigned[other] = true;
                group.push(other);
            }
        }
        groups.push(group);
    }
    groups
}

/// Run the ladder over the context's document with the text client.
pub async fn compress_document(ctx: &mut PipelineContext) -> Option<CompressionReport> {
    let client = Arc::clone(&ctx.clients.text);
    let compressor = Compressor::new(
        client.as_ref(),
        ctx.config.compression,
        ctx.config.token_budget,
        ctx.normalizer(),
    );
    let doc = ctx.document.as_mut()?;
    Some(compressor.compress(doc).await)
}

/// Standalone compression stage; skipped unless the document has crossed
/// the compression threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressStage;

#[async_trait]
impl Stage for CompressStage {
    fn name(&self) -> &'static str {
        "compress"
    }

    fn should_skip(&self, ctx: &PipelineContext) -> bool {
        ctx.document
            .as_ref()
            .is_none_or(|d| !d.needs_compression(ctx.config.compression_threshold))
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ReportError> {
        compress_document(ctx).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::format::FormatSpec;
    use crate::llm::testing::ScriptedClient;

    fn doc(max_words: usize) -> LiveDocument {
        LiveDocument::new(FormatSpec::with_defaults(max_words), max_words)
    }

    fn compressor(client: &dyn ChatClient) -> Compressor<'_> {
        Compressor::new(
            client,
            CompressionConfig {
                min_words_per_item: 3,
                ..Default::default()
            },
            TokenBudget::default(),
            DateNormalizer::new(Some(2024)),
        )
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn groups_items_sharing_significant_words() {
        let items = strings(&[
            "Payment gateway outage blocked checkout traffic",
            "Quarterly hiring plan approved",
            "Checkout traffic recovered after gateway outage fix",
            "Office move scheduled",
        ]);
        let groups = group_similar(&items, 5);
        assert_eq!(groups, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn group_size_is_capped() {
        let items: Vec<String> = (0..7)
            .map(|i| format!("database replica lag alert number {i}"))
            .collect();
        let groups = group_similar(&items, 5);
        assert_eq!(groups[0].len(), 5);
        assert_eq!(groups[1], vec![5, 6]);
    }

    #[tokio::test]
    async fn consolidation_merges_group_and_keeps_order() {
        let client = ScriptedClient::new([
            "- Payment gateway outage blocked checkout until the fix restored traffic",
        ]);
        let mut d = doc(1000);
        for item in [
            "Payment gateway outage blocked checkout traffic for many users",
            "Quarterly hiring plan approved",
            "Checkout traffic recovered after gateway outage fix was deployed",
        ] {
            d.add_content("Timeline", item);
        }

        let report = compressor(client.as_ref()).compress(&mut d).await;

        let items = d.sections.get("Timeline").unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].starts_with("Payment gateway outage blocked checkout until"));
        assert_eq!(items[1], "Quarterly hiring plan approved");
        assert_eq!(report.groups_merged, 1);
        assert_eq!(report.strategies, vec![Strategy::Consolidate]);
        assert!(report.words_after <= report.words_before);
    }

    #[tokio::test]
    async fn chronology_warning_and_protected_terms_reach_the_prompt() {
        let client = ScriptedClient::new(["- merged text about the outage timeline here"]);
        let mut d = doc(1000);
        d.tracked_dates.insert("2024-03-15".into());
        d.tracked_entities.insert("Alice".into());
        for item in [
            "(2024-03-15) Database outage began in region east, Alice paged",
            "(2024-03-16) Database outage resolved in region east",
            "Unrelated budget note",
        ] {
            d.add_content("Timeline", item);
        }

        compressor(client.as_ref()).compress(&mut d).await;

        let prompt = &client.prompts()[0];
        assert!(prompt.contains("DATES (keep exactly): 2024-03-15"));
        assert!(prompt.contains("NAMES (keep exactly): Alice"));
        assert!(prompt.contains("chronological sequence (2024-03-15, 2024-03-16)"));
    }

    #[tokio::test]
    async fn dropped_date_restores_source_item() {
        let client = ScriptedClient::new(["- Database outage in region east was resolved"]);
        let mut d = doc(1000);
        d.tracked_dates.insert("2024-03-15".into());
        for item in [
            "(2024-03-15) Database outage began in region east",
            "Database outage in region east resolved by the on-call team",
            "Unrelated budget note",
        ] {
            d.add_content("Timeline", item);
        }

        let report = compressor(client.as_ref()).compress(&mut d).await;

        let items = d.sections.get("Timeline").unwrap();
        assert!(items
            .iter()
            .any(|i| i == "[Restored] (2024-03-15) Database outage began in region east"));
        assert_eq!(report.items_restored, 1);
        assert_eq!(report.dates_noted, 0);
    }

    #[tokio::test]
    async fn short_merged_item_is_dropped_and_its_date_restored() {
        let client = ScriptedClient::new([
            "- Database outage in region east was resolved by the team\n- 2024-03-15 outage",
        ]);
        let mut d = doc(1000);
        d.tracked_dates.insert("2024-03-15".into());
        for item in [
            "(2024-03-15) Database outage began in region east",
            "Database outage in region east resolved by the on-call team",
            "Unrelated budget note",
        ] {
            d.add_content("Timeline", item);
        }

        let report = compressor(client.as_ref()).compress(&mut d).await;

        let items = d.sections.get("Timeline").unwrap();
        assert!(!items.iter().any(|i| i == "2024-03-15 outage"));
        assert!(items
            .iter()
            .any(|i| i == "[Restored] (2024-03-15) Database outage began in region east"));
        assert_eq!(report.items_restored, 1);
    }

    #[tokio::test]
    async fn failed_merge_keeps_original_items() {
        let client = ScriptedClient::failing();
        client.push(Err(LlmError::EmptyResponse));
        let mut d = doc(1000);
        let originals = [
            "Payment gateway outage blocked checkout traffic for many users",
            "Checkout traffic recovered after gateway outage fix was deployed",
            "Quarterly hiring plan approved",
        ];
        for item in originals {
            d.add_content("Timeline", item);
        }

        compressor(client.as_ref()).compress(&mut d).await;

        let items = d.sections.get("Timeline").unwrap();
        assert_eq!(items.len(), 3);
        for original in originals {
            assert!(items.iter().any(|i| i == original));
        }
    }

    #[tokio::test]
    async fn longer_merge_is_rejected() {
        let client = ScriptedClient::new([
            "- Payment gateway outage blocked checkout traffic for many users across every region in the world\n- Checkout traffic recovered after the gateway outage fix was deployed to production servers",
        ]);
        let mut d = doc(1000);
        for item in [
            "Payment gateway outage blocked checkout traffic",
            "Checkout traffic recovered after gateway outage fix",
            "Quarterly hiring plan approved",
        ] {
            d.add_content("Timeline", item);
        }
        let before = d.current_word_count();

        let report = compressor(client.as_ref()).compress(&mut d).await;

        assert_eq!(report.groups_merged, 0);
        assert_eq!(d.current_word_count(), before);
    }

    #[tokio::test]
    async fn oversized_group_is_bisected() {
        let client = ScriptedClient::new([
            "- left half merged item with enough words",
            "- right half merged item with enough words",
        ]);
        let c = Compressor::new(
            client.as_ref(),
            CompressionConfig {
                min_words_per_item: 3,
                max_prompt_tokens: 300,
                group_cap: 4,
            },
            TokenBudget::default(),
            DateNormalizer::new(Some(2024)),
        );
        let filler = "database replica lag alert ".repeat(12);
        let group: Vec<String> = (0..4).map(|i| format!("{filler}{i}")).collect();

        let mut report = CompressionReport::default();
        let out = c
            .merge_group(&group, &BTreeSet::new(), &BTreeSet::new(), &mut report)
            .await;

        assert_eq!(client.prompts().len(), 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].starts_with("left"));
        assert_eq!(report.groups_merged, 2);
    }

    #[test]
    fn missing_tracked_dates_get_a_key_dates_note() {
        let client = ScriptedClient::failing();
        let c = compressor(client.as_ref());
        let mut d = doc(1000);
        d.tracked_dates.insert("2024-03-15".into());
        d.tracked_dates.insert("2024-04-01".into());
        d.add_content("Impact Assessment", "Customers saw errors on 2024-03-15");

        assert_eq!(c.verify_protected_dates(&mut d), 1);
        let items = d.sections.get("Impact Assessment").unwrap();
        assert_eq!(items.last().unwrap(), "[Key dates: 2024-04-01]");

        // Now every date is present; nothing else is appended.
        assert_eq!(c.verify_protected_dates(&mut d), 0);
    }

    #[test]
    fn scored_reduction_spares_protected_items() {
        let client = ScriptedClient::failing();
        let c = compressor(client.as_ref());
        let mut d = doc(8);
        d.tracked_dates.insert("2024-03-15".into());
        d.tracked_entities.insert("Alice".into());
        for item in [
            "(2024-03-15) outage began",
            "Alice led the response",
            "filler item one two three",
            "filler item four five six",
        ] {
            d.add_content("Timeline", item);
        }
        assert_eq!(c.score_item("(2024-03-15) outage began", &d), 10);
        assert_eq!(c.score_item("Alice led the response", &d), 5);

        let dropped = c.scored_reduction(&mut d);

        let items = d.sections.get("Timeline").unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(
            items,
            &vec![
                "(2024-03-15) outage began".to_string(),
                "Alice led the response".to_string()
            ]
        );
    }

    #[test]
    fn scored_reduction_removes_at_most_half_a_section() {
        let client = ScriptedClient::failing();
        let c = compressor(client.as_ref());
        let mut d = doc(1);
        for i in 0..6 {
            d.add_content("Timeline", format!("unprotected note {i}"));
        }
        assert_eq!(c.scored_reduction(&mut d), 3);
        assert_eq!(d.sections.get("Timeline").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn ladder_escalates_only_while_over_budget() {
        // Consolidation fails, so the document stays over budget and the
        // scored reduction rung runs.
        let client = ScriptedClient::failing();
        let mut d = doc(10);
        for i in 0..4 {
            d.add_content("Action Items", format!("follow up task number {i} pending"));
        }
        let report = compressor(client.as_ref()).compress(&mut d).await;
        assert_eq!(
            report.strategies,
            vec![Strategy::Consolidate, Strategy::ScoredReduction]
        );
        assert_eq!(report.items_dropped, 2);
        assert!(report.words_after < report.words_before);
    }
}

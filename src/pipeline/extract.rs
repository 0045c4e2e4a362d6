//! Extract stage: one JSON-mode vision call per page.
//!
//! The prompt asks the model to name the content types on the page and
//! extract each one (tables, visuals, events, entities, dates, facts) in a
//! single call. The answer crosses the coercion boundary in
//! [`PageExtraction::from_value`], so nothing downstream trusts its shape.
//!
//! When the previous page said it `continues_next`, its topics and actors
//! are passed along as a continuity hint.
//!
//! A failed call or unparseable answer degrades to an empty extraction for
//! that page; the run continues.

use super::{PipelineContext, Stage};
use crate::error::{LlmError, ReportError};
use crate::extraction::PageExtraction;
use crate::llm::ChatClient;
use crate::output::write_atomic;
use crate::prompts::{context_hint, extraction_prompt};
use async_trait::async_trait;
use edgequake_llm::ImageData;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const STAGE: &str = "extract";

/// Topics or actors carried into the next page's hint.
const HINT_ITEMS: usize = 3;

/// Runs the vision extraction over every rendered page.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractStage;

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn should_skip(&self, ctx: &PipelineContext) -> bool {
        ctx.pages.is_empty()
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ReportError> {
        let total = ctx.pages.len();
        let client = Arc::clone(&ctx.clients.vision);

        for page_num in 1..=total {
            if ctx.extractions.iter().any(|e| e.page_index == page_num) {
                debug!("Page {page_num}: already extracted");
                continue;
            }

            let page = ctx.pages[page_num - 1].clone();
            let hint = ctx
                .extractions
                .iter()
                .find(|e| e.page_index + 1 == page_num)
                .map(build_context_hint)
                .unwrap_or_default();

            info!("Page {page_num}/{total}: {}", page.name);
            ctx.progress().on_page_start(STAGE, page_num, total);

            let extraction =
                match extract_page(client.as_ref(), &page.image, &hint, page_num, &page.name).await {
                    Ok(extraction) => {
                        let detected = if extraction.content_types.is_empty() {
                            "text only".to_string()
                        } else {
                            extraction.content_types.join(", ")
                        };
                        info!("  Detected: {detected}");
                        ctx.progress().on_page_complete(STAGE, page_num, total, &detected);
                        extraction
                    }
                    Err(e) => {
                        warn!("  Page {page_num}: {e}; using empty extraction");
                        ctx.progress().on_page_error(STAGE, page_num, total, &e.to_string());
                        PageExtraction::empty(page_num, page.name.clone())
                    }
                };

            if ctx.config.debug {
                write_debug_json(&ctx.config.extraction_dir(), &extraction).await;
            }

            ctx.extractions.push(extraction);
            ctx.extractions.sort_by_key(|e| e.page_index);
            ctx.save_checkpoint().await?;
        }

        info!("Extracted {} pages", ctx.extractions.len());
        Ok(())
    }
}

/// Continuity hint from the previous page, or empty when that page did not
/// continue onto this one.
pub fn build_context_hint(previous: &PageExtraction) -> String {
    if !previous.continues_next {
        return String::new();
    }

    let topic_source = if previous.topics.is_empty() {
        &previous.content_types
    } else {
        &previous.topics
    };
    let topics: Vec<&str> = topic_source
        .iter()
        .take(HINT_ITEMS)
        .map(String::as_str)
        .collect();
    let actors: Vec<String> = previous.actors().into_iter().take(HINT_ITEMS).collect();

    let or_none = |s: String| if s.is_empty() { "none".to_string() } else { s };
    context_hint(&or_none(topics.join(", ")), &or_none(actors.join(", ")))
}

/// Run the extraction call for one page and coerce the answer.
pub async fn extract_page(
    client: &dyn ChatClient,
    image: &ImageData,
    hint: &str,
    page_num: usize,
    source_image: &str,
) -> Result<PageExtraction, LlmError> {
    let prompt = extraction_prompt(hint);
    let response = client
        .chat(&prompt, std::slice::from_ref(image), true)
        .await?;
    let value: serde_json::Value =
        serde_json::from_str(&response).map_err(|e| LlmError::MalformedJson(e.to_string()))?;
    Ok(PageExtraction::from_value(&value, page_num, source_image))
}

/// Best-effort `page_NNN.json` dump.
async fn write_debug_json(dir: &Path, extraction: &PageExtraction) {
    let path = dir.join(format!("page_{:03}.json", extraction.page_index));
    let body = match serde_json::to_vec_pretty(&extraction.to_debug_json()) {
        Ok(body) => body,
        Err(e) => {
            warn!("Could not serialise debug extraction: {e}");
            return;
        }
    };
    if let Err(e) = write_atomic(&path, &body).await {
        warn!("Could not write {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractedEvent;
    use crate::llm::testing::ScriptedClient;
    use crate::pipeline::testing::{blank_page, context};

    const PAGE_ONE: &str = r#"{"content_types": ["paragraph"], "topics": ["database migration"],
        "events": [{"date": "2024-03-15", "summary": "Migration started", "actors": ["Alice"], "importance": 3}],
        "continues_next": true}"#;
    const PAGE_TWO: &str = r#"{"content_types": ["table"], "tables": [{"headers": ["Step", "Owner"], "rows": [["Cutover", "Bob"]], "summary": "Runbook"}]}"#;

    #[test]
    fn hint_requires_continuation() {
        let mut prev = PageExtraction::empty(1, "p1");
        prev.topics = vec!["billing".into()];
        assert_eq!(build_context_hint(&prev), "");

        prev.continues_next = true;
        prev.events.push(ExtractedEvent {
            actors: vec!["Alice".into(), "Bob".into()],
            summary: "x".into(),
            ..Default::default()
        });
        prev.entities = vec!["Carol".into(), "Dave".into()];
        let hint = build_context_hint(&prev);
        assert!(hint.contains("Topics: billing."));
        assert!(hint.contains("Key actors: Alice, Bob, Carol."));
    }

    #[test]
    fn hint_falls_back_to_content_types_then_none() {
        let mut prev = PageExtraction::empty(1, "p1");
        prev.continues_next = true;
        prev.content_types = vec!["table".into(), "chart".into()];
        let hint = build_context_hint(&prev);
        assert!(hint.contains("Topics: table, chart."));
        assert!(hint.contains("Key actors: none."));
    }

    #[tokio::test]
    async fn extracts_pages_in_order_with_continuity() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new([PAGE_ONE, PAGE_TWO]);
        let mut ctx = context(client.clone(), dir.path());
        ctx.pages = vec![blank_page("doc_001_page_001"), blank_page("doc_001_page_002")];

        ExtractStage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.extractions.len(), 2);
        assert_eq!(ctx.extractions[0].page_index, 1);
        assert_eq!(ctx.extractions[0].events[0].summary, "Migration started");
        assert_eq!(ctx.extractions[1].source_image, "doc_001_page_002");
        assert_eq!(ctx.extractions[1].tables[0].rows, vec![vec!["Cutover", "Bob"]]);

        let prompts = client.prompts();
        assert!(!prompts[0].contains("Previous page context"));
        assert!(prompts[1].contains("Topics: database migration. Key actors: Alice."));
        assert!(ctx.checkpoints.exists());
    }

    #[tokio::test]
    async fn failed_call_yields_empty_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(["I can't read this page."]);
        let mut ctx = context(client, dir.path());
        ctx.pages = vec![blank_page("doc_001_page_001"), blank_page("doc_001_page_002")];

        ExtractStage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.extractions.len(), 2);
        assert!(ctx.extractions.iter().all(|e| !e.has_routable_content()));
        assert_eq!(ctx.extractions[1].page_index, 2);
    }

    #[tokio::test]
    async fn resumed_run_only_extracts_missing_pages() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new([PAGE_TWO]);
        let mut ctx = context(client.clone(), dir.path());
        ctx.pages = vec![blank_page("doc_001_page_001"), blank_page("doc_001_page_002")];
        ctx.extractions = vec![PageExtraction::empty(1, "doc_001_page_001")];

        ExtractStage.execute(&mut ctx).await.unwrap();

        assert_eq!(client.prompts().len(), 1);
        assert_eq!(ctx.extractions[1].content_types, vec!["table"]);
    }

    #[tokio::test]
    async fn debug_mode_dumps_page_json() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new([PAGE_ONE]);
        let mut ctx = context(client, dir.path());
        ctx.config.debug = true;
        ctx.pages = vec![blank_page("doc_001_page_001")];

        ExtractStage.execute(&mut ctx).await.unwrap();

        let dump = std::fs::read_to_string(dir.path().join("extractions/page_001.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&dump).unwrap();
        assert_eq!(v["topics"][0], "database migration");
        assert!(v.get("_page_index").is_none());
    }
}

//! Perspective stage: optional rewrite of the routed document.
//!
//! Two modes, chosen by [`PerspectiveSource`]:
//!
//! - **Sections**: a YAML file gives per-section goals. A section with its
//!   own entry gets a tailored rewrite prompt (written by the model from the
//!   goal), then a rewrite. Other sections get a voice-only rewrite.
//! - **Global**: a free-text guide; the whole markdown document is rewritten
//!   in one call and parsed back into sections.
//!
//! ```yaml
//! meta:
//!   voice: Executive
//!   terminology: Business
//! sections:
//!   Timeline:
//!     goal: Emphasise customer-facing milestones
//!     emphasize: [customer impact]
//!     de_emphasize: [internal tooling]
//!     max_words: 150
//!     preserve_format: true
//! ```
//!
//! A failed or empty rewrite keeps the section as it was.

use super::postprocess::{parse_list_response, split_markdown_sections};
use super::{PipelineContext, Stage};
use crate::config::PerspectiveSource;
use crate::document::LiveDocument;
use crate::error::ReportError;
use crate::llm::ChatClient;
use crate::prompts::{
    global_perspective_prompt, section_basic_prompt, section_meta_prompt, section_rewrite_prompt,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Documents longer than this are trimmed before a global rewrite.
const GLOBAL_REWRITE_TRIGGER_CHARS: usize = 6000;
/// Size a trimmed document is brought down to.
const GLOBAL_REWRITE_TARGET_CHARS: usize = 5000;
const TRIM_MARKER: &str = "\n\n[... content trimmed ...]\n\n";

// ── Section configuration ────────────────────────────────────────────────

/// Parsed per-section perspective file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SectionPerspective {
    pub meta: PerspectiveMeta,
    pub sections: BTreeMap<String, SectionGoal>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PerspectiveMeta {
    pub voice: String,
    pub terminology: String,
}

impl Default for PerspectiveMeta {
    fn default() -> Self {
        Self {
            voice: "Professional".to_string(),
            terminology: "Standard".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SectionGoal {
    pub goal: String,
    pub emphasize: Vec<String>,
    pub de_emphasize: Vec<String>,
    pub max_words: Option<usize>,
    pub preserve_format: bool,
}

impl Default for SectionGoal {
    fn default() -> Self {
        Self {
            goal: "Rewrite clearly".to_string(),
            emphasize: Vec::new(),
            de_emphasize: Vec::new(),
            max_words: None,
            preserve_format: false,
        }
    }
}

impl SectionPerspective {
    /// Parse YAML text; an empty file means "voice defaults only".
    pub fn parse(text: &str, path: &Path) -> Result<Self, ReportError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ReportError::PerspectiveInvalid {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ReportError> {
        let text = read_perspective(path).await?;
        Self::parse(&text, path)
    }
}

async fn read_perspective(path: &Path) -> Result<String, ReportError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ReportError::PerspectiveInvalid {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

// ── Section mode ─────────────────────────────────────────────────────────

/// Rewrite every non-empty section per `config`.
pub async fn rewrite_sections(
    client: &dyn ChatClient,
    doc: &mut LiveDocument,
    config: &SectionPerspective,
) {
    let names: Vec<String> = doc.sections.names().map(str::to_string).collect();
    for name in names {
        let Some(items) = doc.sections.get(&name).filter(|i| !i.is_empty()).cloned() else {
            continue;
        };

        let prompt = match config.sections.get(&name) {
            Some(goal) => {
                let tailored = tailored_prompt(client, &name, goal, &config.meta).await;
                section_rewrite_prompt(&tailored, &items, goal.max_words, goal.preserve_format)
            }
            None => section_basic_prompt(&name, &items, &config.meta.voice, &config.meta.terminology),
        };

        let rewritten = rewrite_items(client, &prompt, &name).await;
        if let Some(rewritten) = rewritten {
            info!("  {name}: {} → {} items", items.len(), rewritten.len());
            if let Some(slot) = doc.sections.get_mut(&name) {
                *slot = rewritten;
            }
        }
    }
}

/// Ask the model to write the rewrite prompt for one section.
async fn tailored_prompt(
    client: &dyn ChatClient,
    section: &str,
    goal: &SectionGoal,
    meta: &PerspectiveMeta,
) -> String {
    let meta_prompt = section_meta_prompt(
        section,
        &goal.goal,
        &meta.voice,
        &meta.terminology,
        &goal.emphasize,
        &goal.de_emphasize,
    );
    match client.chat(&meta_prompt, &[], false).await {
        Ok(prompt) => prompt.trim().to_string(),
        Err(e) => {
            warn!("    Failed to generate section prompt for {section}: {e}");
            format!("Rewrite this section with emphasis on: {}", goal.emphasize.join(", "))
        }
    }
}

/// `None` when the call fails or yields no list items.
async fn rewrite_items(client: &dyn ChatClient, prompt: &str, section: &str) -> Option<Vec<String>> {
    match client.chat(prompt, &[], false).await {
        Ok(response) => {
            let items = parse_list_response(&response, 0);
            if items.is_empty() {
                warn!("    Rewrite of {section} returned no items; keeping original");
                None
            } else {
                Some(items)
            }
        }
        Err(e) => {
            warn!("    Failed to rewrite section {section}: {e}");
            None
        }
    }
}

// ── Global mode ──────────────────────────────────────────────────────────

/// Keep the head and tail of an oversized document around a marker.
pub fn trim_for_rewrite(doc: &str, max_chars: usize) -> String {
    let total = doc.chars().count();
    if total <= max_chars {
        return doc.to_string();
    }
    let keep_start = max_chars * 6 / 10;
    let keep_end = max_chars * 3 / 10;
    let head: String = doc.chars().take(keep_start).collect();
    let tail: String = doc.chars().skip(total - keep_end).collect();
    format!("{head}{TRIM_MARKER}{tail}")
}

/// Rewrite the whole document against `guide`; known sections whose
/// rewritten body has list items are replaced.
pub async fn rewrite_global(client: &dyn ChatClient, doc: &mut LiveDocument, guide: &str, max_words: usize) {
    let mut current = doc.to_markdown();
    if current.chars().count() > GLOBAL_REWRITE_TRIGGER_CHARS {
        current = trim_for_rewrite(&current, GLOBAL_REWRITE_TARGET_CHARS);
    }
    let prompt = global_perspective_prompt(guide, &current, max_words);

    let response = match client.chat(&prompt, &[], false).await {
        Ok(response) => response,
        Err(e) => {
            warn!("    Global rewrite failed: {e}");
            return;
        }
    };

    let mut replaced = 0;
    for (name, body) in split_markdown_sections(&response) {
        let items = parse_list_response(&body, 0);
        if items.is_empty() {
            continue;
        }
        if let Some(slot) = doc.sections.get_mut(&name) {
            *slot = items;
            replaced += 1;
        }
    }
    info!("  Rewrote {replaced} sections");
}

// ── Stage ────────────────────────────────────────────────────────────────

/// Applies the configured perspective to the live document.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerspectiveStage;

#[async_trait]
impl Stage for PerspectiveStage {
    fn name(&self) -> &'static str {
        "perspective"
    }

    fn should_skip(&self, ctx: &PipelineContext) -> bool {
        ctx.config.perspective.is_none() || ctx.document.is_none()
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ReportError> {
        let Some(source) = ctx.config.perspective.clone() else {
            return Ok(());
        };
        let client = Arc::clone(&ctx.clients.text);
        let max_words = ctx.max_words;
        let Some(doc) = ctx.document.as_mut() else {
            return Ok(());
        };

        match source {
            PerspectiveSource::Sections(path) => {
                info!("Applying section perspective: {}", path.display());
                let config = SectionPerspective::load(&path).await?;
                rewrite_sections(client.as_ref(), doc, &config).await;
            }
            PerspectiveSource::Global(path) => {
                info!("Applying global perspective: {}", path.display());
                let guide = read_perspective(&path).await?;
                rewrite_global(client.as_ref(), doc, &guide, max_words).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use crate::pipeline::testing::context;

    const YAML: &str = "meta:\n  voice: Executive\nsections:\n  Timeline:\n    goal: Emphasise customer milestones\n    emphasize: [customer impact]\n    max_words: 50\n";

    fn seeded(ctx: &mut PipelineContext) {
        let doc = ctx.document_mut();
        doc.add_content("Timeline", "(2024-03-15) Checkout failed for customers");
        doc.add_content("Root Cause Analysis", "Expired TLS certificate on the gateway");
    }

    #[test]
    fn parses_yaml_with_defaults() {
        let cfg = SectionPerspective::parse(YAML, Path::new("p.yaml")).unwrap();
        assert_eq!(cfg.meta.voice, "Executive");
        assert_eq!(cfg.meta.terminology, "Standard");
        let timeline = &cfg.sections["Timeline"];
        assert_eq!(timeline.max_words, Some(50));
        assert!(!timeline.preserve_format);
        assert!(timeline.de_emphasize.is_empty());

        assert_eq!(SectionPerspective::parse("  ", Path::new("p.yaml")).unwrap(), SectionPerspective::default());
        let err = SectionPerspective::parse("sections: [unclosed", Path::new("p.yaml")).unwrap_err();
        assert!(matches!(err, ReportError::PerspectiveInvalid { .. }));
    }

    #[test]
    fn trims_head_and_tail() {
        let doc = "a".repeat(70) + &"b".repeat(30);
        let trimmed = trim_for_rewrite(&doc, 50);
        assert_eq!(trimmed, format!("{}{TRIM_MARKER}{}", "a".repeat(30), "b".repeat(15)));
        assert_eq!(trim_for_rewrite("short", 50), "short");
    }

    #[tokio::test]
    async fn section_mode_tailors_configured_sections() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("perspective.yaml");
        std::fs::write(&yaml, YAML).unwrap();

        let client = ScriptedClient::new([
            "Focus on customer impact.",
            "- (2024-03-15) Customers could not check out",
            "- The gateway certificate had expired",
        ]);
        let mut ctx = context(client.clone(), dir.path());
        ctx.config.perspective = Some(PerspectiveSource::Sections(yaml));
        seeded(&mut ctx);

        assert!(!PerspectiveStage.should_skip(&ctx));
        PerspectiveStage.execute(&mut ctx).await.unwrap();

        let prompts = client.prompts();
        assert!(prompts[0].contains("USER'S GOAL: Emphasise customer milestones"));
        assert!(prompts[1].starts_with("Focus on customer impact."));
        assert!(prompts[1].contains("Keep under 50 words."));
        assert!(prompts[2].contains("VOICE: Executive"));
        assert!(prompts[2].contains("SECTION: Root Cause Analysis"));

        let doc = ctx.document.unwrap();
        assert_eq!(
            doc.sections.get("Timeline").unwrap(),
            &vec!["(2024-03-15) Customers could not check out".to_string()]
        );
        assert_eq!(
            doc.sections.get("Root Cause Analysis").unwrap(),
            &vec!["The gateway certificate had expired".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_rewrites_keep_sections() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("perspective.yaml");
        std::fs::write(&yaml, YAML).unwrap();

        // Meta prompt fails, rewrite answers without a list, basic rewrite fails.
        let client = ScriptedClient::failing();
        client.push(Err(crate::error::LlmError::EmptyResponse));
        client.push(Ok("Sorry, I cannot help with that.".into()));
        let mut ctx = context(client.clone(), dir.path());
        ctx.config.perspective = Some(PerspectiveSource::Sections(yaml));
        seeded(&mut ctx);

        PerspectiveStage.execute(&mut ctx).await.unwrap();

        assert!(client.prompts()[1].starts_with("Rewrite this section with emphasis on: customer impact"));
        let doc = ctx.document.unwrap();
        assert_eq!(
            doc.sections.get("Timeline").unwrap()[0],
            "(2024-03-15) Checkout failed for customers"
        );
        assert_eq!(
            doc.sections.get("Root Cause Analysis").unwrap()[0],
            "Expired TLS certificate on the gateway"
        );
    }

    #[tokio::test]
    async fn invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("perspective.yaml");
        std::fs::write(&yaml, "meta: [broken").unwrap();
        let mut ctx = context(ScriptedClient::failing(), dir.path());
        ctx.config.perspective = Some(PerspectiveSource::Sections(yaml));
        seeded(&mut ctx);

        let err = PerspectiveStage.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReportError::PerspectiveInvalid { .. }));
    }

    #[tokio::test]
    async fn global_mode_replaces_known_sections_with_items() {
        let dir = tempfile::tempdir().unwrap();
        let guide = dir.path().join("perspective.md");
        std::fs::write(&guide, "Write for the board. Focus on revenue.").unwrap();

        let client = ScriptedClient::new([
            "# Incident\n\n## Timeline\n- (2024-03-15) Revenue stalled at checkout\n\n## Root Cause Analysis\nPlain prose, no list.\n\n## Appendix\n- ignored",
        ]);
        let mut ctx = context(client.clone(), dir.path());
        ctx.config.perspective = Some(PerspectiveSource::Global(guide));
        seeded(&mut ctx);

        PerspectiveStage.execute(&mut ctx).await.unwrap();

        let prompt = &client.prompts()[0];
        assert!(prompt.contains("PERSPECTIVE GUIDE:\nWrite for the board."));
        assert!(prompt.contains("## Timeline"));

        let doc = ctx.document.unwrap();
        assert_eq!(
            doc.sections.get("Timeline").unwrap(),
            &vec!["(2024-03-15) Revenue stalled at checkout".to_string()]
        );
        assert_eq!(
            doc.sections.get("Root Cause Analysis").unwrap()[0],
            "Expired TLS certificate on the gateway"
        );
        assert!(!doc.sections.contains("Appendix"));
    }

    #[test]
    fn skipped_without_perspective_or_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(ScriptedClient::failing(), dir.path());
        assert!(PerspectiveStage.should_skip(&ctx));
        ctx.config.perspective = Some(PerspectiveSource::Global(dir.path().join("g.md")));
        assert!(PerspectiveStage.should_skip(&ctx));
        ctx.document_mut();
        assert!(!PerspectiveStage.should_skip(&ctx));
    }
}

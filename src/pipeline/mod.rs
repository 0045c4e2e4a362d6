//! Pipeline stages for PDF-to-report synthesis.
//!
//! Each submodule implements exactly one transformation step. Stages share a
//! single [`PipelineContext`] and run strictly in order; the orchestrator
//! owns format loading, resume, output writing and checkpoint cleanup.
//!
//! ## Data Flow
//!
//! ```text
//!                                 ┌──▶ finalize ─────────────────────────────▶ report.txt
//! render ──▶ encode ──▶ extract ──┤
//! (pdfium)   (base64)   (VLM)     └──▶ integrate ──▶ compress ──▶ perspective ─▶ report.md
//!                                      (+compress)
//! ```
//!
//! 1. [`render`]: discover PDFs and rasterise every page; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]: PNG-encode and base64-wrap each page for the vision call
//! 3. [`extract`]: one JSON-mode vision call per page
//! 4. [`finalize`]: importance-tiered, budget-bounded single synthesis
//! 5. [`integrate`]: per-page ADD/UPDATE/SKIP routing into a
//!    [`LiveDocument`], calling [`compress`] whenever it grows too large
//! 6. [`compress`]: a last pass in case the document still sits over the
//!    threshold
//! 7. [`perspective`]: optional rewrite of the routed document
//! 8. [`postprocess`]: deterministic cleanup of model answers
//!
//! ## Why sequential?
//!
//! Later pages depend on earlier ones: continuity hints, protected-term
//! tracking and decision prompts all read state the previous page wrote.
//! The only recovery point is the checkpoint written after every page.

pub mod compress;
pub mod encode;
pub mod extract;
pub mod finalize;
pub mod integrate;
pub mod perspective;
pub mod postprocess;
pub mod render;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::{Architecture, PipelineConfig};
use crate::dates::DateNormalizer;
use crate::document::LiveDocument;
use crate::error::ReportError;
use crate::events::EventEnricher;
use crate::extraction::PageExtraction;
use crate::format::{load_preferences, FormatSpec};
use crate::llm::Clients;
use crate::output::{report_file_name, write_atomic, ReportOutput};
use crate::progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
use crate::text::word_count;
use async_trait::async_trait;
use edgequake_llm::ImageData;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One rasterised, encoded page held in memory.
#[derive(Clone)]
pub struct RenderedPage {
    /// Stable page name, e.g. `doc_001_page_003`.
    pub name: String,
    pub image: ImageData,
}

impl fmt::Debug for RenderedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedPage")
            .field("name", &self.name)
            .field("bytes", &self.image.data.len())
            .finish()
    }
}

/// A pipeline step.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Identifier used in logs, progress events and stage errors.
    fn name(&self) -> &'static str;

    /// Whether the stage has nothing to do for this context.
    fn should_skip(&self, ctx: &PipelineContext) -> bool {
        let _ = ctx;
        false
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ReportError>;
}

/// Shared state threaded through every stage.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub clients: Clients,
    pub format_spec: FormatSpec,
    /// Word budget in force; `format.md` and a restored checkpoint override
    /// the configured value.
    pub max_words: usize,
    /// Preferences block injected into the synthesis prompt.
    pub preferences: String,
    pub pages: Vec<RenderedPage>,
    pub extractions: Vec<PageExtraction>,
    pub document: Option<LiveDocument>,
    pub final_report: Option<String>,
    /// Highest page fully integrated (1-indexed); 0 before integration.
    pub last_processed_page: usize,
    /// Set once state was restored from a checkpoint.
    pub resumed: bool,
    pub checkpoints: CheckpointManager,
    progress: ProgressCallback,
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("format_spec", &self.format_spec)
            .field("max_words", &self.max_words)
            .field("pages", &self.pages.len())
            .field("extractions", &self.extractions.len())
            .field("document_words", &self.document.as_ref().map(|d| d.current_word_count()))
            .field("final_report", &self.final_report.is_some())
            .field("last_processed_page", &self.last_processed_page)
            .field("resumed", &self.resumed)
            .finish()
    }
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        clients: Clients,
        format_spec: FormatSpec,
        preferences: impl Into<String>,
    ) -> Self {
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        let checkpoints = CheckpointManager::new(&config.output_dir);
        Self {
            max_words: format_spec.max_words,
            config,
            clients,
            format_spec,
            preferences: preferences.into(),
            pages: Vec::new(),
            extractions: Vec::new(),
            document: None,
            final_report: None,
            last_processed_page: 0,
            resumed: false,
            checkpoints,
            progress,
        }
    }

    pub fn progress(&self) -> &dyn PipelineProgressCallback {
        self.progress.as_ref()
    }

    /// Date normalizer anchored on the configured document year.
    pub fn normalizer(&self) -> DateNormalizer {
        DateNormalizer::new(self.config.document_year)
    }

    pub fn enricher(&self) -> EventEnricher {
        EventEnricher::new(self.normalizer())
    }

    /// The live document, created from the format spec on first use.
    pub fn document_mut(&mut self) -> &mut LiveDocument {
        let (spec, max_words) = (&self.format_spec, self.max_words);
        self.document
            .get_or_insert_with(|| LiveDocument::new(spec.clone(), max_words))
    }

    /// Snapshot of everything needed to resume.
    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            last_processed_page: self.last_processed_page,
            extractions: self.extractions.clone(),
            format_spec: self.format_spec.clone(),
            max_words: self.max_words,
            document_state: self.document.as_ref().map(LiveDocument::to_snapshot),
        }
    }

    pub async fn save_checkpoint(&self) -> Result<(), ReportError> {
        self.checkpoints.save(&self.to_checkpoint()).await
    }

    /// Adopt a checkpoint's state.
    ///
    /// The document is rebuilt only when the snapshot carries sections.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.last_processed_page = checkpoint.last_processed_page;
        self.extractions = checkpoint.extractions;
        if !checkpoint.format_spec.sections.is_empty() {
            self.format_spec = checkpoint.format_spec;
        }
        if checkpoint.max_words > 0 {
            self.max_words = checkpoint.max_words;
        }
        self.document = checkpoint
            .document_state
            .filter(|snapshot| !snapshot.sections.is_empty())
            .map(|snapshot| {
                LiveDocument::from_snapshot(snapshot, self.format_spec.clone(), self.max_words)
            });
        self.resumed = true;
    }
}

/// Runs stages in order and writes the report.
pub struct Pipeline {
    config: PipelineConfig,
    clients: Clients,
    stages: Vec<Box<dyn Stage>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("clients", &self.clients)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    /// An empty pipeline; clients are resolved from the config.
    pub fn new(config: PipelineConfig) -> Result<Self, ReportError> {
        let clients = Clients::from_config(&config)?;
        Ok(Self::with_clients(config, clients))
    }

    pub fn with_clients(config: PipelineConfig, clients: Clients) -> Self {
        Self {
            config,
            clients,
            stages: Vec::new(),
        }
    }

    pub fn add_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// The standard stage list for the configured architecture.
    ///
    /// | Architecture | Stages |
    /// |--------------|--------|
    /// | `Synthesis`  | convert → extract → finalize |
    /// | `Legacy`     | convert → extract → integrate → compress → perspective |
    pub fn create_default(config: PipelineConfig) -> Result<Self, ReportError> {
        let clients = Clients::from_config(&config)?;
        Ok(Self::default_stages(config, clients))
    }

    /// [`Pipeline::create_default`] with pre-built clients.
    pub fn default_stages(config: PipelineConfig, clients: Clients) -> Self {
        let architecture = config.architecture;
        let pipeline = Self::with_clients(config, clients)
            .add_stage(render::ConvertStage)
            .add_stage(extract::ExtractStage);
        match architecture {
            Architecture::Synthesis => pipeline.add_stage(finalize::FinalizeStage),
            Architecture::Legacy => pipeline
                .add_stage(integrate::IntegrateStage)
                .add_stage(compress::CompressStage)
                .add_stage(perspective::PerspectiveStage),
        }
    }

    /// Execute every stage and write the report.
    ///
    /// # Errors
    /// Any structural failure, wrapped with the failing stage's name.
    /// Oracle failures never surface here.
    pub async fn run(&self) -> Result<ReportOutput, ReportError> {
        let start = Instant::now();
        info!("Starting pipeline for {}", self.config.input_dir.display());

        let format_spec =
            FormatSpec::load(self.config.format_spec_path.as_deref(), self.config.max_words).await?;
        info!("Loaded format spec: {}", format_spec.title);
        let preferences = load_preferences(self.config.preferences_path.as_deref()).await;

        let mut ctx = PipelineContext::new(
            self.config.clone(),
            self.clients.clone(),
            format_spec,
            preferences,
        );

        if self.config.resume {
            match ctx.checkpoints.load().await {
                Ok(Some(checkpoint)) => {
                    ctx.restore(checkpoint);
                    info!(
                        "Resumed from checkpoint at page {} ({} extractions)",
                        ctx.last_processed_page,
                        ctx.extractions.len()
                    );
                }
                Ok(None) => info!("No checkpoint found; starting fresh"),
                Err(e) => warn!("{e}; starting fresh"),
            }
        }

        for stage in &self.stages {
            let name = stage.name();
            if stage.should_skip(&ctx) {
                info!("Skipping stage: {name}");
                ctx.progress().on_stage_skipped(name);
                continue;
            }

            info!("── Stage: {name} ──");
            ctx.progress().on_stage_start(name);
            stage.execute(&mut ctx).await.map_err(|e| match e {
                ReportError::Stage { .. } => e,
                other => ReportError::stage(name, other.to_string()),
            })?;
            ctx.progress().on_stage_complete(name);
        }

        let output = self.write_output(&ctx).await?;
        ctx.checkpoints.cleanup().await;

        info!(
            "Pipeline complete in {:.1}s. Report saved to: {} ({} words)",
            start.elapsed().as_secs_f64(),
            output.path.display(),
            output.word_count
        );
        ctx.progress().on_pipeline_complete(output.word_count);
        Ok(output)
    }

    /// Prefer the synthesized report; fall back to the routed document.
    async fn write_output(&self, ctx: &PipelineContext) -> Result<ReportOutput, ReportError> {
        let (architecture, report) = match (&ctx.final_report, &ctx.document) {
            (Some(report), _) => (Architecture::Synthesis, report.clone()),
            (None, Some(doc)) => (Architecture::Legacy, doc.to_markdown()),
            (None, None) => {
                return Err(ReportError::stage("output", "no stage produced a report"));
            }
        };

        let path = self.config.output_dir.join(report_file_name(architecture));
        write_atomic(&path, report.as_bytes())
            .await
            .map_err(|source| ReportError::OutputWriteFailed {
                path: path.clone(),
                source,
            })?;

        let word_count = word_count(&report);
        info!("Report: {} ({} words)", path.display(), word_count);
        Ok(ReportOutput {
            path,
            word_count,
            pages: ctx.extractions.len(),
            architecture,
            report,
        })
    }
}

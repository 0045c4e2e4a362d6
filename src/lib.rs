//! # edgequake-pdf2report
//!
//! Synthesize a bounded natural-language report from a folder of PDFs using
//! Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Incident write-ups, audit bundles and board packs arrive as stacks of
//! PDFs full of tables, charts and scanned pages. Text extraction loses the
//! layout, and pasting everything into one prompt blows any context window.
//! This crate rasterises every page, lets a VLM extract structured content
//! page by page, and then builds a report that stays within a word budget
//! without dropping the dates and names that matter.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input/*.pdf
//!  │
//!  ├─ 1. Convert    rasterise pages via pdfium (spawn_blocking) → base64 PNG
//!  ├─ 2. Extract    one JSON-mode vision call per page, with continuity hints
//!  │
//!  ├─ Synthesis (default)
//!  │   └─ 3. Finalize   importance tiers → one budget-bounded prompt → report.txt
//!  │
//!  └─ Legacy
//!      ├─ 3. Integrate   ADD / UPDATE / SKIP per page into a LiveDocument
//!      ├─ 4. Compress    consolidate similar items, protect dates and names
//!      └─ 5. Perspective optional rewrite → report.md
//! ```
//!
//! Every model call is fallible and every failure has a local fallback; only
//! structural problems (no PDFs, no pages, unwritable output) abort a run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2report::{generate_report, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder()
//!         .input_dir("documents")
//!         .output_dir("output")
//!         .max_words(1200)
//!         .build()?;
//!     let output = generate_report(config).await?;
//!     println!("{} ({} words)", output.path.display(), output.word_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2report` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2report = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod budget;
pub mod checkpoint;
pub mod config;
pub mod dates;
pub mod document;
pub mod error;
pub mod events;
pub mod extraction;
pub mod format;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod text;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use budget::TokenBudget;
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use config::{
    Architecture, CompressionConfig, PerspectiveSource, PipelineConfig, PipelineConfigBuilder,
};
pub use dates::{DateNormalizer, NormalizedDate};
pub use document::LiveDocument;
pub use error::{LlmError, ReportError};
pub use events::{EnrichedEvent, EventEnricher};
pub use extraction::PageExtraction;
pub use format::FormatSpec;
pub use llm::{ChatClient, Clients};
pub use output::ReportOutput;
pub use pipeline::{Pipeline, PipelineContext, Stage};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use report::{generate_report, generate_report_sync};

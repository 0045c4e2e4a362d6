//! Progress-callback trait for stage and per-page pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages and pages.
//!
//! # Why callbacks instead of channels?
//!
//! The callback is the least-invasive integration point: callers can forward
//! events to a channel, a log, or a terminal progress bar without the library
//! knowing how the host application communicates. The trait is
//! `Send + Sync` so a callback can be shared across tasks.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2report::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, stage: &str, page_num: usize, total_pages: usize, _detail: &str) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}: page {page_num}/{total_pages} done");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { pages: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Pages are 1-indexed.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once a stage is about to execute.
    fn on_stage_start(&self, stage: &str) {
        let _ = stage;
    }

    /// Called when a stage declined to run.
    fn on_stage_skipped(&self, stage: &str) {
        let _ = stage;
    }

    /// Called after a stage finished successfully.
    fn on_stage_complete(&self, stage: &str) {
        let _ = stage;
    }

    /// Called before a per-page step (extraction, integration).
    ///
    /// # Arguments
    /// * `stage`: the stage doing the work
    /// * `page_num`: 1-indexed page number
    /// * `total_pages`: pages the stage will visit
    fn on_page_start(&self, stage: &str, page_num: usize, total_pages: usize) {
        let _ = (stage, page_num, total_pages);
    }

    /// Called when a per-page step succeeds.
    ///
    /// `detail` is a short human-readable outcome such as `"ADD"` or
    /// `"table, paragraph"`.
    fn on_page_complete(&self, stage: &str, page_num: usize, total_pages: usize, detail: &str) {
        let _ = (stage, page_num, total_pages, detail);
    }

    /// Called when a per-page step degraded to its fallback.
    fn on_page_error(&self, stage: &str, page_num: usize, total_pages: usize, error: &str) {
        let _ = (stage, page_num, total_pages, error);
    }

    /// Called once after the report has been written.
    fn on_pipeline_complete(&self, word_count: usize) {
        let _ = word_count;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

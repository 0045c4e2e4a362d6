//! Error types for the edgequake-pdf2report library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReportError`] (**fatal**): a stage cannot proceed at all (no PDFs in
//!   the input directory, zero pages rendered, checkpoint cannot be written).
//!   Returned as `Err(ReportError)` from [`crate::pipeline::Pipeline::run`].
//!
//! * [`LlmError`] (**recoverable**): a single oracle call failed (transport
//!   error, empty answer, malformed JSON). Every call site catches it and
//!   substitutes a defined fallback, so it never aborts the pipeline.
//!
//! Data-shape problems in extraction payloads are not errors at all: they are
//! coerced at the [`crate::extraction`] boundary.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2report library.
#[derive(Debug, Error)]
pub enum ReportError {
    // ── Stage errors ──────────────────────────────────────────────────────
    /// A pipeline stage could not complete.
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input directory does not exist.
    #[error("Input directory not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// The input directory contains no `.pdf` files.
    #[error("No PDF files found in '{path}'")]
    NoPdfsFound { path: PathBuf },

    /// Every PDF was opened but no page image was produced.
    #[error("No page images were produced from the PDFs in '{path}'")]
    NoPagesRendered { path: PathBuf },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page} of '{path}': {detail}")]
    RasterisationFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// `format.md` exists but could not be read.
    #[error("Failed to read format specification '{path}': {source}")]
    FormatSpecUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Perspective configuration is present but invalid.
    #[error("Invalid perspective configuration '{path}': {detail}")]
    PerspectiveInvalid { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Checkpoint could not be persisted.
    #[error("Failed to write checkpoint '{path}': {source}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint exists but could not be read or parsed.
    #[error("Failed to read checkpoint '{path}': {detail}")]
    CheckpointRead { path: PathBuf, detail: String },

    /// Could not create or write the output report.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReportError {
    /// Wrap an arbitrary failure message with the identity of the stage.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        ReportError::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// A recoverable failure of a single oracle call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// Transport or provider error after all retries.
    #[error("LLM request failed after {retries} retries: {detail}")]
    Request { retries: u32, detail: String },

    /// The model answered with nothing usable.
    #[error("LLM returned an empty response")]
    EmptyResponse,

    /// JSON mode was requested but the answer did not parse.
    #[error("LLM returned malformed JSON: {0}")]
    MalformedJson(String),
}

//! Top-level entry points: run the standard pipeline for a config.

use crate::config::PipelineConfig;
use crate::error::ReportError;
use crate::output::ReportOutput;
use crate::pipeline::Pipeline;
use tracing::info;

/// Turn a directory of PDFs into a report.
///
/// This is the primary entry point for the library. Stages follow
/// `config.architecture`; the report lands in `config.output_dir`.
///
/// # Errors
/// Returns `Err(ReportError)` only for fatal errors:
/// - Input directory missing or holding no PDFs
/// - No page could be rendered
/// - No usable LLM provider
/// - The report or checkpoint could not be written
///
/// Model failures on individual pages or calls degrade in place and never
/// surface here.
pub async fn generate_report(config: PipelineConfig) -> Result<ReportOutput, ReportError> {
    info!(
        "Generating report from {} ({:?})",
        config.input_dir.display(),
        config.architecture
    );
    Pipeline::create_default(config)?.run().await
}

/// Synchronous wrapper around [`generate_report`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_report_sync(config: PipelineConfig) -> Result<ReportOutput, ReportError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ReportError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate_report(config))
}

//! Checkpoint persistence for resumable runs.
//!
//! After every processed page the pipeline writes its state to
//! `checkpoint.json` in the output directory. A resumed run restores that
//! state and re-enters the page loop after `last_processed_page`.
//!
//! The checkpoint is removed once the report has been written.

use crate::document::DocumentSnapshot;
use crate::error::ReportError;
use crate::extraction::PageExtraction;
use crate::format::FormatSpec;
use crate::output::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Fixed checkpoint file name inside the output directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Everything needed to resume a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    /// Highest page (1-indexed) fully integrated; 0 before integration.
    pub last_processed_page: usize,
    /// Every extraction produced so far.
    pub extractions: Vec<PageExtraction>,
    pub format_spec: FormatSpec,
    pub max_words: usize,
    /// Document state on the legacy path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_state: Option<DocumentSnapshot>,
}

/// Reads, writes and removes the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    path: PathBuf,
}

impl CheckpointManager {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            path: output_dir.as_ref().join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist atomically.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ReportError> {
        let bytes = serde_json::to_vec_pretty(checkpoint).map_err(|e| ReportError::CheckpointWrite {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| ReportError::CheckpointWrite {
                path: self.path.clone(),
                source,
            })
    }

    /// `Ok(None)` when there is no checkpoint.
    pub async fn load(&self) -> Result<Option<Checkpoint>, ReportError> {
        if !self.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ReportError::CheckpointRead {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ReportError::CheckpointRead {
                path: self.path.clone(),
                detail: e.to_string(),
            })
    }

    /// Remove the checkpoint; failures are logged, not returned.
    pub async fn cleanup(&self) {
        if !self.exists() {
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!("Checkpoint cleared"),
            Err(e) => warn!("Could not remove checkpoint {}: {e}", self.path.display()),
        }
    }
}

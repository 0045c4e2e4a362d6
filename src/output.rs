//! Run results and the atomic file writer shared by the report and the
//! checkpoint.

use crate::config::Architecture;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the synthesized plain-text report.
pub const SYNTHESIS_REPORT_FILE: &str = "report.txt";
/// File name of the rendered markdown report.
pub const LEGACY_REPORT_FILE: &str = "report.md";

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOutput {
    /// Where the report was written.
    pub path: PathBuf,
    /// The report text as written.
    pub report: String,
    /// Whitespace-separated words in `report`.
    pub word_count: usize,
    /// Pages that produced an extraction.
    pub pages: usize,
    pub architecture: Architecture,
}

/// Report file name for an architecture.
pub fn report_file_name(architecture: Architecture) -> &'static str {
    match architecture {
        Architecture::Synthesis => SYNTHESIS_REPORT_FILE,
        Architecture::Legacy => LEGACY_REPORT_FILE,
    }
}

/// Write `contents` to `path` via a sibling temp file and a rename, so a
/// reader never sees a partial file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_architecture() {
        assert_eq!(report_file_name(Architecture::Synthesis), "report.txt");
        assert_eq!(report_file_name(Architecture::Legacy), "report.md");
    }

    #[tokio::test]
    async fn atomic_write_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/report.txt");
        write_atomic(&path, b"hello").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(!dir.path().join("nested/out/report.txt.tmp").exists());

        write_atomic(&path, b"replaced").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "replaced");
    }
}

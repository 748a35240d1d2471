//! Per-item outcomes and the run report surfaced to the operator.
//!
//! Every per-file problem ends up here as a value; nothing is swallowed.

use super::encrypt::EncryptionResult;
use super::Phase;
use crate::catalog::{Sensitivity, SkipReason};
use crate::utils::Result;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// File name of the report written at the session root
pub const REPORT_FILE_NAME: &str = "run_report.json";

/// Coarse classification of a per-file I/O problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PermissionDenied,
    Locked,
    PathTooLong,
    NotFound,
    Cancelled,
    Other,
}

#[cfg(windows)]
const LOCKED_CODES: &[i32] = &[32, 33]; // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
#[cfg(windows)]
const NAME_TOO_LONG_CODES: &[i32] = &[206]; // ERROR_FILENAME_EXCED_RANGE

#[cfg(unix)]
const LOCKED_CODES: &[i32] = &[16, 26]; // EBUSY, ETXTBSY
#[cfg(target_os = "linux")]
const NAME_TOO_LONG_CODES: &[i32] = &[36];
#[cfg(all(unix, not(target_os = "linux")))]
const NAME_TOO_LONG_CODES: &[i32] = &[63];

#[cfg(not(any(unix, windows)))]
const LOCKED_CODES: &[i32] = &[];
#[cfg(not(any(unix, windows)))]
const NAME_TOO_LONG_CODES: &[i32] = &[];

impl FailureKind {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
            io::ErrorKind::NotFound => FailureKind::NotFound,
            _ => match err.raw_os_error() {
                Some(code) if LOCKED_CODES.contains(&code) => FailureKind::Locked,
                Some(code) if NAME_TOO_LONG_CODES.contains(&code) => FailureKind::PathTooLong,
                _ => FailureKind::Other,
            },
        }
    }
}

/// A file that was not processed, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

impl FileFailure {
    pub fn from_io(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        Self {
            path: path.into(),
            kind: FailureKind::classify(err),
            reason: err.to_string(),
        }
    }

    pub fn cancelled(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FailureKind::Cancelled,
            reason: "backup cancelled before this file was copied".to_string(),
        }
    }
}

/// Tagged result of one file copy.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Copied { bytes: u64 },
    /// Not attempted or gone before the copy (cancelled, vanished)
    Skipped(FileFailure),
    Failed(FileFailure),
}

/// Counts and failure details for one logical folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderCopyResult {
    pub total_files: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_copied: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<FileFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FileFailure>,
}

impl FolderCopyResult {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Copied { bytes } => {
                self.copied += 1;
                self.bytes_copied += bytes;
            }
            FileOutcome::Skipped(skip) => {
                self.skipped += 1;
                self.skipped_files.push(skip);
            }
            FileOutcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
        }
    }

    /// Failures that happened before any file could be attempted
    /// (e.g. an unreadable subdirectory during enumeration).
    pub fn record_enumeration_failure(&mut self, failure: FileFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }

    pub fn attempted(&self) -> usize {
        self.copied + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FolderOutcome {
    Copied(FolderCopyResult),
    Skipped { reason: SkipReason },
}

/// Outcome for one planned folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderReport {
    pub name: String,
    pub source_path: PathBuf,
    pub sensitivity: Sensitivity,
    #[serde(flatten)]
    pub outcome: FolderOutcome,
}

impl FolderReport {
    pub fn copy_result(&self) -> Option<&FolderCopyResult> {
        match &self.outcome {
            FolderOutcome::Copied(result) => Some(result),
            FolderOutcome::Skipped { .. } => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.outcome {
            FolderOutcome::Skipped { reason } => Some(reason),
            FolderOutcome::Copied(_) => None,
        }
    }
}

/// Headline numbers of the written inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub manifest_path: PathBuf,
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub unreadable: usize,
}

/// Three-valued process outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Complete,
    CompletedWithFailures,
    Failed,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Complete => 0,
            ExitStatus::Failed => 1,
            ExitStatus::CompletedWithFailures => 2,
        }
    }
}

/// Structured summary of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub session_id: String,
    pub session_path: Option<PathBuf>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub phase: Phase,
    pub folders: Vec<FolderReport>,
    pub inventory: Option<InventorySummary>,
    pub encryption: Option<EncryptionResult>,
    pub exit_status: Option<ExitStatus>,
}

impl RunReport {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            session_path: None,
            started_at: chrono::Utc::now(),
            finished_at: None,
            phase: Phase::Init,
            folders: Vec::new(),
            inventory: None,
            encryption: None,
            exit_status: None,
        }
    }

    pub fn folder(&self, name: &str) -> Option<&FolderReport> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn files_copied(&self) -> usize {
        self.copy_results().map(|r| r.copied).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.copy_results().map(|r| r.failed).sum()
    }

    pub fn bytes_copied(&self) -> u64 {
        self.copy_results().map(|r| r.bytes_copied).sum()
    }

    fn copy_results(&self) -> impl Iterator<Item = &FolderCopyResult> {
        self.folders.iter().filter_map(FolderReport::copy_result)
    }

    /// Anything the operator asked for that did not make it into the set.
    pub fn has_item_failures(&self) -> bool {
        let copy_failures = self.copy_results().any(|r| r.failed > 0 || r.skipped > 0);
        let unreadable = self.inventory.as_ref().is_some_and(|i| i.unreadable > 0);
        let encryption = self.encryption.as_ref().is_some_and(|e| e.is_degraded());
        copy_failures || unreadable || encryption
    }

    pub fn compute_exit_status(&self) -> ExitStatus {
        match self.phase {
            Phase::Complete if self.has_item_failures() => ExitStatus::CompletedWithFailures,
            Phase::Complete => ExitStatus::Complete,
            _ => ExitStatus::Failed,
        }
    }

    /// Stamp the end of the session.
    pub fn finalize(&mut self) {
        self.finished_at = Some(chrono::Utc::now());
        self.exit_status = Some(self.compute_exit_status());
    }

    pub fn write_to(&self, session_path: &Path) -> Result<PathBuf> {
        let path = session_path.join(REPORT_FILE_NAME);
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: FailureKind) -> FileFailure {
        FileFailure {
            path: PathBuf::from("/src/a.txt"),
            kind,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_classify_io_errors() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(FailureKind::classify(&denied), FailureKind::PermissionDenied);

        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(FailureKind::classify(&missing), FailureKind::NotFound);

        #[cfg(target_os = "linux")]
        {
            let busy = io::Error::from_raw_os_error(16);
            assert_eq!(FailureKind::classify(&busy), FailureKind::Locked);
            let long = io::Error::from_raw_os_error(36);
            assert_eq!(FailureKind::classify(&long), FailureKind::PathTooLong);
        }

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(FailureKind::classify(&other), FailureKind::Other);
    }

    #[test]
    fn test_folder_result_counts() {
        let mut result = FolderCopyResult::new(4);
        result.record(FileOutcome::Copied { bytes: 100 });
        result.record(FileOutcome::Copied { bytes: 50 });
        result.record(FileOutcome::Failed(failure(FailureKind::PermissionDenied)));
        result.record(FileOutcome::Skipped(failure(FailureKind::Cancelled)));

        assert_eq!(result.copied, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.bytes_copied, 150);
        assert_eq!(result.attempted(), 4);
        assert_eq!(result.failures[0].kind, FailureKind::PermissionDenied);
    }

    #[test]
    fn test_exit_status_three_valued() {
        let mut report = RunReport::new("20260101_120000");
        report.phase = Phase::Failed("destination unwritable".to_string());
        assert_eq!(report.compute_exit_status(), ExitStatus::Failed);

        report.phase = Phase::Complete;
        report.folders.push(FolderReport {
            name: "Photos".to_string(),
            source_path: PathBuf::from("/src/missing"),
            sensitivity: Sensitivity::Normal,
            outcome: FolderOutcome::Skipped {
                reason: SkipReason::SourceNotFound,
            },
        });
        assert_eq!(report.compute_exit_status(), ExitStatus::Complete);

        let mut result = FolderCopyResult::new(1);
        result.record(FileOutcome::Failed(failure(FailureKind::Locked)));
        report.folders.push(FolderReport {
            name: "Documents".to_string(),
            source_path: PathBuf::from("/src/docs"),
            sensitivity: Sensitivity::Normal,
            outcome: FolderOutcome::Copied(result),
        });
        assert_eq!(
            report.compute_exit_status(),
            ExitStatus::CompletedWithFailures
        );
        assert_eq!(ExitStatus::CompletedWithFailures.code(), 2);
    }

    #[test]
    fn test_report_serializes_folder_status() -> Result<()> {
        let report = FolderReport {
            name: "Photos".to_string(),
            source_path: PathBuf::from("/src/missing"),
            sensitivity: Sensitivity::Normal,
            outcome: FolderOutcome::Skipped {
                reason: SkipReason::SourceNotFound,
            },
        };

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "source_not_found");

        Ok(())
    }
}

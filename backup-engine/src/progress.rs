//! Copy progress reporting and human-readable formatting.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default cadence: one event per this many finished files
pub const DEFAULT_PROGRESS_INTERVAL: usize = 10;

/// Progress of one folder's copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyProgress {
    /// Logical folder being copied
    pub folder: String,

    /// Files attempted so far (copied, skipped or failed)
    pub files_done: usize,

    /// Total number of enumerated files
    pub total_files: usize,

    /// Percentage complete (0-100)
    pub percent_complete: f64,
}

impl CopyProgress {
    pub fn new(folder: &str, files_done: usize, total_files: usize) -> Self {
        let percent_complete = if total_files > 0 {
            (files_done as f64 / total_files as f64) * 100.0
        } else {
            100.0
        };

        Self {
            folder: folder.to_string(),
            files_done,
            total_files,
            percent_complete,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.files_done >= self.total_files
    }
}

/// Receives progress events; called from the single aggregating task.
pub type ProgressSink = Arc<dyn Fn(CopyProgress) + Send + Sync>;

/// Whether the `done`-th finished file should produce an event.
///
/// Fires every `interval` files and always on the last one.
pub fn should_emit(done: usize, total: usize, interval: usize) -> bool {
    total > 0 && (done == total || (interval > 0 && done % interval == 0))
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_progress_percent() {
        let progress = CopyProgress::new("Documents", 5, 20);
        assert!((progress.percent_complete - 25.0).abs() < 0.01);
        assert!(!progress.is_complete());

        let done = CopyProgress::new("Documents", 20, 20);
        assert!((done.percent_complete - 100.0).abs() < 0.01);
        assert!(done.is_complete());
    }

    #[test]
    fn test_should_emit_cadence() {
        let emitted: Vec<usize> = (1..=25).filter(|n| should_emit(*n, 25, 10)).collect();
        assert_eq!(emitted, vec![10, 20, 25]);
    }

    #[test]
    fn test_should_emit_nothing_for_empty_folder() {
        assert!(!should_emit(0, 0, 10));
    }

    #[test]
    fn test_should_emit_final_only_for_small_folder() {
        let emitted: Vec<usize> = (1..=3).filter(|n| should_emit(*n, 3, 10)).collect();
        assert_eq!(emitted, vec![3]);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}

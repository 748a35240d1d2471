//! Folder replication with per-file outcomes.
//!
//! A folder is enumerated once into an arena of [`FileTask`]s. A fixed pool
//! of workers claims tasks by index and sends each [`FileOutcome`] to a single
//! aggregating loop, which owns the folder result and the progress counter.
//! Cancellation is observed between files only; a copy in flight always
//! finishes.

use super::report::{FileFailure, FileOutcome, FolderCopyResult};
use crate::catalog::ResolvedFolder;
use crate::fs::metadata::FileMetadata;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::progress::{format_bytes, should_emit, CopyProgress, ProgressSink, DEFAULT_PROGRESS_INTERVAL};
use crate::utils::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One planned file copy.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
}

/// Copies resolved folders into the session tree.
#[derive(Debug, Clone)]
pub struct CopyEngine {
    max_workers: usize,
    progress_interval: usize,
    cancel_token: CancellationToken,
}

impl CopyEngine {
    pub fn new(max_workers: usize, cancel_token: CancellationToken) -> Self {
        Self {
            max_workers: max_workers.max(1),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            cancel_token,
        }
    }

    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Replicate `folder` under `dest_subdir`.
    ///
    /// Per-file problems are recorded in the result; only a failed worker
    /// join propagates as an error.
    pub async fn copy_folder(
        &self,
        folder: &ResolvedFolder,
        dest_subdir: &Path,
        progress: Option<ProgressSink>,
    ) -> Result<FolderCopyResult> {
        let name = folder.name().to_string();
        let source_root = folder.spec.source_path.clone();

        // Enumeration pass (blocking directory walk)
        let walk = tokio::task::spawn_blocking(move || {
            walk_directory(&source_root, &WalkOptions::default())
        })
        .await?;

        let tasks: Vec<FileTask> = walk
            .files
            .iter()
            .map(|file| FileTask {
                source: file.path.clone(),
                destination: dest_subdir.join(&file.relative_path),
                size: file.size,
            })
            .collect();

        let total = tasks.len();
        let mut result = FolderCopyResult::new(total);

        for error in &walk.errors {
            warn!("Cannot enumerate {}: {}", error.path.display(), error.error);
            result.record_enumeration_failure(FileFailure::from_io(&error.path, &error.error));
        }

        if total == 0 {
            info!("{}: nothing to copy", name);
            return Ok(result);
        }

        info!(
            "Copying {}: {} files, {} (workers: {})",
            name,
            total,
            format_bytes(walk.total_size()),
            self.max_workers.min(total)
        );

        let tasks = Arc::new(tasks);
        let cursor = Arc::new(AtomicUsize::new(0));
        let worker_count = self.max_workers.min(total);
        let (tx, mut rx) = mpsc::channel::<(usize, FileOutcome)>(worker_count * 4);

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let tasks = Arc::clone(&tasks);
            let cursor = Arc::clone(&cursor);
            let cancel = self.cancel_token.clone();
            let tx = tx.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(task) = tasks.get(idx) else {
                        break;
                    };
                    let outcome = copy_file(task).await;
                    if tx.send((idx, outcome)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut seen = vec![false; total];
        let mut done = 0usize;
        let emit = |done: usize| {
            if let Some(sink) = &progress {
                if should_emit(done, total, self.progress_interval) {
                    sink(CopyProgress::new(&name, done, total));
                }
            }
        };

        while let Some((idx, outcome)) = rx.recv().await {
            seen[idx] = true;
            if let FileOutcome::Failed(failure) = &outcome {
                warn!("Could not copy {}: {}", failure.path.display(), failure.reason);
            }
            result.record(outcome);
            done += 1;
            emit(done);
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Copy worker for {} ended abnormally: {}", name, e);
            }
        }

        // Tasks never claimed (cancellation) or lost with a worker
        let cancelled = self.cancel_token.is_cancelled();
        for (idx, task) in tasks.iter().enumerate() {
            if seen[idx] {
                continue;
            }
            let outcome = if cancelled {
                FileOutcome::Skipped(FileFailure::cancelled(&task.source))
            } else {
                FileOutcome::Failed(FileFailure::from_io(
                    &task.source,
                    &std::io::Error::new(std::io::ErrorKind::Other, "copy worker aborted"),
                ))
            };
            result.record(outcome);
            done += 1;
            emit(done);
        }

        info!(
            "{}: {} copied, {} skipped, {} failed ({})",
            name,
            result.copied,
            result.skipped,
            result.failed,
            format_bytes(result.bytes_copied)
        );

        Ok(result)
    }
}

/// Copy one file with its metadata; never returns an error.
async fn copy_file(task: &FileTask) -> FileOutcome {
    if let Some(parent) = task.destination.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return FileOutcome::Failed(FileFailure::from_io(&task.source, &e));
        }
    }

    match tokio::fs::copy(&task.source, &task.destination).await {
        Ok(bytes) => {
            // Metadata is best effort
            if let Err(e) = FileMetadata::from_path(&task.source)
                .and_then(|metadata| metadata.apply_to_path(&task.destination))
            {
                debug!(
                    "Metadata not preserved for {}: {}",
                    task.destination.display(),
                    e
                );
            }
            debug!("Copied {} ({} bytes)", task.source.display(), bytes);
            FileOutcome::Copied { bytes }
        }
        Err(e) => {
            // Drop a truncated copy, if any
            let _ = tokio::fs::remove_file(&task.destination).await;

            let vanished = e.kind() == std::io::ErrorKind::NotFound
                && !tokio::fs::try_exists(&task.source).await.unwrap_or(true);
            if vanished {
                debug!("Source vanished before copy: {}", task.source.display());
                FileOutcome::Skipped(FileFailure::from_io(&task.source, &e))
            } else {
                FileOutcome::Failed(FileFailure::from_io(&task.source, &e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FolderSpec, SourceKind};
    use crate::executor::report::FailureKind;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn folder(name: &str, path: &Path) -> ResolvedFolder {
        ResolvedFolder {
            spec: FolderSpec::normal(name, path),
            kind: SourceKind::Directory,
        }
    }

    fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<CopyProgress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let sink: ProgressSink = Arc::new(move |p| captured.lock().unwrap().push(p));
        (sink, events)
    }

    #[tokio::test]
    async fn test_copy_preserves_structure_and_bytes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("docs");
        let dst = temp_dir.path().join("dest");
        fs::create_dir_all(src.join("nested/deeper"))?;
        fs::create_dir(&dst)?;
        fs::write(src.join("a.txt"), vec![b'a'; 100])?;
        fs::write(src.join("nested/b.txt"), vec![b'b'; 200])?;
        fs::write(src.join("nested/deeper/c.txt"), vec![b'c'; 50])?;

        let engine = CopyEngine::new(4, CancellationToken::new());
        let result = engine.copy_folder(&folder("Documents", &src), &dst, None).await?;

        assert_eq!(result.total_files, 3);
        assert_eq!(result.copied, 3);
        assert_eq!(result.failed, 0);
        assert_eq!(result.bytes_copied, 350);
        assert_eq!(fs::read(dst.join("nested/deeper/c.txt"))?, vec![b'c'; 50]);

        Ok(())
    }

    #[tokio::test]
    async fn test_progress_every_ten_files_and_on_completion() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src)?;
        fs::create_dir(&dst)?;
        for i in 0..25 {
            fs::write(src.join(format!("f{:02}.txt", i)), b"x")?;
        }

        let (sink, events) = recording_sink();
        let engine = CopyEngine::new(3, CancellationToken::new());
        engine.copy_folder(&folder("Music", &src), &dst, Some(sink)).await?;

        let events = events.lock().unwrap();
        let done: Vec<usize> = events.iter().map(|p| p.files_done).collect();
        assert_eq!(done, vec![10, 20, 25]);
        assert!(events.iter().all(|p| p.total_files == 25));
        assert!((events[2].percent_complete - 100.0).abs() < 0.01);

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_folder_emits_no_progress() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("empty");
        fs::create_dir(&src)?;

        let (sink, events) = recording_sink();
        let engine = CopyEngine::new(2, CancellationToken::new());
        let result = engine
            .copy_folder(&folder("Videos", &src), temp_dir.path(), Some(sink))
            .await?;

        assert_eq!(result, FolderCopyResult::new(0));
        assert!(events.lock().unwrap().is_empty());

        Ok(())
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_one_unreadable_file_does_not_stop_folder() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src)?;
        fs::create_dir(&dst)?;
        for i in 0..5 {
            fs::write(src.join(format!("ok{}.txt", i)), b"fine")?;
        }
        let locked = src.join("locked.txt");
        fs::write(&locked, b"secret")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        // Privileged users can read anyway
        if fs::read(&locked).is_ok() {
            return Ok(());
        }

        let engine = CopyEngine::new(2, CancellationToken::new());
        let result = engine.copy_folder(&folder("Documents", &src), &dst, None).await?;

        assert_eq!(result.copied, 5);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].path, locked);
        assert_eq!(result.failures[0].kind, FailureKind::PermissionDenied);
        assert!(!dst.join("locked.txt").exists());

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644))?;
        Ok(())
    }

    #[tokio::test]
    async fn test_blocked_destination_subfolder_fails_only_its_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(src.join("nested"))?;
        fs::create_dir(&dst)?;
        for i in 0..4 {
            fs::write(src.join(format!("ok{}.txt", i)), b"fine")?;
        }
        let inner = src.join("nested/inner.txt");
        fs::write(&inner, b"cannot land")?;
        // A regular file where the copy needs a directory
        fs::write(dst.join("nested"), b"in the way")?;

        let engine = CopyEngine::new(2, CancellationToken::new());
        let result = engine.copy_folder(&folder("Documents", &src), &dst, None).await?;

        assert_eq!(result.total_files, 5);
        assert_eq!(result.copied, 4);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].path, inner);
        assert!(dst.join("ok3.txt").is_file());
        assert_eq!(fs::read(dst.join("nested"))?, b"in the way");

        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src)?;
        fs::create_dir(&dst)?;
        for i in 0..4 {
            fs::write(src.join(format!("{}.txt", i)), b"data")?;
        }

        let token = CancellationToken::new();
        token.cancel();
        let (sink, events) = recording_sink();
        let engine = CopyEngine::new(2, token);
        let result = engine.copy_folder(&folder("Desktop", &src), &dst, Some(sink)).await?;

        assert_eq!(result.copied, 0);
        assert_eq!(result.skipped, 4);
        assert!(result
            .skipped_files
            .iter()
            .all(|s| s.kind == FailureKind::Cancelled));
        assert_eq!(result.attempted(), result.total_files);
        assert_eq!(events.lock().unwrap().last().map(|p| p.files_done), Some(4));

        Ok(())
    }

    #[tokio::test]
    async fn test_single_file_source() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let bookmarks = temp_dir.path().join("Bookmarks");
        let dst = temp_dir.path().join("dst");
        fs::write(&bookmarks, b"{\"roots\":{}}")?;
        fs::create_dir(&dst)?;

        let resolved = ResolvedFolder {
            spec: FolderSpec::normal("Browser", &bookmarks),
            kind: SourceKind::File,
        };
        let engine = CopyEngine::new(1, CancellationToken::new());
        let result = engine.copy_folder(&resolved, &dst, None).await?;

        assert_eq!(result.copied, 1);
        assert_eq!(fs::read(dst.join("Bookmarks"))?, b"{\"roots\":{}}");

        Ok(())
    }
}

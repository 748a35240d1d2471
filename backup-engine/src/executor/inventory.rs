//! Inventory construction over the finished destination tree.
//!
//! The walk covers what actually landed on disk, not what was planned.
//! Hashing runs on the blocking pool, bounded by a semaphore.

use super::manifest::{FileRecord, Inventory, UnreadableRecord, MANIFEST_FILE_NAME};
use super::report::REPORT_FILE_NAME;
use crate::fs::walker::{portable_path, walk_directory, WalkOptions, WalkOutcome};
use crate::utils::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 of a byte slice, hex-encoded.
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stream a file through SHA-256; returns (bytes read, hex digest).
pub fn digest_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        size += n as u64;
    }

    Ok((size, hex::encode(hasher.finalize())))
}

/// Builds the manifest for a session tree.
#[derive(Debug, Clone)]
pub struct InventoryBuilder {
    max_workers: usize,
}

impl InventoryBuilder {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Hash every file under `session_path`.
    ///
    /// Files that cannot be read become [`UnreadableRecord`]s; the build
    /// itself only fails if the blocking walk cannot be joined.
    pub async fn build(&self, session_path: &Path, session_id: &str) -> Result<Inventory> {
        let walk = walk_session(session_path).await?;
        self.digest_walk(session_path, session_id, walk).await
    }

    /// Hash the files of an earlier walk; anything gone or unreadable by
    /// now is recorded as unreadable.
    pub(crate) async fn digest_walk(
        &self,
        session_path: &Path,
        session_id: &str,
        walk: WalkOutcome,
    ) -> Result<Inventory> {
        let mut files = Vec::with_capacity(walk.files.len());
        let mut unreadable = Vec::new();

        for error in walk.errors {
            warn!("Inventory cannot read {}: {}", error.path.display(), error.error);
            unreadable.push(UnreadableRecord {
                relative_path: relative_to(session_path, &error.path),
                reason: error.error.to_string(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(walk.files.len());

        for file in walk.files {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let relative_path = portable_path(&file.relative_path);
            let path = file.path;

            handles.push((
                relative_path,
                path.clone(),
                tokio::task::spawn_blocking(move || {
                    let digest = digest_file(&path);
                    drop(permit);
                    digest
                }),
            ));
        }

        for (relative_path, path, handle) in handles {
            match handle.await {
                Ok(Ok((size_bytes, digest_hex))) => {
                    debug!("{} {} ({} bytes)", digest_hex, relative_path, size_bytes);
                    files.push(FileRecord {
                        relative_path,
                        size_bytes,
                        digest_hex,
                    });
                }
                Ok(Err(e)) => {
                    warn!("Inventory cannot read {}: {}", path.display(), e);
                    unreadable.push(UnreadableRecord {
                        relative_path,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Hashing task for {} failed: {}", path.display(), e);
                    unreadable.push(UnreadableRecord {
                        relative_path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let inventory = Inventory::new(session_id, files, unreadable);
        info!(
            "Inventory built: {} files, {:.2} MB, {} unreadable",
            inventory.total_files,
            inventory.total_size_mb,
            inventory.unreadable.len()
        );

        Ok(inventory)
    }
}

/// Walk a session tree, leaving out the session's own artifacts.
pub(crate) async fn walk_session(session_path: &Path) -> Result<WalkOutcome> {
    let root = session_path.to_path_buf();
    let walk = tokio::task::spawn_blocking(move || {
        let options = WalkOptions {
            skip_root_names: vec![MANIFEST_FILE_NAME.to_string(), REPORT_FILE_NAME.to_string()],
            ..WalkOptions::default()
        };
        walk_directory(&root, &options)
    })
    .await?;

    Ok(walk)
}

fn relative_to(root: &Path, path: &Path) -> String {
    let relative: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    portable_path(&relative)
}

//! Destination tree skeleton and the advisory destination lock.
//!
//! Layout: `<destination>/<product>/Backup_<session_id>/<logical folder>/...`

use crate::utils::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix of every session directory
pub const SESSION_DIR_PREFIX: &str = "Backup_";

/// Lock file guarding a product root against concurrent sessions
pub const LOCK_FILE_NAME: &str = ".backup.lock";

/// Timestamp-derived session identifier, e.g. `20260118_142501`.
pub fn new_session_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Builds the directory skeleton of a backup set.
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    product_root: PathBuf,
}

impl LayoutBuilder {
    pub fn new(destination_root: &Path, product_name: &str) -> Self {
        Self {
            product_root: destination_root.join(product_name),
        }
    }

    pub fn product_root(&self) -> &Path {
        &self.product_root
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.product_root
            .join(format!("{}{}", SESSION_DIR_PREFIX, session_id))
    }

    /// Create the session root and one subdirectory per logical folder.
    ///
    /// The session root must not exist yet.
    pub fn materialize(&self, session_id: &str, folder_names: &[String]) -> Result<PathBuf> {
        fs::create_dir_all(&self.product_root)
            .map_err(|e| EngineError::unwritable(&self.product_root, e))?;

        let session_path = self.session_path(session_id);
        match fs::create_dir(&session_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(EngineError::SessionExists(session_path));
            }
            Err(e) => return Err(EngineError::unwritable(&session_path, e)),
        }

        for name in folder_names {
            let dir = session_path.join(name);
            fs::create_dir(&dir).map_err(|e| EngineError::unwritable(&dir, e))?;
            debug!("Created folder {}", dir.display());
        }

        info!(
            "Backup structure created at {} ({} folders)",
            session_path.display(),
            folder_names.len()
        );

        Ok(session_path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    session_id: String,
    started_at: chrono::DateTime<chrono::Utc>,
}

/// Exclusive claim on a product root, released on drop.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    pub fn acquire(product_root: &Path, session_id: &str) -> Result<Self> {
        fs::create_dir_all(product_root).map_err(|e| EngineError::unwritable(product_root, e))?;

        let path = product_root.join(LOCK_FILE_NAME);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(EngineError::SessionLocked(path));
            }
            Err(e) => return Err(EngineError::unwritable(&path, e)),
        };

        let info = LockInfo {
            pid: std::process::id(),
            session_id: session_id.to_string(),
            started_at: chrono::Utc::now(),
        };
        let lock = Self { path };
        serde_json::to_writer(&mut file, &info)?;
        file.flush()
            .map_err(|e| EngineError::unwritable(&lock.path, e))?;

        debug!("Acquired destination lock {}", lock.path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

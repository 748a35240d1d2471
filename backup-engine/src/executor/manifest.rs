//! Inventory manifest types.
//!
//! The manifest is the verification artifact of a backup set: every file
//! under the session root with its size and SHA-256 digest, taken over the
//! plaintext before any encryption. Serialized as `file_inventory.json`.

use crate::utils::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the manifest at the session root
pub const MANIFEST_FILE_NAME: &str = "file_inventory.json";

/// Current manifest layout version
pub const MANIFEST_VERSION: u32 = 1;

/// Digest algorithm recorded in every manifest
pub const DIGEST_ALGORITHM: &str = "sha256";

/// One verified file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path below the session root, `/`-separated
    pub relative_path: String,
    pub size_bytes: u64,
    pub digest_hex: String,
}

/// A file present on disk that could not be read at inventory time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadableRecord {
    pub relative_path: String,
    pub reason: String,
}

/// Backup manifest. Derived totals always match `files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub format_version: u32,
    pub algorithm: String,
    pub session_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub host: String,
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub unreadable: Vec<UnreadableRecord>,
}

impl Inventory {
    /// Build a manifest; records are sorted by path and totals derived.
    pub fn new(
        session_id: &str,
        mut files: Vec<FileRecord>,
        mut unreadable: Vec<UnreadableRecord>,
    ) -> Self {
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        unreadable.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let total_size_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();

        Self {
            format_version: MANIFEST_VERSION,
            algorithm: DIGEST_ALGORITHM.to_string(),
            session_id: session_id.to_string(),
            created_at: chrono::Utc::now(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            total_files: files.len(),
            total_size_bytes,
            total_size_mb: total_size_bytes as f64 / (1024.0 * 1024.0),
            files,
            unreadable,
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.files
            .binary_search_by(|f| f.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.files[i])
    }

    /// Check the derived totals against the record list.
    pub fn is_consistent(&self) -> bool {
        self.total_files == self.files.len()
            && self.total_size_bytes == self.files.iter().map(|f| f.size_bytes).sum::<u64>()
    }

    pub fn write_to(&self, session_path: &Path) -> Result<PathBuf> {
        let path = session_path.join(MANIFEST_FILE_NAME);
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}

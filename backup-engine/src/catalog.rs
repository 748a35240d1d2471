//! Backup plan types and source resolution.
//!
//! A [`BackupPlan`] names logical folders and where their data lives. The
//! catalog turns it into the set of sources that actually exist on this
//! machine; anything missing is skipped, never treated as an error.

use crate::executor::manifest::MANIFEST_FILE_NAME;
use crate::executor::report::REPORT_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Whether a folder's copy is eligible for post-copy encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    #[default]
    Normal,
    Sensitive,
}

/// One logical folder of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSpec {
    pub logical_name: String,
    pub source_path: PathBuf,
    #[serde(default)]
    pub sensitivity: Sensitivity,
}

impl FolderSpec {
    pub fn new(
        logical_name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        sensitivity: Sensitivity,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            source_path: source_path.into(),
            sensitivity,
        }
    }

    pub fn normal(logical_name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self::new(logical_name, source_path, Sensitivity::Normal)
    }

    pub fn sensitive(logical_name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self::new(logical_name, source_path, Sensitivity::Sensitive)
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitivity == Sensitivity::Sensitive
    }
}

/// Immutable description of one backup invocation.
#[derive(Clone)]
pub struct BackupPlan {
    folders: Vec<FolderSpec>,
    destination_root: PathBuf,
    password: Option<String>,
}

impl BackupPlan {
    /// An empty password is treated the same as no password.
    pub fn new(
        destination_root: impl Into<PathBuf>,
        folders: Vec<FolderSpec>,
        password: Option<String>,
    ) -> Self {
        Self {
            folders,
            destination_root: destination_root.into(),
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn folders(&self) -> &[FolderSpec] {
        &self.folders
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for BackupPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupPlan")
            .field("folders", &self.folders)
            .field("destination_root", &self.destination_root)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Shape of an existing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Directory,
    File,
}

/// A folder whose source exists and can be read.
#[derive(Debug, Clone)]
pub struct ResolvedFolder {
    pub spec: FolderSpec,
    pub kind: SourceKind,
}

impl ResolvedFolder {
    pub fn name(&self) -> &str {
        &self.spec.logical_name
    }
}

/// Why a planned folder was left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SourceNotFound,
    Unreadable(String),
    InvalidName,
    DuplicateName,
    /// The session was cancelled before this folder was reached
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SourceNotFound => write!(f, "source not found"),
            SkipReason::Unreadable(e) => write!(f, "source unreadable: {}", e),
            SkipReason::InvalidName => write!(f, "logical name is not a usable folder name"),
            SkipReason::DuplicateName => write!(f, "logical name already used by another folder"),
            SkipReason::Cancelled => write!(f, "backup cancelled before this folder"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedFolder {
    pub spec: FolderSpec,
    pub reason: SkipReason,
}

/// Outcome of resolving a plan.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub resolved: Vec<ResolvedFolder>,
    pub skipped: Vec<SkippedFolder>,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Logical names of resolved folders tagged sensitive.
    pub fn sensitive_names(&self) -> Vec<String> {
        self.resolved
            .iter()
            .filter(|f| f.spec.is_sensitive())
            .map(|f| f.spec.logical_name.clone())
            .collect()
    }
}

/// Resolve every folder of the plan, in plan order.
///
/// A folder is included whole or not at all.
pub fn resolve(plan: &BackupPlan) -> Catalog {
    let mut catalog = Catalog::default();
    let mut seen = HashSet::new();

    for spec in plan.folders() {
        let outcome = if !is_valid_logical_name(&spec.logical_name) {
            Err(SkipReason::InvalidName)
        } else if seen.contains(&spec.logical_name) {
            Err(SkipReason::DuplicateName)
        } else {
            inspect_source(&spec.source_path)
        };

        match outcome {
            Ok(kind) => {
                info!(
                    "Resolved {}: {} ({:?})",
                    spec.logical_name,
                    spec.source_path.display(),
                    kind
                );
                seen.insert(spec.logical_name.clone());
                catalog.resolved.push(ResolvedFolder {
                    spec: spec.clone(),
                    kind,
                });
            }
            Err(reason) => {
                warn!(
                    "Skipping {} ({}): {}",
                    spec.logical_name,
                    spec.source_path.display(),
                    reason
                );
                catalog.skipped.push(SkippedFolder {
                    spec: spec.clone(),
                    reason,
                });
            }
        }
    }

    catalog
}

/// Check existence and readability of a source path.
fn inspect_source(path: &Path) -> Result<SourceKind, SkipReason> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SkipReason::SourceNotFound)
        }
        Err(e) => return Err(SkipReason::Unreadable(e.to_string())),
    };

    if metadata.is_dir() {
        std::fs::read_dir(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        Ok(SourceKind::Directory)
    } else {
        std::fs::File::open(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        Ok(SourceKind::File)
    }
}

/// Logical names become directory names under the session root, next to
/// the session's own artifacts.
fn is_valid_logical_name(name: &str) -> bool {
    if name == MANIFEST_FILE_NAME || name == REPORT_FILE_NAME {
        return false;
    }

    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

//! Directory traversal for copy and inventory passes.
//!
//! Unlike a plain `WalkDir` loop, a walk never stops at the first unreadable
//! entry: every problem is collected next to the files that were found so the
//! caller can report it.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// Exact file names to leave out at depth 1 (session artifacts)
    pub skip_root_names: Vec<String>,
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Is this a symlink?
    pub is_symlink: bool,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// For symlinks, resolves to the target to get the real file size.
    /// Returns None if the symlink target is a directory or cannot be resolved.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata().map_err(std::io::Error::from)?;
        let path = entry.path().to_path_buf();
        let is_symlink = raw_metadata.is_symlink();

        // A root that is itself a file keeps its own name
        let relative_path = match path.strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => PathBuf::from(path.file_name().unwrap_or(path.as_os_str())),
        };

        let size = if is_symlink {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved.len(),
                // Symlink to directory or broken symlink
                _ => return Ok(None),
            }
        } else if raw_metadata.is_file() {
            raw_metadata.len()
        } else {
            // Sockets, fifos and devices are not backed up
            return Ok(None);
        };

        Ok(Some(Self {
            path,
            relative_path,
            size,
            is_symlink,
        }))
    }
}

/// An entry the walk could not read.
#[derive(Debug)]
pub struct WalkError {
    pub path: PathBuf,
    pub error: std::io::Error,
}

/// Files found by a walk plus whatever could not be enumerated.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<FileInfo>,
    pub errors: Vec<WalkError>,
}

impl WalkOutcome {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Walk a directory tree and collect all regular files.
///
/// # Example
/// ```no_run
/// use backup_engine::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let outcome = walk_directory(Path::new("/data"), &WalkOptions::default());
/// println!("Found {} files", outcome.files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> WalkOutcome {
    let mut outcome = WalkOutcome::default();

    let mut walker = WalkDir::new(root).follow_links(options.follow_links);

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                outcome.errors.push(WalkError {
                    path,
                    error: e.into(),
                });
                continue;
            }
        };

        if should_skip(&entry, &options.skip_root_names) {
            continue;
        }

        if entry.file_type().is_dir() {
            continue;
        }

        match FileInfo::from_entry(&entry, root) {
            Ok(Some(info)) => outcome.files.push(info),
            Ok(None) => {}
            Err(error) => outcome.errors.push(WalkError {
                path: entry.path().to_path_buf(),
                error,
            }),
        }
    }

    outcome
}

fn should_skip(entry: &DirEntry, names: &[String]) -> bool {
    entry.depth() == 1
        && names
            .iter()
            .any(|name| entry.file_name().to_string_lossy() == name.as_str())
}

/// Relative path rendered with `/` separators, as stored in manifests.
pub fn portable_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let outcome = walk_directory(temp_dir.path(), &WalkOptions::default());
        assert_eq!(outcome.files.len(), 0);
        assert!(outcome.errors.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content22")?;

        let outcome = walk_directory(temp_dir.path(), &WalkOptions::default());
        assert_eq!(outcome.files.len(), 2);
        assert_eq!(outcome.total_size(), 17);

        let mut rel: Vec<_> = outcome
            .files
            .iter()
            .map(|f| portable_path(&f.relative_path))
            .collect();
        rel.sort();
        assert_eq!(rel, vec!["file1.txt", "subdir/file2.txt"]);

        Ok(())
    }

    #[test]
    fn test_walk_keeps_dotfiles() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file.txt"), b"keep")?;
        fs::write(temp_dir.path().join(".DS_Store"), b"keep too")?;

        let outcome = walk_directory(temp_dir.path(), &WalkOptions::default());
        assert_eq!(outcome.files.len(), 2);

        Ok(())
    }

    #[test]
    fn test_skip_root_names_only_at_top_level() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("file_inventory.json"), b"{}")?;
        fs::write(temp_dir.path().join("nested/file_inventory.json"), b"{}")?;

        let options = WalkOptions {
            skip_root_names: vec!["file_inventory.json".to_string()],
            ..WalkOptions::default()
        };
        let outcome = walk_directory(temp_dir.path(), &options);
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(
            portable_path(&outcome.files[0].relative_path),
            "nested/file_inventory.json"
        );

        Ok(())
    }

    #[test]
    fn test_walk_single_file_root() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("Bookmarks");
        fs::write(&file, b"12345")?;

        let outcome = walk_directory(&file, &WalkOptions::default());
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].relative_path, PathBuf::from("Bookmarks"));
        assert_eq!(outcome.files[0].size, 5);

        Ok(())
    }

    #[test]
    fn test_walk_missing_root_reports_error() {
        let outcome = walk_directory(
            Path::new("/definitely/not/here/for/walk"),
            &WalkOptions::default(),
        );
        assert!(outcome.files.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }
}

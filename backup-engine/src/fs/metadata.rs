//! File metadata carried from source to destination.
//!
//! Permissions and access/modification times are captured from the source
//! and re-applied to the copy. Failures here never fail the file copy.

use filetime::FileTime;
use std::fs;
use std::path::Path;

/// Metadata re-applied to a copied file
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: FileTime,

    /// Last access time
    pub accessed: FileTime,

    /// File permissions (Unix mode bits)
    pub permissions: Option<u32>,

    /// Read-only flag (used where mode bits are unavailable)
    pub readonly: bool,
}

impl FileMetadata {
    /// Extract metadata from a file path
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let permissions = None;

        Ok(Self {
            size: metadata.len(),
            modified: FileTime::from_last_modification_time(&metadata),
            accessed: FileTime::from_last_access_time(&metadata),
            permissions,
            readonly: metadata.permissions().readonly(),
        })
    }

    /// Apply this metadata to a file.
    ///
    /// Times are set before permissions so a read-only mode cannot block them.
    pub fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        filetime::set_file_times(path, self.accessed, self.modified)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = self.permissions {
                fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
            }
        }

        #[cfg(not(unix))]
        {
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_readonly(self.readonly);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;

        assert_eq!(metadata.size, 12);
        assert!(metadata.modified.unix_seconds() > 0);

        Ok(())
    }

    #[test]
    fn test_modified_time_preservation() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src.txt");
        let dst = temp_dir.path().join("dst.txt");
        fs::write(&src, b"data")?;
        fs::write(&dst, b"data")?;

        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_times(&src, old, old)?;

        FileMetadata::from_path(&src)?.apply_to_path(&dst)?;

        let copied = FileMetadata::from_path(&dst)?;
        assert_eq!(copied.modified.unix_seconds(), 1_600_000_000);

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_permissions_preservation() -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src.txt");
        let dst = temp_dir.path().join("dst.txt");
        fs::write(&src, b"data")?;
        fs::write(&dst, b"data")?;
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640))?;

        FileMetadata::from_path(&src)?.apply_to_path(&dst)?;

        let mode = fs::metadata(&dst)?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);

        Ok(())
    }
}

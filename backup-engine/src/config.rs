//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file; every section is optional. When no
//! folders are configured the plan falls back to the usual per-user folders.

use crate::catalog::{BackupPlan, FolderSpec, Sensitivity};
use crate::executor::encrypt::{KeyDerivation, DEFAULT_ENCRYPTED_SUFFIX};
use crate::executor::{SessionSettings, DEFAULT_MAX_WORKERS, DEFAULT_PRODUCT_NAME};
use crate::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::utils::EngineError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub encryption: EncryptionConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub folders: Vec<FolderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory created under the destination root
    #[serde(default = "default_product_name")]
    pub product_name: String,

    /// Concurrent copy and hashing workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Emit a progress event every N files
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Marker appended to encrypted file names
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// sha256 (same key for the same password) or salted (per-run salt)
    #[serde(default)]
    pub key_derivation: KeyDerivation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One `[[folders]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub sensitive: bool,
}

impl From<&FolderConfig> for FolderSpec {
    fn from(folder: &FolderConfig) -> Self {
        let sensitivity = if folder.sensitive {
            Sensitivity::Sensitive
        } else {
            Sensitivity::Normal
        };
        FolderSpec::new(&folder.name, &folder.path, sensitivity)
    }
}

// Default values
fn default_product_name() -> String {
    DEFAULT_PRODUCT_NAME.to_string()
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_progress_interval() -> usize {
    DEFAULT_PROGRESS_INTERVAL
}

fn default_suffix() -> String {
    DEFAULT_ENCRYPTED_SUFFIX.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            product_name: default_product_name(),
            max_workers: default_max_workers(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            key_derivation: KeyDerivation::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.engine.max_workers == 0 {
            return Err(EngineError::Config("max_workers must be at least 1".to_string()));
        }

        let mut components = Path::new(&self.engine.product_name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(EngineError::Config(format!(
                "product_name must be a single directory name, got {:?}",
                self.engine.product_name
            )));
        }

        let suffix = &self.encryption.suffix;
        if suffix.is_empty() || suffix.contains(['/', '\\']) {
            return Err(EngineError::Config(format!(
                "encryption suffix must be a non-empty file name fragment, got {:?}",
                suffix
            )));
        }

        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            product_name: self.engine.product_name.clone(),
            max_workers: self.engine.max_workers,
            progress_interval: self.engine.progress_interval,
            encrypted_suffix: self.encryption.suffix.clone(),
            key_derivation: self.encryption.key_derivation,
        }
    }

    /// Configured folders, or the per-user defaults when none are listed.
    pub fn folder_specs(&self) -> Vec<FolderSpec> {
        if self.folders.is_empty() {
            default_folders()
        } else {
            self.folders.iter().map(FolderSpec::from).collect()
        }
    }

    /// Build the plan for one invocation.
    ///
    /// Folders given explicitly (e.g. on the command line) replace the
    /// configured ones.
    pub fn to_plan(
        &self,
        destination_root: &Path,
        explicit_folders: Vec<FolderSpec>,
        password: Option<String>,
    ) -> BackupPlan {
        let folders = if explicit_folders.is_empty() {
            self.folder_specs()
        } else {
            explicit_folders
        };
        BackupPlan::new(destination_root, folders, password)
    }
}

/// The standard per-user folders that exist on this platform.
pub fn default_folders() -> Vec<FolderSpec> {
    [
        ("Documents", dirs::document_dir()),
        ("Pictures", dirs::picture_dir()),
        ("Videos", dirs::video_dir()),
        ("Desktop", dirs::desktop_dir()),
        ("Downloads", dirs::download_dir()),
        ("Music", dirs::audio_dir()),
    ]
    .into_iter()
    .filter_map(|(name, path)| path.map(|p| FolderSpec::normal(name, p)))
    .collect()
}

/// Parse a `NAME=PATH` folder argument.
pub fn parse_folder_arg(arg: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got {:?}", arg))?;

    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got {:?}", arg));
    }

    Ok((name.to_string(), PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() -> Result<(), toml::de::Error> {
        let config: Config = toml::from_str("")?;

        assert_eq!(config.engine.product_name, "PC_Backup");
        assert_eq!(config.engine.max_workers, 8);
        assert_eq!(config.engine.progress_interval, 10);
        assert_eq!(config.encryption.suffix, ".encrypted");
        assert_eq!(config.encryption.key_derivation, KeyDerivation::Sha256);
        assert_eq!(config.log.level, "info");
        assert!(config.folders.is_empty());

        Ok(())
    }

    #[test]
    fn test_full_file() -> Result<(), toml::de::Error> {
        let config: Config = toml::from_str(
            r#"
            [engine]
            product_name = "HomeBackup"
            max_workers = 2

            [encryption]
            key_derivation = "salted"

            [[folders]]
            name = "Documents"
            path = "/home/user/Documents"

            [[folders]]
            name = "WiFiPasswords"
            path = "/home/user/.wifi"
            sensitive = true
            "#,
        )?;

        assert_eq!(config.engine.product_name, "HomeBackup");
        assert_eq!(config.engine.max_workers, 2);
        assert_eq!(config.engine.progress_interval, 10);
        assert_eq!(config.encryption.key_derivation, KeyDerivation::Salted);

        let specs = config.folder_specs();
        assert_eq!(specs.len(), 2);
        assert!(!specs[0].is_sensitive());
        assert!(specs[1].is_sensitive());
        assert_eq!(specs[1].source_path, PathBuf::from("/home/user/.wifi"));

        let settings = config.session_settings();
        assert_eq!(settings.product_name, "HomeBackup");
        assert_eq!(settings.key_derivation, KeyDerivation::Salted);

        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.engine.max_workers = 0;
        assert!(config.validate().is_err());

        config.engine.max_workers = 4;
        config.engine.product_name = "../escape".to_string();
        assert!(config.validate().is_err());

        config.engine.product_name = "PC_Backup".to_string();
        config.encryption.suffix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_folders_replace_configured() {
        let config = Config {
            folders: vec![FolderConfig {
                name: "Music".to_string(),
                path: PathBuf::from("/music"),
                sensitive: false,
            }],
            ..Config::default()
        };

        let plan = config.to_plan(Path::new("/mnt/usb"), vec![], Some(String::new()));
        assert_eq!(plan.folders()[0].logical_name, "Music");
        assert_eq!(plan.password(), None);

        let plan = config.to_plan(
            Path::new("/mnt/usb"),
            vec![FolderSpec::sensitive("Keys", "/keys")],
            Some("secret".to_string()),
        );
        assert_eq!(plan.folders().len(), 1);
        assert_eq!(plan.folders()[0].logical_name, "Keys");
        assert_eq!(plan.password(), Some("secret"));
    }

    #[test]
    fn test_parse_folder_arg() {
        assert_eq!(
            parse_folder_arg("Documents=/home/me/Documents"),
            Ok(("Documents".to_string(), PathBuf::from("/home/me/Documents")))
        );
        assert_eq!(
            parse_folder_arg("Weird=a=b"),
            Ok(("Weird".to_string(), PathBuf::from("a=b")))
        );
        assert!(parse_folder_arg("no-separator").is_err());
        assert!(parse_folder_arg("=/path").is_err());
    }
}

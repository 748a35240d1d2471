//! Backup Engine Library
//!
//! Point-in-time backup of personal folders to a destination volume:
//! copy with per-file outcomes, SHA-256 inventory manifest, and optional
//! encryption of sensitive folders.

pub mod catalog;
pub mod config;
pub mod events;
pub mod executor;
pub mod fs;
pub mod progress;
pub mod shutdown;
pub mod utils;

// Re-export commonly used types
pub use catalog::{BackupPlan, FolderSpec, Sensitivity};
pub use config::Config;
pub use events::{EventBus, SessionEvent};
pub use executor::report::{ExitStatus, RunReport};
pub use executor::{BackupSession, Phase, SessionSettings};
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;

//! Filesystem helpers: walking, metadata carry-over, destination layout.

pub mod layout;
pub mod metadata;
pub mod walker;

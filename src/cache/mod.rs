//! Persistent build cache.
//!
//! - `warm`: compiled artifacts plus per-module metadata for cold-start reuse
//! - `manifest`: whole-cache validity (engine version, transformer, import map)

mod manifest;
mod warm;

pub use manifest::{BuildManifest, MANIFEST_FILE, ManifestStatus};
pub use warm::{ModuleMeta, PersistJob, WarmCache};

use std::path::PathBuf;
use thiserror::Error;

/// Warm cache I/O errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error at `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("JSON error at `{0}`")]
    Json(PathBuf, #[source] serde_json::Error),

    #[error("cache task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

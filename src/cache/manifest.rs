//! Build manifest deciding whether the warm cache survives a restart.
//!
//! `build.manifest.json` records the engine version, the transformer checksum
//! and the import map fingerprint. Any mismatch discards the whole cache.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::CacheError;

pub const MANIFEST_FILE: &str = "build.manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    pub version: String,
    /// Transformer checksum.
    pub transformer: String,
    /// Import map fingerprint (hex).
    pub import_map: String,
}

/// Outcome of comparing the on-disk manifest with the running engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStatus {
    Fresh,
    Missing,
    Invalid,
    /// Names the first field that differs.
    Changed(&'static str),
}

impl ManifestStatus {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Fresh => "up to date".to_string(),
            Self::Missing => "no build manifest".to_string(),
            Self::Invalid => "invalid build manifest".to_string(),
            Self::Changed(field) => format!("{field} changed"),
        }
    }
}

impl BuildManifest {
    pub fn new(transformer: impl Into<String>, import_map: impl Into<String>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            transformer: transformer.into(),
            import_map: import_map.into(),
        }
    }

    pub fn path(build_dir: &Path) -> PathBuf {
        build_dir.join(MANIFEST_FILE)
    }

    /// Compare against the manifest stored in `build_dir`.
    pub fn check(&self, build_dir: &Path) -> ManifestStatus {
        let Ok(json) = fs::read_to_string(Self::path(build_dir)) else {
            return ManifestStatus::Missing;
        };
        let Ok(stored) = serde_json::from_str::<Self>(&json) else {
            return ManifestStatus::Invalid;
        };

        if stored.version != self.version {
            ManifestStatus::Changed("version")
        } else if stored.transformer != self.transformer {
            ManifestStatus::Changed("transformer")
        } else if stored.import_map != self.import_map {
            ManifestStatus::Changed("import map")
        } else {
            ManifestStatus::Fresh
        }
    }

    pub fn write(&self, build_dir: &Path) -> Result<(), CacheError> {
        fs::create_dir_all(build_dir).map_err(|e| CacheError::Io(build_dir.to_path_buf(), e))?;
        let path = Self::path(build_dir);
        let json =
            serde_json::to_string_pretty(self).map_err(|e| CacheError::Json(path.clone(), e))?;
        fs::write(&path, json).map_err(|e| CacheError::Io(path, e))
    }
}

//! On-disk warm cache of compiled modules.
//!
//! Layout inside the build directory, per module:
//!
//! ```text
//! pages/index.js           # artifact
//! pages/index.meta.json    # { specifier, sourceHash, deps, flags... }
//! pages/index.js.map       # source map (optional)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::CacheError;
use crate::freshness::ContentHash;
use crate::module::{Dependency, Module, ModuleFlags, Specifier};

/// Metadata persisted next to each artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMeta {
    pub specifier: Specifier,
    pub source_hash: ContentHash,
    #[serde(default)]
    pub deps: Vec<Dependency>,
    #[serde(flatten)]
    pub flags: ModuleFlags,
}

impl ModuleMeta {
    pub fn of(module: &Module) -> Self {
        Self {
            specifier: module.specifier.clone(),
            source_hash: module.source_hash,
            deps: module.deps.clone(),
            flags: module.flags.clone(),
        }
    }
}

/// Everything needed to write one module to disk, detached from the registry
/// lock.
#[derive(Debug, Clone)]
pub struct PersistJob {
    pub output_path: PathBuf,
    pub bytes: Vec<u8>,
    pub meta: ModuleMeta,
    pub map: Option<String>,
}

impl PersistJob {
    /// Capture a module for persistence; `None` when there is no output.
    pub fn capture(module: &Module, map: Option<String>) -> Option<Self> {
        Some(Self {
            output_path: module.output_path.clone(),
            bytes: module.output.clone()?,
            meta: ModuleMeta::of(module),
            map,
        })
    }
}

/// Warm cache rooted at one build directory.
#[derive(Debug, Clone)]
pub struct WarmCache {
    build_dir: PathBuf,
}

impl WarmCache {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn artifact_path(&self, output_path: &Path) -> PathBuf {
        self.build_dir.join(output_path)
    }

    /// `pages/index.js` -> `pages/index.meta.json`
    pub fn meta_path(&self, output_path: &Path) -> PathBuf {
        self.build_dir.join(output_path.with_extension("meta.json"))
    }

    /// `pages/index.js` -> `pages/index.js.map`
    pub fn map_path(&self, output_path: &Path) -> PathBuf {
        let mut path = self.artifact_path(output_path).into_os_string();
        path.push(".map");
        PathBuf::from(path)
    }

    // ========================================================================
    // Blocking operations
    // ========================================================================

    /// Read the metadata record for `specifier`.
    ///
    /// Unparsable records and records written for another specifier are
    /// deleted and reported as a miss.
    pub fn read_meta_blocking(&self, specifier: &Specifier) -> Option<ModuleMeta> {
        let path = self.meta_path(&specifier.output_path());
        let json = fs::read_to_string(&path).ok()?;

        match serde_json::from_str::<ModuleMeta>(&json) {
            Ok(meta) if meta.specifier == *specifier && !meta.source_hash.is_empty() => Some(meta),
            Ok(_) => {
                crate::log!("cache"; "removing invalid metadata '{}'", path.display());
                fs::remove_file(&path).ok();
                None
            }
            Err(err) => {
                crate::log!("cache"; "removing corrupt metadata '{}': {}", path.display(), err);
                fs::remove_file(&path).ok();
                None
            }
        }
    }

    pub fn has_artifact_blocking(&self, output_path: &Path) -> bool {
        self.artifact_path(output_path).is_file()
    }

    pub fn read_artifact_blocking(&self, output_path: &Path) -> Result<Vec<u8>, CacheError> {
        let path = self.artifact_path(output_path);
        fs::read(&path).map_err(|e| CacheError::Io(path, e))
    }

    /// Write artifact, metadata and source map.
    pub fn store_blocking(&self, job: &PersistJob) -> Result<(), CacheError> {
        let artifact = self.artifact_path(&job.output_path);
        if let Some(parent) = artifact.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::Io(parent.to_path_buf(), e))?;
        }

        fs::write(&artifact, &job.bytes).map_err(|e| CacheError::Io(artifact.clone(), e))?;

        let meta_path = self.meta_path(&job.output_path);
        let json = serde_json::to_string_pretty(&job.meta)
            .map_err(|e| CacheError::Json(meta_path.clone(), e))?;
        if file_content_matches(&meta_path, &json) {
            crate::debug!("cache"; "metadata unchanged: {}", job.meta.specifier);
        } else {
            fs::write(&meta_path, json).map_err(|e| CacheError::Io(meta_path.clone(), e))?;
        }

        if let Some(map) = &job.map {
            let map_path = self.map_path(&job.output_path);
            fs::write(&map_path, map).map_err(|e| CacheError::Io(map_path.clone(), e))?;
        }

        Ok(())
    }

    /// Delete the whole build directory.
    pub fn clear_blocking(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.build_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(self.build_dir.clone(), e)),
        }
    }

    // ========================================================================
    // Async wrappers (off the executor)
    // ========================================================================

    pub async fn read_meta(&self, specifier: &Specifier) -> Option<ModuleMeta> {
        let cache = self.clone();
        let specifier = specifier.clone();
        tokio::task::spawn_blocking(move || cache.read_meta_blocking(&specifier))
            .await
            .ok()
            .flatten()
    }

    pub async fn has_artifact(&self, output_path: &Path) -> bool {
        let cache = self.clone();
        let output_path = output_path.to_path_buf();
        tokio::task::spawn_blocking(move || cache.has_artifact_blocking(&output_path))
            .await
            .unwrap_or(false)
    }

    pub async fn read_artifact(&self, output_path: &Path) -> Result<Vec<u8>, CacheError> {
        let cache = self.clone();
        let output_path = output_path.to_path_buf();
        tokio::task::spawn_blocking(move || cache.read_artifact_blocking(&output_path)).await?
    }

    pub async fn store(&self, job: PersistJob) -> Result<(), CacheError> {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.store_blocking(&job)).await?
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.clear_blocking()).await?
    }
}

/// Check if file content is the same as new content
fn file_content_matches(path: &Path, content: &str) -> bool {
    path.exists() && fs::read_to_string(path).is_ok_and(|existing| existing == content)
}

//! Engine configuration (`ripple.toml`).
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # [build] and [watch]
//! ├── types/         # ConfigError, diagnostics, field paths
//! ├── import_map.rs  # import_map.json
//! └── mod.rs         # EngineConfig (this file)
//! ```
//!
//! Every field has a default, so an empty or missing `ripple.toml` yields a
//! development setup rooted at the config file's directory.

mod import_map;
pub mod section;
pub mod types;
mod util;

pub use import_map::ImportMap;
pub use section::{BuildConfig, BuildMode, WatchConfig};
pub use types::{ConfigDiagnostic, ConfigDiagnostics, ConfigError, FieldPath};
pub use util::{find_config_file, normalize_path};

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use macros::Config;
use serde::{Deserialize, Serialize};

use crate::log;

/// Root configuration structure representing `ripple.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Config)]
#[config(section = "")]
pub struct EngineConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    #[config(skip)]
    pub config_path: PathBuf,

    /// Project root, the config file's parent (internal use only)
    #[serde(skip)]
    #[config(skip)]
    pub root: PathBuf,

    /// Build settings
    #[serde(default)]
    #[config(sub)]
    pub build: BuildConfig,

    /// File watcher settings
    #[serde(default)]
    #[config(sub)]
    pub watch: WatchConfig,
}

impl EngineConfig {
    /// Locate and load `ripple.toml`, searching upward from the cwd.
    ///
    /// A missing file yields defaults rooted at the cwd.
    pub fn load(config_name: &Path) -> Result<Self> {
        let (mut config, config_path) = match find_config_file(config_name) {
            Some(path) => (Self::from_path(&path)?, path),
            None => {
                let cwd = std::env::current_dir().context("Failed to get current directory")?;
                log!("config"; "{} not found, using defaults", config_name.display());
                (Self::default(), cwd.join(config_name))
            }
        };

        config.config_path = normalize_path(&config_path);
        let root = config
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.finalize(&root);
        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at `root`, paths normalized. Used by tests and embedders.
    pub fn in_dir(root: &Path) -> Self {
        let mut config = Self::default();
        config.config_path = root.join("ripple.toml");
        config.finalize(root);
        config
    }

    /// Parse configuration from TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Toml)?;
        Ok(config)
    }

    fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(ConfigError::Toml)?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring:", display_path);
        for field in fields {
            eprintln!("- {field}");
        }
    }

    // ========================================================================
    // paths
    // ========================================================================

    /// Resolve relative paths against `root`.
    fn finalize(&mut self, root: &Path) {
        let root = normalize_path(root);
        self.build.src_dir = normalize_path(&root.join(&self.build.src_dir));
        self.build.build_dir = normalize_path(&root.join(&self.build.build_dir));
        self.root = root;
    }

    pub fn get_root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> &Path {
        &self.build.src_dir
    }

    /// Mode-specific warm cache root: `<build_dir>/<mode>`.
    pub fn output_dir(&self) -> PathBuf {
        self.build.build_dir.join(self.build.mode.as_str())
    }

    pub fn import_map_path(&self) -> PathBuf {
        self.build.src_dir.join(&self.build.import_map)
    }

    /// Import map specifier as seen by the watcher (`/import_map.json`).
    pub fn import_map_specifier(&self) -> String {
        crate::module::clean_path(&self.build.import_map.to_string_lossy())
    }

    // ========================================================================
    // validation
    // ========================================================================

    /// Collect all validation errors and return them at once.
    pub fn validate(&self) -> Result<()> {
        let mut diag = ConfigDiagnostics::new();

        self.validate_field_status(&mut diag);
        self.build.validate(&mut diag);
        self.watch.validate(&mut diag);

        diag.print_hints_and_warnings();
        diag.into_result()
            .map_err(|e| ConfigError::Diagnostics(e).into())
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config text. Panics on unknown fields to catch typos in tests.
#[cfg(test)]
pub fn test_parse_config(content: &str) -> EngineConfig {
    let (parsed, ignored) = EngineConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

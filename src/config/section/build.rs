//! `[build]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [build]
//! src_dir = "."                   # Source tree (pages/, api/, components/)
//! build_dir = ".ripple"           # Warm cache root
//! import_map = "import_map.json"  # Bare specifier mapping
//! mode = "development"
//! ssr = true
//! source_map = true
//! reload = false                  # Discard cache and re-fetch remote modules
//! ```

use std::path::PathBuf;

use macros::Config;
use serde::{Deserialize, Serialize};

use crate::config::ConfigDiagnostics;

/// Build mode; selects the cache subdirectory and the transformer's dev flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Development,
    Production,
}

impl BuildMode {
    pub const fn is_dev(self) -> bool {
        matches!(self, Self::Development)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Build paths and compile flags.
#[derive(Debug, Clone, Serialize, Deserialize, Config)]
#[serde(default)]
#[config(section = "build")]
pub struct BuildConfig {
    /// Source directory, relative to the config file.
    pub src_dir: PathBuf,

    /// Warm cache directory, relative to the config file.
    pub build_dir: PathBuf,

    /// Import map file, relative to the source directory.
    pub import_map: PathBuf,

    /// Build mode (`development` or `production`).
    pub mode: BuildMode,

    /// Server-side rendering is active; server hook changes force a reload.
    #[config(inline_doc = "Server-side rendering enabled.")]
    pub ssr: bool,

    /// Emit and persist source maps.
    pub source_map: bool,

    /// Discard the warm cache at startup and re-fetch remote modules.
    pub reload: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            src_dir: PathBuf::from("."),
            build_dir: PathBuf::from(".ripple"),
            import_map: PathBuf::from("import_map.json"),
            mode: BuildMode::Development,
            ssr: true,
            source_map: true,
            reload: false,
        }
    }
}

impl BuildConfig {
    pub(crate) fn validate(&self, diag: &mut ConfigDiagnostics) {
        if !self.src_dir.is_dir() {
            diag.error_with_hint(
                Self::FIELDS.src_dir,
                format!("source directory `{}` does not exist", self.src_dir.display()),
                "create it or point `src_dir` at an existing directory",
            );
        }
        if self.build_dir == self.src_dir {
            diag.error(
                Self::FIELDS.build_dir,
                "build directory must differ from the source directory",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_parse_config;

    #[test]
    fn test_build_config_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.build.build_dir, PathBuf::from(".ripple"));
        assert_eq!(config.build.mode, BuildMode::Development);
        assert!(config.build.ssr);
        assert!(!config.build.reload);
    }

    #[test]
    fn test_build_config_override() {
        let config = test_parse_config(
            "[build]\nmode = \"production\"\nssr = false\nimport_map = \"deps.json\"",
        );
        assert_eq!(config.build.mode, BuildMode::Production);
        assert!(!config.build.mode.is_dev());
        assert!(!config.build.ssr);
        assert_eq!(config.build.import_map, PathBuf::from("deps.json"));
        // untouched fields keep defaults
        assert!(config.build.source_map);
    }

    #[test]
    fn test_build_config_invalid_mode() {
        let result: Result<crate::config::EngineConfig, _> =
            toml::from_str("[build]\nmode = \"staging\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_build_template_mentions_fields() {
        let template = BuildConfig::template_with_header();
        assert!(template.starts_with("[build]"));
        assert!(template.contains("build_dir = \".ripple\""));
        assert!(template.contains("ssr = true"));
    }
}

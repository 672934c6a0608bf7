//! `[watch]` section configuration.
//!
//! ```toml
//! [watch]
//! enable = true
//! debounce_ms = 50
//! exclude = ["(^|/)node_modules/", "\\.swp$"]
//! ```
//!
//! `exclude` entries are regular expressions matched against the
//! specifier (`/pages/index.tsx`). Hidden files, editor temp files,
//! `node_modules` and the build directory are always excluded.

use std::time::Duration;

use macros::Config;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConfigDiagnostics;

/// File watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, Config)]
#[serde(default)]
#[config(section = "watch")]
pub struct WatchConfig {
    /// Watch the source tree in `ripple dev`.
    pub enable: bool,

    /// Per-path debounce window in milliseconds.
    #[config(inline_doc = "Last event wins within this window.")]
    pub debounce_ms: u64,

    /// Extra exclude patterns (regular expressions over specifiers).
    pub exclude: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enable: true,
            debounce_ms: 50,
            exclude: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Compile `exclude` patterns; invalid patterns were rejected by `validate`.
    pub fn exclude_patterns(&self) -> Vec<Regex> {
        self.exclude
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    }

    pub(crate) fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.debounce_ms == 0 {
            diag.error_with_hint(
                Self::FIELDS.debounce_ms,
                "debounce window must be greater than zero",
                "the default is 50",
            );
        } else if self.debounce_ms > 5_000 {
            diag.warn(
                Self::FIELDS.debounce_ms,
                format!("{}ms debounce delays every rebuild noticeably", self.debounce_ms),
            );
        }

        for pattern in &self.exclude {
            if let Err(err) = Regex::new(pattern) {
                diag.error_with_hint(
                    Self::FIELDS.exclude,
                    format!("invalid pattern `{pattern}`: {err}"),
                    "patterns are regular expressions, not globs",
                );
            }
        }
    }
}

//! Import map (`import_map.json`).
//!
//! Maps bare specifiers (`react`, `lodash/`) to URLs or local paths. Its
//! fingerprint is part of the build manifest: changing the map discards the
//! warm cache.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::freshness::{ContentHash, hash_bytes};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
    #[serde(default)]
    pub scopes: BTreeMap<String, BTreeMap<String, String>>,
}

impl ImportMap {
    /// Read an import map. A missing file is an empty map.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| ConfigError::ImportMap(path.to_path_buf(), err)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(path.to_path_buf(), err)),
        }
    }

    /// blake3 over the canonical (sorted-key) serialization.
    pub fn fingerprint(&self) -> ContentHash {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hash_bytes(&canonical)
    }

    /// Resolve a bare specifier from `referrer`'s scope, then the top level.
    ///
    /// Exact keys win over prefix keys; among prefix keys (ending in `/`)
    /// the longest match wins.
    pub fn resolve(&self, specifier: &str, referrer: &str) -> Option<String> {
        let scoped = self
            .scopes
            .iter()
            .filter(|(scope, _)| referrer.starts_with(scope.as_str()))
            .max_by_key(|(scope, _)| scope.len())
            .and_then(|(_, map)| Self::lookup(map, specifier));

        scoped.or_else(|| Self::lookup(&self.imports, specifier))
    }

    fn lookup(map: &BTreeMap<String, String>, specifier: &str) -> Option<String> {
        if let Some(target) = map.get(specifier) {
            return Some(target.clone());
        }
        map.iter()
            .filter(|(key, _)| key.ends_with('/') && specifier.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, target)| format!("{target}{}", &specifier[key.len()..]))
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.scopes.is_empty()
    }
}

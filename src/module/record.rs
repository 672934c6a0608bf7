//! Module record: one compiled unit of the graph.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::client::strip_server_exports;
use super::specifier::Specifier;
use crate::freshness::{ContentHash, TOKEN_LEN};

/// One import edge of a compiled module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub specifier: Specifier,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_dynamic: bool,
    /// Byte offset of the dependency's hash token in the owner's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_loc: Option<usize>,
}

impl Dependency {
    pub fn new(specifier: impl Into<Specifier>) -> Self {
        Self {
            specifier: specifier.into(),
            is_dynamic: false,
            hash_loc: None,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Metadata extracted by the transformer and persisted with the artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleFlags {
    #[serde(skip_serializing_if = "is_false")]
    pub is_style: bool,
    /// Name of the exported data-fetching function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props_fn: Option<String>,
    /// Exports a static-paths function.
    #[serde(skip_serializing_if = "is_false")]
    pub paths_fn: bool,
    /// Identifiers of server data hooks used by the module.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub server_hooks: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("compiled output is not loaded")]
    NotLoaded,
    #[error("hash token at {loc} is out of bounds (output is {len} bytes)")]
    OutOfBounds { loc: usize, len: usize },
}

/// A module in the graph.
#[derive(Debug, Clone)]
pub struct Module {
    pub specifier: Specifier,
    /// Digest of the raw source as last loaded (empty until loaded).
    pub source_hash: ContentHash,
    /// Composite digest over `source_hash` and dependency hashes.
    pub hash: ContentHash,
    pub deps: Vec<Dependency>,
    /// Artifact location relative to the build directory.
    pub output_path: PathBuf,
    /// Compiled bytes; `None` until transformed or read back from the warm cache.
    pub output: Option<Vec<u8>>,
    /// Client copy of `output` with server-only exports removed.
    client_output: Option<Arc<[u8]>>,
    pub external: bool,
    /// Compiled with remote dependencies left external.
    pub external_remote_deps: bool,
    pub flags: ModuleFlags,
}

impl Module {
    pub fn new(specifier: Specifier) -> Self {
        let output_path = specifier.output_path();
        Self {
            specifier,
            source_hash: ContentHash::empty(),
            hash: ContentHash::empty(),
            deps: Vec::new(),
            output_path,
            output: None,
            client_output: None,
            external: false,
            external_remote_deps: false,
            flags: ModuleFlags::default(),
        }
    }

    /// Stub for a specifier served from outside the local build.
    pub fn external(specifier: Specifier) -> Self {
        Self {
            external: true,
            output_path: PathBuf::new(),
            ..Self::new(specifier)
        }
    }

    /// `hash`, falling back to `source_hash` before the composite is known.
    #[inline]
    pub fn effective_hash(&self) -> ContentHash {
        if self.hash.is_empty() {
            self.source_hash
        } else {
            self.hash
        }
    }

    pub fn depends_on(&self, specifier: &str) -> bool {
        self.deps.iter().any(|d| d.specifier.as_str() == specifier)
    }

    /// Overwrite the hash token at `loc` in place.
    ///
    /// Returns `Ok(false)` when the bytes already match. The output length
    /// never changes.
    pub fn patch_token(&mut self, loc: usize, token: &[u8; TOKEN_LEN]) -> Result<bool, PatchError> {
        let output = self.output.as_mut().ok_or(PatchError::NotLoaded)?;
        let len = output.len();
        let end = loc
            .checked_add(TOKEN_LEN)
            .filter(|end| *end <= len)
            .ok_or(PatchError::OutOfBounds { loc, len })?;

        let slot = &mut output[loc..end];
        if slot == token.as_slice() {
            return Ok(false);
        }
        slot.copy_from_slice(token);
        assert_eq!(output.len(), len, "hash token patch changed output length");

        self.client_output = None;
        Ok(true)
    }

    /// Replace the compiled output, dropping the client copy.
    pub fn set_output(&mut self, bytes: Vec<u8>) {
        self.output = Some(bytes);
        self.client_output = None;
    }

    /// Client copy of the output, derived on first use.
    pub fn client_output(&mut self) -> Option<Arc<[u8]>> {
        if self.client_output.is_none() {
            let output = self.output.as_deref()?;
            let mut names: Vec<&str> = Vec::new();
            if let Some(props) = self.flags.props_fn.as_deref() {
                names.push(props);
            }
            if self.flags.paths_fn {
                names.push("getStaticPaths");
            }
            let client = if names.is_empty() {
                output.to_vec()
            } else {
                strip_server_exports(output, &names)
            };
            self.client_output = Some(Arc::from(client));
        }
        self.client_output.clone()
    }

    #[inline]
    pub fn has_client_output(&self) -> bool {
        self.client_output.is_some()
    }
}

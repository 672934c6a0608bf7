//! Extension points: resolvers, loaders and the transformer.
//!
//! Resolvers and loaders are registered against a regex over the
//! specifier; the first matching registration wins. The transformer is a
//! single black box shared by every module.

use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ImportMap;
use crate::module::{ModuleFlags, SourceKind, Specifier};

// ============================================================================
// Resolution
// ============================================================================

/// Route a resolver assigns to a non-builtin page module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHint {
    pub path: String,
    pub is_index: bool,
}

/// What a resolver decided about a specifier.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Rewritten specifier.
    pub specifier: Option<String>,
    /// Served from outside the local build; never compiled.
    pub external: bool,
    pub as_route: Option<RouteHint>,
    /// The module handles its own hot updates.
    pub accept_hot: bool,
    /// Opaque data handed to the loader.
    pub data: Option<serde_json::Value>,
}

pub trait Resolver: Send + Sync {
    fn resolve(&self, specifier: &str) -> Resolution;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Resolution + Send + Sync,
{
    fn resolve(&self, specifier: &str) -> Resolution {
        self(specifier)
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Source text produced by a loader.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub code: Vec<u8>,
    pub kind: SourceKind,
    pub map: Option<String>,
}

/// Produces source for specifiers the filesystem cannot (remote URLs,
/// generated content, non-script file kinds).
pub trait Loader: Send + Sync {
    fn load(
        &self,
        specifier: &Specifier,
        data: Option<&serde_json::Value>,
    ) -> anyhow::Result<LoadedSource>;
}

impl<F> Loader for F
where
    F: Fn(&Specifier, Option<&serde_json::Value>) -> anyhow::Result<LoadedSource> + Send + Sync,
{
    fn load(
        &self,
        specifier: &Specifier,
        data: Option<&serde_json::Value>,
    ) -> anyhow::Result<LoadedSource> {
        self(specifier, data)
    }
}

// ============================================================================
// Transformation
// ============================================================================

/// Options shared by every transform call.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub working_dir: PathBuf,
    pub import_map: Arc<ImportMap>,
    pub source_map: bool,
    pub dev: bool,
    pub external_remote_deps: bool,
}

#[derive(Debug, Clone)]
pub struct TransformInput {
    pub specifier: Specifier,
    pub code: Vec<u8>,
    pub kind: SourceKind,
    pub options: TransformOptions,
}

/// An import found by the transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedDep {
    /// Canonical specifier of the imported module.
    pub specifier: String,
    /// Import text as written into the output, starting with its opening
    /// quote and ending in a hash placeholder. Must occur once in the output.
    pub resolved: Option<String>,
    pub is_dynamic: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub code: Vec<u8>,
    pub deps: Vec<TransformedDep>,
    pub map: Option<String>,
    pub flags: ModuleFlags,
}

/// Source-to-target compiler. Called off the async executor.
pub trait Transformer: Send + Sync {
    fn transform(&self, input: TransformInput) -> anyhow::Result<TransformOutput>;

    /// Identifies the transformer build; recorded in the build manifest.
    fn checksum(&self) -> String;
}

// ============================================================================
// Registry of plugins
// ============================================================================

/// Ordered resolver and loader registrations.
#[derive(Default, Clone)]
pub struct Plugins {
    resolvers: Vec<(Regex, Arc<dyn Resolver>)>,
    loaders: Vec<(Regex, Arc<dyn Loader>)>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resolver(&mut self, test: Regex, resolver: impl Resolver + 'static) {
        self.resolvers.push((test, Arc::new(resolver)));
    }

    pub fn add_loader(&mut self, test: Regex, loader: impl Loader + 'static) {
        self.loaders.push((test, Arc::new(loader)));
    }

    /// Run the first resolver whose pattern matches.
    pub fn resolve(&self, specifier: &str) -> Option<Resolution> {
        self.resolvers
            .iter()
            .find(|(test, _)| test.is_match(specifier))
            .map(|(_, resolver)| resolver.resolve(specifier))
    }

    pub fn loader_for(&self, specifier: &str) -> Option<Arc<dyn Loader>> {
        self.loaders
            .iter()
            .find(|(test, _)| test.is_match(specifier))
            .map(|(_, loader)| Arc::clone(loader))
    }

    pub fn has_loader(&self, specifier: &str) -> bool {
        self.loaders.iter().any(|(test, _)| test.is_match(specifier))
    }
}

impl std::fmt::Debug for Plugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugins")
            .field(
                "resolvers",
                &self.resolvers.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
            )
            .field(
                "loaders",
                &self.loaders.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

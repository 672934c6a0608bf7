//! Engine: one registry, one compiler, the route tables and the event hub.
//!
//! Several engines can live in one process; nothing here is global.
//!
//! ```ignore
//! let engine = Engine::builder(config).build()?;
//! engine.prepare().await?;
//! let mut events = engine.subscribe();
//! let watch = engine.watch()?;
//! ```

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use jwalk::WalkDir;
use regex::Regex;
use rustc_hash::FxHashSet;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::cache::{BuildManifest, CacheError};
use crate::compiler::{
    CompileError, CompileOptions, Compiler, EsmScanner, Loader, Plugins, Resolver, Transformer,
};
use crate::config::{EngineConfig, ImportMap};
use crate::freshness::ContentHash;
use crate::logger::Measure;
use crate::module::{BUILTIN_EXTS, Dependency, Module, ModuleEntry, ModuleRegistry, Specifier};
use crate::reload::{EventHub, NoopRenderCache, RenderCache, WatchEvent};
use crate::route::{self, RouteKind, RouteTable};
use crate::watch::{self, WatchHandle, is_ignored_file};
use crate::{debug, log};

#[cfg(test)]
mod tests;

/// Outcome of [`Engine::prepare`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareStats {
    pub compiled: usize,
    pub failed: usize,
    pub routes: usize,
    /// The warm cache was discarded first.
    pub clean: bool,
}

struct Inner {
    config: EngineConfig,
    compiler: Compiler,
    routes: RouteTable,
    events: EventHub,
    render_cache: Arc<dyn RenderCache>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

pub struct EngineBuilder {
    config: EngineConfig,
    plugins: Plugins,
    transformer: Option<Arc<dyn Transformer>>,
    render_cache: Option<Arc<dyn RenderCache>>,
    import_map: Option<ImportMap>,
}

impl EngineBuilder {
    pub fn resolver(mut self, test: Regex, resolver: impl Resolver + 'static) -> Self {
        self.plugins.add_resolver(test, resolver);
        self
    }

    pub fn loader(mut self, test: Regex, loader: impl Loader + 'static) -> Self {
        self.plugins.add_loader(test, loader);
        self
    }

    /// Defaults to [`EsmScanner`].
    pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn render_cache(mut self, cache: Arc<dyn RenderCache>) -> Self {
        self.render_cache = Some(cache);
        self
    }

    /// Use this import map instead of reading the configured file.
    pub fn import_map(mut self, import_map: ImportMap) -> Self {
        self.import_map = Some(import_map);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let import_map = match self.import_map {
            Some(map) => map,
            None => ImportMap::load(&self.config.import_map_path())?,
        };
        let transformer = self
            .transformer
            .unwrap_or_else(|| Arc::new(EsmScanner::new()));
        let compiler = Compiler::new(
            &self.config,
            Arc::new(ModuleRegistry::new()),
            self.plugins,
            transformer,
            import_map,
        );
        debug!("dev"; "{:?}", compiler);

        Ok(Engine {
            inner: Arc::new(Inner {
                config: self.config,
                compiler,
                routes: RouteTable::new(),
                events: EventHub::new(),
                render_cache: self
                    .render_cache
                    .unwrap_or_else(|| Arc::new(NoopRenderCache)),
            }),
        })
    }
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            plugins: Plugins::new(),
            transformer: None,
            render_cache: None,
            import_map: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn compiler(&self) -> &Compiler {
        &self.inner.compiler
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        self.inner.compiler.registry()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // modules
    // ========================================================================

    pub async fn compile(
        &self,
        specifier: &str,
        options: CompileOptions,
    ) -> Result<Arc<ModuleEntry>, CompileError> {
        self.inner.compiler.compile(specifier, options).await
    }

    /// Snapshot of a module in the graph.
    pub fn get_module(&self, specifier: &str) -> Option<Module> {
        self.registry().get(specifier).map(|entry| entry.snapshot())
    }

    /// First module (in specifier order) matching `predicate`.
    pub fn find_module(&self, predicate: impl Fn(&Module) -> bool) -> Option<Module> {
        self.registry()
            .entries()
            .into_iter()
            .find(|(_, entry)| predicate(&entry.read()))
            .map(|(_, entry)| entry.snapshot())
    }

    /// Compiled bytes, read back from the warm cache if needed.
    pub async fn output(&self, specifier: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(entry) = self.registry().get(specifier) else {
            return Ok(None);
        };
        self.inner.compiler.ensure_output(&entry).await?;
        Ok(entry.read().output.clone())
    }

    /// Compiled bytes with server-only exports removed.
    pub async fn client_output(&self, specifier: &str) -> Result<Option<Arc<[u8]>>, CacheError> {
        let Some(entry) = self.registry().get(specifier) else {
            return Ok(None);
        };
        self.inner.compiler.ensure_output(&entry).await?;
        Ok(entry.write().client_output())
    }

    /// Compile a module from in-memory source and register its route.
    pub async fn add_module(
        &self,
        specifier: &str,
        source: impl Into<String>,
    ) -> Result<Arc<ModuleEntry>, CompileError> {
        let options = CompileOptions {
            force_refresh: true,
            source: Some(source.into()),
            ..CompileOptions::default()
        };
        let entry = self.compile(specifier, options).await?;

        let spec = Specifier::new(specifier);
        if self.is_page_module(&spec) {
            self.routes()
                .update(RouteKind::Page, route::route_for(&spec, self.compiler().plugins()));
        } else if spec.is_api() {
            self.routes()
                .update(RouteKind::Api, route::route_for(&spec, self.compiler().plugins()));
        }
        Ok(entry)
    }

    /// Retract a module and its route. Returns whether it was in the graph.
    pub fn remove_module(&self, specifier: &str) -> bool {
        if self.registry().remove(specifier).is_none() {
            return false;
        }
        let spec = Specifier::new(specifier);
        if self.is_page_module(&spec) {
            self.routes().remove_by_module(RouteKind::Page, spec.as_str());
        } else if spec.as_str().starts_with("/api/") {
            self.routes().remove_by_module(RouteKind::Api, spec.as_str());
        }
        true
    }

    /// Ripple the hash of `specifier` through its compiled dependents.
    pub async fn propagate<F>(&self, specifier: &str, on_change: F) -> usize
    where
        F: FnMut(&Specifier, ContentHash) + Send,
    {
        self.inner.compiler.propagate(specifier, on_change).await
    }

    /// Visit dependencies of `specifier` recursively: all direct deps of a
    /// module first, then each dep's own deps. Each module is expanded once.
    /// Returns `Break` if the visitor stopped the walk.
    pub fn walk_deps<F>(&self, specifier: &str, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&Dependency) -> ControlFlow<()>,
    {
        let mut seen = FxHashSet::default();
        self.walk_deps_in(specifier, &mut visitor, &mut seen)
    }

    fn walk_deps_in(
        &self,
        specifier: &str,
        visitor: &mut dyn FnMut(&Dependency) -> ControlFlow<()>,
        seen: &mut FxHashSet<String>,
    ) -> ControlFlow<()> {
        let Some(entry) = self.registry().get(specifier) else {
            return ControlFlow::Continue(());
        };
        if !seen.insert(specifier.to_string()) {
            return ControlFlow::Continue(());
        }

        let deps = entry.read().deps.clone();
        for dep in &deps {
            visitor(dep)?;
        }
        for dep in &deps {
            self.walk_deps_in(dep.specifier.as_str(), visitor, seen)?;
        }
        ControlFlow::Continue(())
    }

    // ========================================================================
    // policies
    // ========================================================================

    pub fn is_page_module(&self, specifier: &Specifier) -> bool {
        route::is_page_module(specifier, self.compiler().plugins())
    }

    pub fn is_hot_accepting(&self, specifier: &Specifier) -> bool {
        route::is_hot_accepting(specifier, self.compiler().plugins(), self.registry())
    }

    /// Drop rendered pages affected by a change to `specifier`.
    pub(crate) fn invalidate_render(&self, specifier: &Specifier) {
        if specifier.is_app() {
            self.inner.render_cache.invalidate(None);
        } else if self.is_page_module(specifier) {
            let route = route::route_for(specifier, self.compiler().plugins());
            self.inner.render_cache.invalidate(Some(&route.path));
        }
    }

    // ========================================================================
    // lifecycle
    // ========================================================================

    /// Check the build manifest, discover routes, and compile the app module
    /// and every route module concurrently.
    pub async fn prepare(&self) -> Result<PrepareStats> {
        let ms = Measure::start();
        let compiler = self.compiler();
        let build_dir = compiler.cache().build_dir().to_path_buf();

        let manifest = BuildManifest::new(
            compiler.transformer_checksum(),
            compiler.import_map().fingerprint().to_hex(),
        );
        let status = {
            let manifest = manifest.clone();
            let dir = build_dir.clone();
            tokio::task::spawn_blocking(move || manifest.check(&dir)).await?
        };

        let clean = compiler.is_reload() || !status.is_fresh();
        if clean {
            let reason = if compiler.is_reload() {
                "reload requested".to_string()
            } else {
                status.reason()
            };
            log!("dev"; "clean build ({})", reason);
            compiler
                .cache()
                .clear()
                .await
                .with_context(|| format!("failed to clear {}", build_dir.display()))?;
            self.registry().clear();
            compiler.set_reload(true);
        }
        {
            let dir = build_dir.clone();
            tokio::task::spawn_blocking(move || manifest.write(&dir)).await??;
        }

        self.routes().clear();
        let mut modules: Vec<(Specifier, CompileOptions)> = Vec::new();
        let src_dir = compiler.src_dir().to_path_buf();
        if let Some(app) = find_app_module(&src_dir) {
            modules.push((app, CompileOptions::default()));
        }

        let sources = tokio::task::spawn_blocking(move || walk_route_sources(&src_dir)).await?;
        for spec in sources {
            if spec.as_str().starts_with("/api/") {
                if spec.is_api() {
                    self.routes()
                        .update(RouteKind::Api, route::route_for(&spec, compiler.plugins()));
                    let options = CompileOptions {
                        external_remote_deps: true,
                        ..CompileOptions::default()
                    };
                    modules.push((spec, options));
                }
            } else if self.is_page_module(&spec) {
                self.routes()
                    .update(RouteKind::Page, route::route_for(&spec, compiler.plugins()));
                modules.push((spec, CompileOptions::default()));
            }
        }

        let mut set = JoinSet::new();
        for (spec, options) in modules {
            let engine = self.clone();
            set.spawn(async move {
                let result = engine.compile(spec.as_str(), options).await;
                (spec, result.is_ok())
            });
        }

        let mut stats = PrepareStats {
            clean,
            ..PrepareStats::default()
        };
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, true)) => stats.compiled += 1,
                Ok((spec, false)) => {
                    debug!("dev"; "startup compile failed: {}", spec);
                    stats.failed += 1;
                }
                Err(e) => {
                    log!("error"; "compile task aborted: {}", e);
                    stats.failed += 1;
                }
            }
        }

        compiler.set_reload(false);
        stats.routes = self.routes().len();
        ms.stop("dev", "prepare");
        Ok(stats)
    }

    /// Discard the build directory and the graph, reload the import map,
    /// and prepare again.
    pub async fn rebuild(&self) -> Result<PrepareStats> {
        let path = self.config().import_map_path();
        let import_map = tokio::task::spawn_blocking(move || ImportMap::load(&path)).await??;
        self.compiler().set_import_map(import_map);
        self.registry().clear();
        self.compiler().set_reload(true);

        let stats = self.prepare().await?;
        self.inner.render_cache.invalidate(None);
        Ok(stats)
    }

    /// Start the watch loop over the source directory.
    ///
    /// Must be called within a tokio runtime.
    pub fn watch(&self) -> Result<WatchHandle> {
        watch::spawn(self.clone()).context("failed to start file watcher")
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("src_dir", &self.compiler().src_dir())
            .field("modules", &self.registry().len())
            .field("routes", &self.routes().len())
            .finish()
    }
}

/// `/app.<ext>` in the first builtin extension order that exists.
fn find_app_module(src_dir: &Path) -> Option<Specifier> {
    BUILTIN_EXTS
        .iter()
        .map(|ext| format!("app.{ext}"))
        .find(|name| src_dir.join(name).is_file())
        .map(|name| Specifier::new(format!("/{name}")))
}

/// Candidate route sources under `pages/` and `api/`, sorted.
fn walk_route_sources(src_dir: &Path) -> Vec<Specifier> {
    let mut out: Vec<Specifier> = ["pages", "api"]
        .iter()
        .map(|root| src_dir.join(root))
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| e.path())
                .collect::<Vec<PathBuf>>()
        })
        .filter_map(|path| Specifier::from_source_path(src_dir, &path))
        .filter(|spec| !is_ignored_file(spec.as_str()))
        .collect();
    out.sort();
    out
}

//! Compile pipeline: resolve, load, transform, link dependency hashes,
//! persist.
//!
//! # Flow
//!
//! ```text
//! compile(spec)
//!   ├── resolver chain      → rewrite / external stub
//!   ├── registry            → cache hit (await readiness) or own the compile
//!   ├── warm cache meta     → skip load (remote) or skip transform (same hash)
//!   ├── transformer         → output + deps with hash markers
//!   ├── deps (recursive)    → patch tokens, composite hash
//!   └── persist             → artifact + meta + map
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use rustc_hash::FxHashSet;

use super::error::CompileError;
use super::plugin::{LoadedSource, Plugins, TransformInput, TransformOptions, Transformer};
use crate::cache::{CacheError, ModuleMeta, PersistJob, WarmCache};
use crate::config::{EngineConfig, ImportMap};
use crate::freshness::{ContentHash, TOKEN_LEN, composite_hash, hash_bytes};
use crate::logger::Measure;
use crate::module::{
    Dependency, Module, ModuleEntry, ModuleRegistry, Readiness, SourceKind, Specifier, TraversalId,
};
use crate::{debug, log};

type CompileFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Arc<ModuleEntry>, CompileError>> + Send + 'a>>;

/// Per-call compile options.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Recompile even if the module is already in the graph.
    pub force_refresh: bool,
    /// Use registry snapshots of dependencies instead of compiling them.
    pub ignore_deps: bool,
    /// Leave remote dependencies external.
    pub external_remote_deps: bool,
    /// In-memory source for a virtual module.
    pub source: Option<String>,
}

impl CompileOptions {
    /// Options for a watched file that changed on disk.
    pub fn refresh(external_remote_deps: bool) -> Self {
        Self {
            force_refresh: true,
            ignore_deps: true,
            external_remote_deps,
            source: None,
        }
    }

    fn for_dependency(&self) -> Self {
        Self {
            external_remote_deps: self.external_remote_deps,
            ..Self::default()
        }
    }
}

/// Visited set of one compile traversal.
struct Traversal {
    id: TraversalId,
    visited: FxHashSet<Specifier>,
}

/// Source as obtained for one compile.
enum Origin {
    /// Freshly loaded or transformed.
    Loaded(LoadedSource),
    /// Restored from warm cache metadata; the artifact stays on disk until needed.
    Cached(ModuleMeta),
}

/// Owns the transformer and the warm cache; writes into a shared registry.
pub struct Compiler {
    registry: Arc<ModuleRegistry>,
    cache: WarmCache,
    plugins: Plugins,
    transformer: Arc<dyn Transformer>,
    import_map: ArcSwap<ImportMap>,
    src_dir: PathBuf,
    dev: bool,
    source_map: bool,
    reload: AtomicBool,
}

impl Compiler {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<ModuleRegistry>,
        plugins: Plugins,
        transformer: Arc<dyn Transformer>,
        import_map: ImportMap,
    ) -> Self {
        Self {
            registry,
            cache: WarmCache::new(config.output_dir()),
            plugins,
            transformer,
            import_map: ArcSwap::from_pointee(import_map),
            src_dir: config.src_dir().to_path_buf(),
            dev: config.build.mode.is_dev(),
            source_map: config.build.source_map,
            reload: AtomicBool::new(config.build.reload),
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &WarmCache {
        &self.cache
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    pub fn transformer_checksum(&self) -> String {
        self.transformer.checksum()
    }

    pub fn import_map(&self) -> Arc<ImportMap> {
        self.import_map.load_full()
    }

    pub fn set_import_map(&self, import_map: ImportMap) {
        self.import_map.store(Arc::new(import_map));
    }

    /// Reload mode re-fetches remote modules even when cached.
    pub fn is_reload(&self) -> bool {
        self.reload.load(Ordering::Relaxed)
    }

    pub fn set_reload(&self, reload: bool) {
        self.reload.store(reload, Ordering::Relaxed);
    }

    // ========================================================================
    // compile
    // ========================================================================

    /// Compile `specifier` and, unless `ignore_deps` is set, everything it
    /// imports.
    pub async fn compile(
        &self,
        specifier: &str,
        options: CompileOptions,
    ) -> Result<Arc<ModuleEntry>, CompileError> {
        let mut traversal = Traversal {
            id: self.registry.next_traversal(),
            visited: FxHashSet::default(),
        };
        self.compile_in(Specifier::new(specifier), options, &mut traversal)
            .await
    }

    fn compile_in<'a>(
        &'a self,
        specifier: Specifier,
        options: CompileOptions,
        traversal: &'a mut Traversal,
    ) -> CompileFuture<'a> {
        Box::pin(async move {
            let resolution = self.plugins.resolve(specifier.as_str()).unwrap_or_default();
            let specifier = match &resolution.specifier {
                Some(rewritten) => Specifier::new(rewritten),
                None => specifier,
            };

            if resolution.external {
                return Ok(self.external_stub(&specifier));
            }

            // In-traversal cycle: hand back whatever is there now
            if traversal.visited.contains(&specifier)
                && let Some(entry) = self.registry.get(specifier.as_str())
            {
                return Ok(entry);
            }

            let entry = match self.registry.get(specifier.as_str()) {
                Some(existing) => {
                    let eligible = {
                        let module = existing.read();
                        !(module.external_remote_deps && !options.external_remote_deps)
                    };
                    if eligible && !options.force_refresh {
                        return self.await_entry(existing, &specifier, traversal.id).await;
                    }
                    self.registry.wait_for(&existing, traversal.id).await;
                    self.registry.replace(&specifier, traversal.id)
                }
                None => {
                    let (entry, created) = self.registry.get_or_create(&specifier, traversal.id);
                    if !created {
                        return self.await_entry(entry, &specifier, traversal.id).await;
                    }
                    entry
                }
            };

            traversal.visited.insert(specifier.clone());

            match self
                .build(&entry, &specifier, resolution.data, options, traversal)
                .await
            {
                Ok(()) => {
                    entry.resolve(Readiness::Ready);
                    Ok(entry)
                }
                Err(err) => {
                    self.registry.remove_entry(specifier.as_str(), &entry);
                    entry.resolve(Readiness::Failed);
                    log!("compile"; "{}", err);
                    Err(err)
                }
            }
        })
    }

    fn external_stub(&self, specifier: &Specifier) -> Arc<ModuleEntry> {
        match self.registry.get(specifier.as_str()) {
            Some(entry) if entry.read().external => entry,
            _ => self.registry.insert_settled(Module::external(specifier.clone())),
        }
    }

    async fn await_entry(
        &self,
        entry: Arc<ModuleEntry>,
        specifier: &Specifier,
        waiter: TraversalId,
    ) -> Result<Arc<ModuleEntry>, CompileError> {
        match self.registry.wait_for(&entry, waiter).await {
            Some(Readiness::Failed) => Err(CompileError::Failed(specifier.clone())),
            _ => Ok(entry),
        }
    }

    /// Populate an owned, pending entry.
    async fn build(
        &self,
        entry: &ModuleEntry,
        specifier: &Specifier,
        data: Option<serde_json::Value>,
        options: CompileOptions,
        traversal: &mut Traversal,
    ) -> Result<(), CompileError> {
        let meta = self.cache.read_meta(specifier).await;
        let output_path = specifier.output_path();
        let has_artifact = meta.is_some() && self.cache.has_artifact(&output_path).await;

        let origin = match meta {
            Some(meta) if specifier.is_remote() && has_artifact && !self.is_reload() => {
                debug!("compile"; "reuse cached remote '{}'", specifier);
                Origin::Cached(meta)
            }
            meta => {
                let source = self
                    .load_source(specifier, data, options.source.clone())
                    .await?;
                if !source.kind.is_supported() {
                    return Err(CompileError::Unsupported {
                        specifier: specifier.clone(),
                        kind: source.kind,
                    });
                }
                match meta {
                    Some(meta) if has_artifact && meta.source_hash == hash_bytes(&source.code) => {
                        Origin::Cached(meta)
                    }
                    _ => Origin::Loaded(source),
                }
            }
        };

        let mut module = Module::new(specifier.clone());
        module.external_remote_deps = options.external_remote_deps;

        let (transformed, map) = match origin {
            Origin::Cached(meta) => {
                module.source_hash = meta.source_hash;
                module.deps = meta.deps;
                module.flags = meta.flags;
                (false, None)
            }
            Origin::Loaded(source) => {
                module.source_hash = hash_bytes(&source.code);
                let map = self.transform(&mut module, source, &options).await?;
                (true, map)
            }
        };

        // Visible to cyclic dependents before the deps are walked
        *entry.write() = module;

        let dirty = self.link_deps(entry, &options, traversal).await?;

        if transformed || dirty {
            let job = PersistJob::capture(&entry.read(), map);
            if let Some(job) = job {
                self.cache.store(job).await?;
            }
        }
        Ok(())
    }

    async fn load_source(
        &self,
        specifier: &Specifier,
        data: Option<serde_json::Value>,
        inline: Option<String>,
    ) -> Result<LoadedSource, CompileError> {
        let load_err = |message: String| CompileError::Load {
            specifier: specifier.clone(),
            message,
        };

        if let Some(code) = inline {
            return Ok(LoadedSource {
                code: code.into_bytes(),
                kind: SourceKind::from_extension(specifier.extension()),
                map: None,
            });
        }

        if let Some(loader) = self.plugins.loader_for(specifier.as_str()) {
            let spec = specifier.clone();
            return tokio::task::spawn_blocking(move || loader.load(&spec, data.as_ref()))
                .await
                .map_err(|e| load_err(e.to_string()))?
                .map_err(|e| load_err(format!("{e:#}")));
        }

        if specifier.is_remote() {
            return Err(load_err("no loader registered for remote modules".into()));
        }

        let path = specifier.source_path(&self.src_dir);
        let code = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|e| load_err(e.to_string()))?
            .map_err(|e| load_err(e.to_string()))?;

        Ok(LoadedSource {
            code,
            kind: SourceKind::from_extension(specifier.extension()),
            map: None,
        })
    }

    /// Run the transformer and record output, deps and flags on `module`.
    /// Returns the source map.
    async fn transform(
        &self,
        module: &mut Module,
        source: LoadedSource,
        options: &CompileOptions,
    ) -> Result<Option<String>, CompileError> {
        let specifier = module.specifier.clone();
        let input = TransformInput {
            specifier: specifier.clone(),
            code: source.code,
            kind: source.kind,
            options: TransformOptions {
                working_dir: self.src_dir.clone(),
                import_map: self.import_map(),
                source_map: self.source_map,
                dev: self.dev,
                external_remote_deps: options.external_remote_deps,
            },
        };

        let transform_err = |message: String| CompileError::Transform {
            specifier: specifier.clone(),
            message,
        };

        let measure = Measure::start();
        let transformer = Arc::clone(&self.transformer);
        let output = tokio::task::spawn_blocking(move || transformer.transform(input))
            .await
            .map_err(|e| transform_err(e.to_string()))?
            .map_err(|e| transform_err(format!("{e:#}")))?;
        measure.stop("compile", &format!("transform '{specifier}'"));

        let mut code = output.code;
        let map = output.map.or(source.map);
        if map.is_some()
            && let Some(name) = module.output_path.file_name()
        {
            code.extend_from_slice(
                format!("\n//# sourceMappingURL={}.map", name.to_string_lossy()).as_bytes(),
            );
        }

        module.deps = output
            .deps
            .into_iter()
            .filter_map(|dep| {
                let dep_specifier = Specifier::new(&dep.specifier);
                if dep_specifier == specifier {
                    return None;
                }
                let hash_loc = dep
                    .resolved
                    .filter(|_| dep_specifier.is_local())
                    .and_then(|marker| locate_marker(&code, marker.as_bytes()));
                Some(Dependency {
                    specifier: dep_specifier,
                    is_dynamic: dep.is_dynamic,
                    hash_loc,
                })
            })
            .collect();
        module.flags = output.flags;
        module.set_output(code);
        Ok(map)
    }

    /// Settle every dependency, patch its token and compute the composite
    /// hash. Returns whether any token changed.
    async fn link_deps(
        &self,
        entry: &ModuleEntry,
        options: &CompileOptions,
        traversal: &mut Traversal,
    ) -> Result<bool, CompileError> {
        let (owner, deps) = {
            let module = entry.read();
            (module.specifier.clone(), module.deps.clone())
        };

        if deps.is_empty() {
            let mut module = entry.write();
            module.hash = module.source_hash;
            return Ok(false);
        }

        let mut contributions = Vec::with_capacity(deps.len());
        let mut dirty = false;

        for dep in &deps {
            let dep_hash = if options.ignore_deps {
                self.registry
                    .get(dep.specifier.as_str())
                    .map(|e| effective_hash(&e))
            } else {
                let dep_options = options.for_dependency();
                self.compile_in(dep.specifier.clone(), dep_options, traversal)
                    .await
                    .ok()
                    .map(|e| effective_hash(&e))
            };

            let Some(dep_hash) = dep_hash else {
                log!("compile"; "'{}': missing dependency module '{}'", owner, dep.specifier);
                contributions.push(None);
                continue;
            };

            if let Some(loc) = dep.hash_loc
                && !dep_hash.is_empty()
            {
                self.ensure_output(entry).await?;
                match entry.write().patch_token(loc, &dep_hash.token()) {
                    Ok(patched) => dirty |= patched,
                    Err(err) => log!("compile"; "'{}': {} ({})", owner, err, dep.specifier),
                }
            }
            contributions.push((!dep_hash.is_empty()).then_some(dep_hash));
        }

        let mut module = entry.write();
        module.hash = composite_hash(module.source_hash, contributions);
        Ok(dirty)
    }

    // ========================================================================
    // warm cache helpers
    // ========================================================================

    /// Load the artifact into memory if it is not there yet.
    pub async fn ensure_output(&self, entry: &ModuleEntry) -> Result<(), CacheError> {
        let output_path = {
            let module = entry.read();
            if module.output.is_some() || module.external {
                return Ok(());
            }
            module.output_path.clone()
        };

        let bytes = self.cache.read_artifact(&output_path).await?;
        let mut module = entry.write();
        if module.output.is_none() {
            module.set_output(bytes);
        }
        Ok(())
    }

    /// Write an entry's artifact and metadata.
    pub async fn persist(&self, entry: &ModuleEntry) -> Result<(), CacheError> {
        let job = PersistJob::capture(&entry.read(), None);
        match job {
            Some(job) => self.cache.store(job).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("src_dir", &self.src_dir)
            .field("build_dir", &self.cache.build_dir())
            .field("plugins", &self.plugins)
            .field("transformer", &self.transformer.checksum())
            .finish()
    }
}

#[inline]
pub(crate) fn effective_hash(entry: &ModuleEntry) -> ContentHash {
    entry.read().effective_hash()
}

/// Token offset for a dependency marker: the marker's last `TOKEN_LEN`
/// bytes. Markers at offset 0 are ignored.
fn locate_marker(code: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.len() < TOKEN_LEN {
        return None;
    }
    let idx = code.windows(marker.len()).position(|w| w == marker)?;
    (idx > 0).then(|| idx + marker.len() - TOKEN_LEN)
}

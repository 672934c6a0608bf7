use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashSet;

use crate::compiler::Plugins;
use crate::config::{EngineConfig, normalize_path};
use crate::module::{ModuleRegistry, Specifier};
use crate::route::is_page_module;

/// Decides which filesystem paths the watch loop cares about.
pub(crate) struct WatchScope {
    src_dir: PathBuf,
    /// Build directory as a specifier prefix, when it lives in the source tree.
    build_prefix: Option<String>,
    exclude: Vec<Regex>,
    import_map: Specifier,
    /// Modules whose last watch-triggered compile failed. They left the
    /// registry but stay in scope so the next save recompiles them.
    failed: Mutex<FxHashSet<Specifier>>,
}

impl WatchScope {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        let src_dir = config.src_dir().to_path_buf();
        let build_prefix = Specifier::from_source_path(&src_dir, &config.build.build_dir)
            .map(|spec| spec.as_str().to_string());
        Self {
            src_dir,
            build_prefix,
            exclude: config.watch.exclude_patterns(),
            import_map: Specifier::new(config.import_map_specifier()),
            failed: Mutex::new(FxHashSet::default()),
        }
    }

    pub(crate) fn mark_failed(&self, specifier: &Specifier) {
        self.failed.lock().insert(specifier.clone());
    }

    pub(crate) fn clear_failed(&self, specifier: &Specifier) {
        self.failed.lock().remove(specifier);
    }

    pub(crate) fn is_failed(&self, specifier: &Specifier) -> bool {
        self.failed.lock().contains(specifier)
    }

    /// Specifier of a path reported by the watcher.
    pub(crate) fn specifier_of(&self, path: &Path) -> Option<Specifier> {
        Specifier::from_source_path(&self.src_dir, path)
            .or_else(|| Specifier::from_source_path(&self.src_dir, &normalize_path(path)))
    }

    pub(crate) fn is_import_map(&self, specifier: &Specifier) -> bool {
        *specifier == self.import_map
    }

    pub(crate) fn is_excluded(&self, specifier: &Specifier) -> bool {
        if is_ignored_file(specifier.as_str()) {
            return true;
        }
        if let Some(prefix) = &self.build_prefix {
            let s = specifier.as_str();
            if s == prefix || s.strip_prefix(prefix.as_str()).is_some_and(|r| r.starts_with('/')) {
                return true;
            }
        }
        self.exclude.iter().any(|re| re.is_match(specifier.as_str()))
    }

    /// In scope: tracked or previously failed modules, route modules,
    /// `/api/` modules, the app module and the import map.
    pub(crate) fn accepts(
        &self,
        specifier: &Specifier,
        plugins: &Plugins,
        registry: &ModuleRegistry,
    ) -> bool {
        if self.is_excluded(specifier) {
            return false;
        }
        if self.is_import_map(specifier)
            || registry.contains(specifier.as_str())
            || self.is_failed(specifier)
        {
            return true;
        }
        if is_page_module(specifier, plugins) {
            return true;
        }
        specifier.has_builtin_ext() && (specifier.as_str().starts_with("/api/") || specifier.is_app())
    }
}

/// Hidden files, editor temp files and vendored packages.
pub(crate) fn is_ignored_file(specifier: &str) -> bool {
    let mut segments = specifier.split('/').filter(|s| !s.is_empty()).peekable();
    while let Some(segment) = segments.next() {
        if segment.starts_with('.') || segment == "node_modules" {
            return true;
        }
        if segments.peek().is_none() && is_temp_name(segment) {
            return true;
        }
    }
    false
}

fn is_temp_name(name: &str) -> bool {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('#')
}

//! Test support: a source tree fixture and a transformer that counts calls.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tempfile::TempDir;

use super::plugin::{Plugins, TransformInput, TransformOutput, Transformer};
use super::{Compiler, EsmScanner};
use crate::config::{EngineConfig, ImportMap};
use crate::module::ModuleRegistry;

/// Temporary source tree with a matching config.
pub(crate) struct Fixture {
    _dir: TempDir,
    pub config: EngineConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::in_dir(dir.path());
        Self { _dir: dir, config }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.config.src_dir().join(rel.trim_start_matches('/'))
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.path(rel)).unwrap();
    }

    pub fn build_dir(&self) -> PathBuf {
        self.config.output_dir()
    }

    pub fn compiler(&self, transformer: &Arc<CountingTransformer>) -> Compiler {
        self.compiler_with(transformer, Plugins::new())
    }

    pub fn compiler_with(&self, transformer: &Arc<CountingTransformer>, plugins: Plugins) -> Compiler {
        Compiler::new(
            &self.config,
            Arc::new(ModuleRegistry::new()),
            plugins,
            Arc::clone(transformer) as Arc<dyn Transformer>,
            ImportMap::default(),
        )
    }
}

/// `EsmScanner` wrapper recording per-specifier transform calls.
#[derive(Default)]
pub(crate) struct CountingTransformer {
    inner: EsmScanner,
    calls: Mutex<FxHashMap<String, usize>>,
    failing: Mutex<FxHashSet<String>>,
    delay: Option<Duration>,
}

impl CountingTransformer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self, specifier: &str) -> usize {
        self.calls.lock().get(specifier).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn fail_on(&self, specifier: &str) {
        self.failing.lock().insert(specifier.to_string());
    }

    pub fn recover(&self, specifier: &str) {
        self.failing.lock().remove(specifier);
    }
}

impl Transformer for CountingTransformer {
    fn transform(&self, input: TransformInput) -> anyhow::Result<TransformOutput> {
        *self
            .calls
            .lock()
            .entry(input.specifier.as_str().to_string())
            .or_default() += 1;
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.lock().contains(input.specifier.as_str()) {
            bail!("syntax error");
        }
        self.inner.transform(input)
    }

    fn checksum(&self) -> String {
        "counting@1".to_string()
    }
}

pub(crate) fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

//! Module registry with single-flight readiness.
//!
//! Every specifier maps to one [`ModuleEntry`]. The traversal that creates an
//! entry owns its compilation; every other caller awaits the entry's
//! readiness signal instead of compiling again.
//!
//! Two traversals compiling opposite ends of a dependency cycle would wait on
//! each other forever. Each traversal records whom it is waiting for; a wait
//! that would close a cycle is refused and the caller uses the current
//! snapshot instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use tokio::sync::watch;

use super::record::Module;
use super::specifier::Specifier;

/// Identifier of one compile traversal.
pub type TraversalId = u64;

/// Settlement state of a module entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed,
}

/// Registry slot: the module record plus its readiness signal.
pub struct ModuleEntry {
    module: RwLock<Module>,
    ready: watch::Sender<Readiness>,
    owner: TraversalId,
}

impl ModuleEntry {
    fn new(module: Module, owner: TraversalId, readiness: Readiness) -> Self {
        let (ready, _) = watch::channel(readiness);
        Self {
            module: RwLock::new(module),
            ready,
            owner,
        }
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Module> {
        self.module.read()
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Module> {
        self.module.write()
    }

    /// Clone of the current record.
    pub fn snapshot(&self) -> Module {
        self.module.read().clone()
    }

    #[inline]
    pub fn readiness(&self) -> Readiness {
        *self.ready.borrow()
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.readiness() != Readiness::Pending
    }

    #[inline]
    pub fn owner(&self) -> TraversalId {
        self.owner
    }

    /// Wait until the entry settles.
    pub async fn settled(&self) -> Readiness {
        let mut rx = self.ready.subscribe();
        match rx.wait_for(|r| *r != Readiness::Pending).await {
            Ok(r) => *r,
            Err(_) => Readiness::Failed,
        }
    }

    /// Resolve the readiness signal. Only the first resolution counts.
    pub(crate) fn resolve(&self, readiness: Readiness) {
        self.ready.send_if_modified(|current| {
            if *current == Readiness::Pending {
                *current = readiness;
                true
            } else {
                false
            }
        });
    }
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("specifier", &self.read().specifier)
            .field("readiness", &self.readiness())
            .field("owner", &self.owner)
            .finish()
    }
}

/// In-memory specifier -> module store owned by one engine.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: DashMap<Specifier, Arc<ModuleEntry>>,
    /// waiter traversal -> traversal it is blocked on
    waits: Mutex<FxHashMap<TraversalId, TraversalId>>,
    next_traversal: AtomicU64,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new compile traversal.
    pub fn next_traversal(&self) -> TraversalId {
        self.next_traversal.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, specifier: &str) -> Option<Arc<ModuleEntry>> {
        self.entries.get(specifier).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, specifier: &str) -> bool {
        self.entries.contains_key(specifier)
    }

    /// Return the entry for `specifier`, inserting a pending placeholder
    /// owned by `owner` if absent. The flag is `true` when the caller created
    /// the entry and must compile it.
    pub fn get_or_create(&self, specifier: &Specifier, owner: TraversalId) -> (Arc<ModuleEntry>, bool) {
        match self.entries.entry(specifier.clone()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(e) => {
                let entry = Arc::new(ModuleEntry::new(
                    Module::new(specifier.clone()),
                    owner,
                    Readiness::Pending,
                ));
                e.insert(Arc::clone(&entry));
                (entry, true)
            }
        }
    }

    /// Install a fresh pending placeholder, replacing any previous entry.
    pub fn replace(&self, specifier: &Specifier, owner: TraversalId) -> Arc<ModuleEntry> {
        let entry = Arc::new(ModuleEntry::new(
            Module::new(specifier.clone()),
            owner,
            Readiness::Pending,
        ));
        self.entries.insert(specifier.clone(), Arc::clone(&entry));
        entry
    }

    /// Insert an already settled record (external stubs).
    pub fn insert_settled(&self, module: Module) -> Arc<ModuleEntry> {
        let specifier = module.specifier.clone();
        let entry = Arc::new(ModuleEntry::new(module, 0, Readiness::Ready));
        self.entries.insert(specifier, Arc::clone(&entry));
        entry
    }

    /// Delete an entry. Dependents are not checked.
    pub fn remove(&self, specifier: &str) -> Option<Arc<ModuleEntry>> {
        self.entries.remove(specifier).map(|(_, e)| e)
    }

    /// Delete `specifier` only if it still maps to `entry`.
    pub(crate) fn remove_entry(&self, specifier: &str, entry: &Arc<ModuleEntry>) -> bool {
        self.entries
            .remove_if(specifier, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted list of registered specifiers.
    pub fn specifiers(&self) -> Vec<Specifier> {
        let mut out: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    /// Point-in-time list of entries, sorted by specifier.
    pub fn entries(&self) -> Vec<(Specifier, Arc<ModuleEntry>)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.waits.lock().clear();
    }

    /// Wait for `entry` on behalf of traversal `waiter`.
    ///
    /// Returns `None` without waiting when the entry is owned by `waiter`
    /// itself or when waiting would close a cycle between traversals.
    pub async fn wait_for(&self, entry: &ModuleEntry, waiter: TraversalId) -> Option<Readiness> {
        let readiness = entry.readiness();
        if readiness != Readiness::Pending {
            return Some(readiness);
        }
        if entry.owner() == waiter {
            return None;
        }
        let _edge = self.begin_wait(waiter, entry.owner())?;

        Some(entry.settled().await)
    }

    /// Record `waiter -> owner` unless the owner already (transitively) waits
    /// on `waiter`. The edge lives as long as the returned guard.
    fn begin_wait(&self, waiter: TraversalId, owner: TraversalId) -> Option<WaitEdge<'_>> {
        let mut waits = self.waits.lock();
        let mut current = owner;
        loop {
            if current == waiter {
                crate::debug!("compile"; "cross-traversal cycle {} <-> {}, using snapshot", waiter, owner);
                return None;
            }
            match waits.get(&current) {
                Some(next) => current = *next,
                None => break,
            }
        }
        waits.insert(waiter, owner);
        Some(WaitEdge {
            waits: &self.waits,
            waiter,
        })
    }
}

/// Removes a `waiter -> owner` edge when the wait ends or its future is
/// dropped.
struct WaitEdge<'a> {
    waits: &'a Mutex<FxHashMap<TraversalId, TraversalId>>,
    waiter: TraversalId,
}

impl Drop for WaitEdge<'_> {
    fn drop(&mut self) {
        self.waits.lock().remove(&self.waiter);
    }
}

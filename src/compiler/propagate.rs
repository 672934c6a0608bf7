//! Hash propagation.
//!
//! When a module's hash changes, every compiled dependent that embeds the
//! module's hash token gets the token overwritten in place and its composite
//! hash recomputed. Dependents whose hash changed are visited in turn. The
//! transformer is never called.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::pipeline::{Compiler, effective_hash};
use crate::freshness::{ContentHash, composite_hash};
use crate::log;
use crate::module::{ModuleEntry, Specifier};

/// One expanded module on the traversal stack.
struct Frame {
    specifier: Specifier,
    hash: ContentHash,
    dependents: Vec<(Specifier, Arc<ModuleEntry>)>,
    cursor: usize,
}

impl Compiler {
    /// Ripple the current hash of `specifier` through its dependents.
    ///
    /// `on_change` runs once per patched dependent with its new hash.
    /// Returns the number of patched modules.
    pub async fn propagate<F>(&self, specifier: &str, mut on_change: F) -> usize
    where
        F: FnMut(&Specifier, ContentHash) + Send,
    {
        let Some(root) = self.registry().get(specifier) else {
            return 0;
        };
        let root_hash = effective_hash(&root);
        if root_hash.is_empty() {
            return 0;
        }

        let root_spec = root.read().specifier.clone();
        let mut on_path: FxHashSet<Specifier> = FxHashSet::default();
        let mut expanded: FxHashMap<Specifier, ContentHash> = FxHashMap::default();
        let mut stack = vec![self.expand(root_spec, root_hash, &mut on_path, &mut expanded)];
        let mut rippled = 0;

        while let Some(frame) = stack.last_mut() {
            let Some((dependent, entry)) = frame.dependents.get(frame.cursor).cloned() else {
                on_path.remove(&frame.specifier);
                stack.pop();
                continue;
            };
            frame.cursor += 1;
            if on_path.contains(&dependent) {
                continue;
            }

            let changed = frame.specifier.clone();
            let changed_hash = frame.hash;
            let Some(new_hash) = self.patch_dependent(&entry, &changed, changed_hash).await else {
                continue;
            };

            rippled += 1;
            on_change(&dependent, new_hash);

            if expanded.get(&dependent) != Some(&new_hash) {
                let frame = self.expand(dependent, new_hash, &mut on_path, &mut expanded);
                stack.push(frame);
            }
        }

        rippled
    }

    fn expand(
        &self,
        specifier: Specifier,
        hash: ContentHash,
        on_path: &mut FxHashSet<Specifier>,
        expanded: &mut FxHashMap<Specifier, ContentHash>,
    ) -> Frame {
        let dependents = self
            .registry()
            .entries()
            .into_iter()
            .filter(|(_, entry)| {
                let module = entry.read();
                module
                    .deps
                    .iter()
                    .any(|d| d.specifier == specifier && d.hash_loc.is_some())
            })
            .collect();

        on_path.insert(specifier.clone());
        expanded.insert(specifier.clone(), hash);
        Frame {
            specifier,
            hash,
            dependents,
            cursor: 0,
        }
    }

    /// Patch `changed`'s token into `entry`. Returns the dependent's new hash
    /// if any byte changed.
    async fn patch_dependent(
        &self,
        entry: &ModuleEntry,
        changed: &Specifier,
        hash: ContentHash,
    ) -> Option<ContentHash> {
        if !entry.is_settled() {
            return None;
        }

        if let Err(err) = self.ensure_output(entry).await {
            log!("propagate"; "{}", err);
            return None;
        }

        let (specifier, deps) = {
            let module = entry.read();
            (module.specifier.clone(), module.deps.clone())
        };
        let contributions: Vec<Option<ContentHash>> = deps
            .iter()
            .map(|dep| {
                let dep_hash = if dep.specifier == *changed {
                    Some(hash)
                } else {
                    self.registry()
                        .get(dep.specifier.as_str())
                        .map(|e| effective_hash(&e))
                };
                dep_hash.filter(|h| !h.is_empty())
            })
            .collect();

        let token = hash.token();
        let new_hash = {
            let mut module = entry.write();
            let mut patched = false;
            for dep in deps.iter().filter(|d| d.specifier == *changed) {
                let Some(loc) = dep.hash_loc else { continue };
                match module.patch_token(loc, &token) {
                    Ok(p) => patched |= p,
                    Err(err) => log!("propagate"; "'{}': {}", specifier, err),
                }
            }
            if !patched {
                return None;
            }
            module.hash = composite_hash(module.source_hash, contributions);
            module.hash
        };

        if let Err(err) = self.persist(entry).await {
            log!("propagate"; "failed to persist '{}': {}", specifier, err);
        }
        Some(new_hash)
    }
}

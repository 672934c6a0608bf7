//! Route tables and the module policies that depend on them.
//!
//! Page routes come from `/pages/**` (builtin extensions, or any file a
//! resolver maps to a route); API routes from `/api/**`. Both tables are
//! keyed by the backing module so a removal can drop its route without
//! knowing the path.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::compiler::Plugins;
use crate::module::{ModuleRegistry, Specifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Page,
    Api,
}

/// Route derived from a module specifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path: String,
    /// Source module backing the route.
    pub module: Specifier,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_index: bool,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    pages: RwLock<BTreeMap<Specifier, Route>>,
    api: RwLock<BTreeMap<Specifier, Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: RouteKind) -> &RwLock<BTreeMap<Specifier, Route>> {
        match kind {
            RouteKind::Page => &self.pages,
            RouteKind::Api => &self.api,
        }
    }

    /// Insert or replace the route of `route.module`.
    pub fn update(&self, kind: RouteKind, route: Route) {
        self.table(kind).write().insert(route.module.clone(), route);
    }

    pub fn remove_by_module(&self, kind: RouteKind, module: &str) -> Option<Route> {
        self.table(kind).write().remove(module)
    }

    pub fn contains_module(&self, kind: RouteKind, module: &str) -> bool {
        self.table(kind).read().contains_key(module)
    }

    /// Route served at `path`.
    pub fn lookup(&self, kind: RouteKind, path: &str) -> Option<Route> {
        self.table(kind)
            .read()
            .values()
            .find(|route| route.path == path)
            .cloned()
    }

    /// All routes of `kind`, sorted by path.
    pub fn routes(&self, kind: RouteKind) -> Vec<Route> {
        let mut routes: Vec<_> = self.table(kind).read().values().cloned().collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        routes
    }

    /// Modules backing routes of `kind`.
    pub fn modules(&self, kind: RouteKind) -> Vec<Specifier> {
        self.table(kind).read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.read().len() + self.api.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.pages.write().clear();
        self.api.write().clear();
    }
}

// ============================================================================
// Policies
// ============================================================================

/// Whether `specifier` is a page: a builtin module under `/pages/`, or a
/// file a resolver maps to a route.
pub fn is_page_module(specifier: &Specifier, plugins: &Plugins) -> bool {
    if !specifier.as_str().starts_with("/pages/") {
        return false;
    }
    if specifier.has_builtin_ext() {
        return true;
    }
    plugins
        .resolve(specifier.as_str())
        .is_some_and(|res| res.as_route.is_some())
}

/// Whether a change to `specifier` can be applied in place by the client.
///
/// Remote modules never are. Builtin modules are when they are pages,
/// components or the app module; anything else needs to be a style module
/// or be claimed by a resolver.
pub fn is_hot_accepting(specifier: &Specifier, plugins: &Plugins, registry: &ModuleRegistry) -> bool {
    if specifier.is_remote() {
        return false;
    }

    let s = specifier.as_str();
    if specifier.has_builtin_ext() {
        return s.starts_with("/pages/") || s.starts_with("/components/") || specifier.is_app();
    }

    if registry
        .get(s)
        .is_some_and(|entry| entry.read().flags.is_style)
    {
        return true;
    }

    plugins
        .resolve(s)
        .is_some_and(|res| res.accept_hot || res.as_route.is_some())
}

/// Route for a page or API module.
///
/// `/pages/blog/index.tsx` maps to `/blog` (index), `/api/users.ts` to
/// `/api/users`. Non-builtin pages take their path from the resolver; a
/// resolver without a route leaves the specifier minus `/pages`. The route
/// always names the source module; compiling it applies any rewrite.
pub fn route_for(specifier: &Specifier, plugins: &Plugins) -> Route {
    if specifier.has_builtin_ext() {
        let path = page_path(specifier.trim_builtin_ext());
        let is_index = path != "/" && specifier.trim_builtin_ext().ends_with("/index");
        return Route {
            path,
            module: specifier.clone(),
            is_index,
        };
    }

    let fallback = Route {
        path: specifier
            .as_str()
            .strip_prefix("/pages")
            .unwrap_or(specifier.as_str())
            .to_string(),
        module: specifier.clone(),
        is_index: false,
    };

    match plugins.resolve(specifier.as_str()).and_then(|res| res.as_route) {
        Some(hint) if !hint.path.is_empty() => Route {
            path: hint.path,
            module: specifier.clone(),
            is_index: hint.is_index,
        },
        _ => fallback,
    }
}

/// `/pages/blog/index` -> `/blog`, `/api/users` -> `/api/users`.
fn page_path(trimmed: &str) -> String {
    let path = trimmed.strip_prefix("/pages").unwrap_or(trimmed);
    let path = path.strip_suffix("/index").unwrap_or(path);
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

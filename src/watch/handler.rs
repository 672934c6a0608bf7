//! Fire-time handling of one debounced specifier.

use crate::compiler::CompileOptions;
use crate::engine::Engine;
use crate::logger::{status_error, status_success};
use crate::module::{ModuleFlags, Specifier};
use crate::reload::{RefreshPolicy, WatchEvent};
use crate::route::{RouteKind, route_for};
use crate::{debug, log};

use super::classifier::WatchScope;
use super::types::ChangeKind;

pub(crate) async fn handle(engine: &Engine, scope: &WatchScope, specifier: Specifier) {
    if scope.is_import_map(&specifier) {
        log!("watch"; "import map changed, rebuilding");
        match engine.rebuild().await {
            Ok(stats) => status_success(&format!("rebuilt {} modules", stats.compiled)),
            Err(e) => status_error("rebuild failed", &format!("{e:#}")),
        }
        return;
    }

    let exists = specifier.source_path(engine.compiler().src_dir()).is_file();
    let tracked = engine.registry().contains(specifier.as_str())
        || scope.is_failed(&specifier)
        || engine.routes().contains_module(RouteKind::Page, specifier.as_str())
        || engine.routes().contains_module(RouteKind::Api, specifier.as_str());
    let Some(kind) = ChangeKind::classify(exists, tracked) else {
        return;
    };
    debug!("watch"; "{} {}", kind.label(), specifier);

    match kind {
        ChangeKind::Modified => on_modify(engine, scope, specifier).await,
        ChangeKind::Added => on_add(engine, specifier).await,
        ChangeKind::Removed => {
            scope.clear_failed(&specifier);
            on_remove(engine, specifier)
        }
    }
}

async fn on_modify(engine: &Engine, scope: &WatchScope, specifier: Specifier) {
    let previous = engine
        .registry()
        .get(specifier.as_str())
        .map(|entry| entry.read().flags.clone())
        .unwrap_or_default();

    let options = CompileOptions::refresh(specifier.as_str().starts_with("/api/"));
    let entry = match engine.compile(specifier.as_str(), options).await {
        Ok(entry) => entry,
        Err(e) => {
            scope.mark_failed(&specifier);
            status_error(&format!("compile {specifier}"), &e.to_string());
            return;
        }
    };
    scope.clear_failed(&specifier);

    let (current, hash) = {
        let module = entry.read();
        (module.flags.clone(), module.hash)
    };
    let refresh = refresh_policy(engine.config().build.ssr, &previous, &current);

    let hot = engine.is_hot_accepting(&specifier);
    if hot {
        engine.events().emit(WatchEvent::modify(specifier.clone(), refresh));
    }

    engine
        .propagate(specifier.as_str(), |dependent, dep_hash| {
            if !hot && engine.is_hot_accepting(dependent) {
                debug!(
                    "watch";
                    "side effect: {}({}) <- {}({})",
                    dependent,
                    &dep_hash.to_hex()[..6],
                    specifier,
                    &hash.to_hex()[..6]
                );
                engine
                    .events()
                    .emit(WatchEvent::modify(dependent.clone(), refresh));
            }
            engine.invalidate_render(dependent);
        })
        .await;

    engine.invalidate_render(&specifier);
    status_success(&format!("modify {specifier}"));
}

async fn on_add(engine: &Engine, specifier: Specifier) {
    let mut route = None;
    let mut emit = false;

    if engine.is_page_module(&specifier) {
        if !engine.routes().contains_module(RouteKind::Page, specifier.as_str()) {
            let page = route_for(&specifier, engine.compiler().plugins());
            engine.routes().update(RouteKind::Page, page.clone());
            route = Some(page);
            emit = true;
        }
    } else if specifier.is_api() {
        let api = route_for(&specifier, engine.compiler().plugins());
        engine.routes().update(RouteKind::Api, api);
    }

    if specifier.is_app() {
        match engine.compile(specifier.as_str(), CompileOptions::default()).await {
            Ok(_) => emit = true,
            Err(e) => {
                status_error(&format!("compile {specifier}"), &e.to_string());
                return;
            }
        }
    }

    if emit {
        engine.events().emit(WatchEvent::add(specifier.clone(), route));
    }
    log!("watch"; "add {}", specifier);
}

fn on_remove(engine: &Engine, specifier: Specifier) {
    engine.registry().remove(specifier.as_str());

    if specifier.is_app() {
        engine.events().emit(WatchEvent::remove(specifier.clone()));
    } else if engine.is_page_module(&specifier) {
        engine
            .routes()
            .remove_by_module(RouteKind::Page, specifier.as_str());
        engine.events().emit(WatchEvent::remove(specifier.clone()));
    } else if specifier.as_str().starts_with("/api/") {
        engine
            .routes()
            .remove_by_module(RouteKind::Api, specifier.as_str());
    }

    engine.invalidate_render(&specifier);
    log!("watch"; "remove {}", specifier);
}

/// `Reload` when server rendering is on and the server data contract of the
/// module changed.
pub(crate) fn refresh_policy(ssr: bool, previous: &ModuleFlags, current: &ModuleFlags) -> RefreshPolicy {
    let hooks_changed =
        !current.server_hooks.is_empty() && previous.server_hooks != current.server_hooks;
    let props_changed = current.props_fn.is_some() && previous.props_fn != current.props_fn;
    if ssr && (hooks_changed || props_changed) {
        RefreshPolicy::Reload
    } else {
        RefreshPolicy::HotPatch
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::classifier::{WatchScope, is_ignored_file};
use super::debouncer::Debouncer;
use super::handler::{handle, refresh_policy};
use super::types::ChangeKind;
use crate::compiler::testing::{CountingTransformer, Fixture};
use crate::compiler::{Plugins, Transformer};
use crate::engine::Engine;
use crate::module::{ModuleFlags, ModuleRegistry, Specifier};
use crate::reload::{RefreshPolicy, RenderCache, WatchEvent};
use crate::route::RouteKind;

fn spec(s: &str) -> Specifier {
    Specifier::new(s)
}

// ============================================================================
// Debouncer
// ============================================================================

#[test]
fn test_debouncer_last_event_wins() {
    let mut debouncer = Debouncer::new(Duration::from_millis(50));
    let t0 = Instant::now();

    debouncer.schedule(spec("/a.ts"), t0);
    debouncer.schedule(spec("/b.ts"), t0 + Duration::from_millis(10));
    // Reschedule a: its first deadline is cancelled
    debouncer.schedule(spec("/a.ts"), t0 + Duration::from_millis(20));
    assert_eq!(debouncer.len(), 2);
    assert_eq!(debouncer.next_deadline(), Some(t0 + Duration::from_millis(60)));

    assert!(debouncer.take_due(t0 + Duration::from_millis(55)).is_empty());
    assert_eq!(debouncer.take_due(t0 + Duration::from_millis(65)), vec![spec("/b.ts")]);
    assert_eq!(debouncer.take_due(t0 + Duration::from_millis(80)), vec![spec("/a.ts")]);
    assert_eq!(debouncer.next_deadline(), None);
}

#[test]
fn test_debouncer_fires_in_deadline_order() {
    let mut debouncer = Debouncer::new(Duration::from_millis(50));
    let t0 = Instant::now();
    debouncer.schedule(spec("/z.ts"), t0);
    debouncer.schedule(spec("/a.ts"), t0 + Duration::from_millis(5));

    let due = debouncer.take_due(t0 + Duration::from_secs(1));
    assert_eq!(due, vec![spec("/z.ts"), spec("/a.ts")]);
}

#[test]
fn test_debouncer_clear() {
    let mut debouncer = Debouncer::new(Duration::from_millis(50));
    debouncer.schedule(spec("/a.ts"), Instant::now());
    debouncer.clear();
    assert_eq!(debouncer.len(), 0);
    assert!(debouncer.take_due(Instant::now() + Duration::from_secs(1)).is_empty());
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_classify_by_existence() {
    assert_eq!(ChangeKind::classify(true, true), Some(ChangeKind::Modified));
    assert_eq!(ChangeKind::classify(true, false), Some(ChangeKind::Added));
    assert_eq!(ChangeKind::classify(false, true), Some(ChangeKind::Removed));
    assert_eq!(ChangeKind::classify(false, false), None);
}

#[test]
fn test_ignored_files() {
    assert!(is_ignored_file("/pages/.index.tsx.swp"));
    assert!(is_ignored_file("/pages/index.tsx~"));
    assert!(is_ignored_file("/lib/util.ts.tmp"));
    assert!(is_ignored_file("/.git/HEAD"));
    assert!(is_ignored_file("/node_modules/react/index.js"));
    assert!(!is_ignored_file("/pages/index.tsx"));
    assert!(!is_ignored_file("/pages/[slug].tsx"));
}

#[test]
fn test_scope() {
    let mut fixture = Fixture::new();
    fixture.config.watch.exclude = vec!["^/pages/drafts/".to_string()];
    let scope = WatchScope::new(&fixture.config);
    let plugins = Plugins::new();
    let registry = ModuleRegistry::new();

    let accepts = |s: &str| scope.accepts(&spec(s), &plugins, &registry);
    assert!(accepts("/pages/index.tsx"));
    assert!(accepts("/api/users.ts"));
    assert!(accepts("/api/_middlewares.ts"));
    assert!(accepts("/app.tsx"));
    assert!(accepts("/import_map.json"));

    assert!(!accepts("/lib/util.ts"));
    assert!(!accepts("/pages/drafts/wip.tsx"));
    assert!(!accepts("/.ripple/development/pages/index.js"));
    assert!(!accepts("/node_modules/x/index.js"));
    assert!(!accepts("/app.css"));

    // Tracked modules are always in scope
    registry.insert_settled(crate::module::Module::new(spec("/lib/util.ts")));
    assert!(scope.accepts(&spec("/lib/util.ts"), &plugins, &registry));
}

#[test]
fn test_scope_custom_build_dir() {
    let mut fixture = Fixture::new();
    fixture.config.build.build_dir = fixture.path("dist");
    let scope = WatchScope::new(&fixture.config);

    assert!(scope.is_excluded(&spec("/dist/pages/index.js")));
    assert!(scope.is_excluded(&spec("/dist")));
    assert!(!scope.is_excluded(&spec("/distance.ts")));
}

#[test]
fn test_specifier_of_path() {
    let fixture = Fixture::new();
    let scope = WatchScope::new(&fixture.config);
    assert_eq!(
        scope.specifier_of(&fixture.path("pages/index.tsx")),
        Some(spec("/pages/index.tsx"))
    );
    assert_eq!(scope.specifier_of(std::path::Path::new("/elsewhere/a.ts")), None);
}

#[test]
fn test_refresh_policy() {
    let plain = ModuleFlags::default();
    let with_props = ModuleFlags {
        props_fn: Some("getServerProps".to_string()),
        ..ModuleFlags::default()
    };
    let with_hooks = ModuleFlags {
        server_hooks: vec!["user".to_string()],
        ..ModuleFlags::default()
    };

    assert_eq!(refresh_policy(true, &plain, &plain), RefreshPolicy::HotPatch);
    assert_eq!(refresh_policy(true, &plain, &with_props), RefreshPolicy::Reload);
    assert_eq!(refresh_policy(true, &plain, &with_hooks), RefreshPolicy::Reload);
    // Unchanged contract
    assert_eq!(refresh_policy(true, &with_props, &with_props), RefreshPolicy::HotPatch);
    // Removing data fetching does not force a reload
    assert_eq!(refresh_policy(true, &with_props, &plain), RefreshPolicy::HotPatch);
    // No server rendering
    assert_eq!(refresh_policy(false, &plain, &with_props), RefreshPolicy::HotPatch);
}

// ============================================================================
// Handler
// ============================================================================

#[derive(Default)]
struct RecordingCache(Mutex<Vec<Option<String>>>);

impl RenderCache for RecordingCache {
    fn invalidate(&self, route: Option<&str>) {
        self.0.lock().push(route.map(str::to_string));
    }
}

struct Session {
    fixture: Fixture,
    counter: Arc<CountingTransformer>,
    cache: Arc<RecordingCache>,
    engine: Engine,
    events: broadcast::Receiver<WatchEvent>,
    scope: WatchScope,
}

impl Session {
    async fn start(files: &[(&str, &str)]) -> Self {
        let fixture = Fixture::new();
        for (path, content) in files {
            fixture.write(path, content);
        }
        let counter = CountingTransformer::new();
        let cache = Arc::new(RecordingCache::default());
        let engine = Engine::builder(fixture.config.clone())
            .transformer(Arc::clone(&counter) as Arc<dyn Transformer>)
            .render_cache(Arc::clone(&cache) as Arc<dyn RenderCache>)
            .build()
            .unwrap();
        engine.prepare().await.unwrap();
        let events = engine.subscribe();
        let scope = WatchScope::new(engine.config());
        Self {
            fixture,
            counter,
            cache,
            engine,
            events,
            scope,
        }
    }

    async fn fire(&self, specifier: &str) {
        handle(&self.engine, &self.scope, spec(specifier)).await;
    }

    fn drain(&mut self) -> Vec<WatchEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn invalidated(&self) -> Vec<Option<String>> {
        std::mem::take(&mut *self.cache.0.lock())
    }
}

const PAGE: &str = "import {x} from '../lib/util'\nexport default function Page() { return x }\n";
const NAV_PAGE: &str =
    "import Nav from '../components/nav'\nexport default function Page() { return Nav }\n";

#[tokio::test]
async fn test_modify_dependency_notifies_hot_dependents() {
    let mut session = Session::start(&[
        ("/lib/util.ts", "export const x = 1"),
        ("/pages/index.tsx", PAGE),
    ])
    .await;
    let page_hash = session.engine.get_module("/pages/index.tsx").unwrap().hash;
    session.invalidated();

    session.fixture.write("/lib/util.ts", "export const x = 2");
    session.fire("/lib/util.ts").await;

    // util is not hot-accepting: the page is notified through propagation
    assert_eq!(
        session.drain(),
        vec![WatchEvent::modify(spec("/pages/index.tsx"), RefreshPolicy::HotPatch)]
    );
    assert_ne!(session.engine.get_module("/pages/index.tsx").unwrap().hash, page_hash);
    assert_eq!(session.counter.calls("/lib/util.ts"), 2);
    assert_eq!(session.counter.calls("/pages/index.tsx"), 1);
    assert_eq!(session.invalidated(), vec![Some("/".to_string())]);
}

#[tokio::test]
async fn test_modify_hot_module_emits_once() {
    let mut session = Session::start(&[
        ("/components/nav.tsx", "export default 'nav'"),
        ("/pages/index.tsx", NAV_PAGE),
    ])
    .await;

    session.fixture.write("/components/nav.tsx", "export default 'menu'");
    session.fire("/components/nav.tsx").await;

    // The dependent page is patched but not notified separately
    assert_eq!(
        session.drain(),
        vec![WatchEvent::modify(spec("/components/nav.tsx"), RefreshPolicy::HotPatch)]
    );
    assert_eq!(session.counter.calls("/pages/index.tsx"), 1);
}

#[tokio::test]
async fn test_modify_with_new_server_props_reloads() {
    let mut session = Session::start(&[("/pages/index.tsx", "export default 1\n")]).await;

    session.fixture.write(
        "/pages/index.tsx",
        "export default 1\nexport async function getServerProps() { return {} }\n",
    );
    session.fire("/pages/index.tsx").await;

    assert_eq!(
        session.drain(),
        vec![WatchEvent::modify(spec("/pages/index.tsx"), RefreshPolicy::Reload)]
    );
}

#[tokio::test]
async fn test_modify_compile_failure_emits_nothing() {
    let mut session = Session::start(&[("/pages/index.tsx", "export default 1\n")]).await;
    session.counter.fail_on("/pages/index.tsx");

    session.fixture.write("/pages/index.tsx", "export default (\n");
    session.fire("/pages/index.tsx").await;

    assert!(session.drain().is_empty());
    assert!(session.engine.get_module("/pages/index.tsx").is_none());
}

#[tokio::test]
async fn test_failed_component_recompiles_after_fix() {
    let mut session = Session::start(&[
        ("/components/nav.tsx", "export default 'nav'"),
        ("/pages/index.tsx", NAV_PAGE),
    ])
    .await;
    let nav = spec("/components/nav.tsx");
    session.counter.fail_on(nav.as_str());

    session.fixture.write(nav.as_str(), "export default (");
    session.fire(nav.as_str()).await;
    assert!(session.engine.get_module(nav.as_str()).is_none());
    assert!(session.drain().is_empty());
    // Still in scope although it left the graph
    assert!(session.scope.is_failed(&nav));
    assert!(session.scope.accepts(
        &nav,
        session.engine.compiler().plugins(),
        session.engine.registry()
    ));

    session.counter.recover(nav.as_str());
    session.fixture.write(nav.as_str(), "export default 'menu'");
    session.fire(nav.as_str()).await;

    assert!(session.engine.get_module(nav.as_str()).is_some());
    assert!(!session.scope.is_failed(&nav));
    assert_eq!(
        session.drain(),
        vec![WatchEvent::modify(nav.clone(), RefreshPolicy::HotPatch)]
    );
    assert_eq!(session.counter.calls(nav.as_str()), 3);
    assert_eq!(session.counter.calls("/pages/index.tsx"), 1);
}

#[tokio::test]
async fn test_add_page_registers_route() {
    let mut session = Session::start(&[("/pages/index.tsx", "export default 1\n")]).await;

    session.fixture.write("/pages/about.tsx", "export default 2\n");
    session.fire("/pages/about.tsx").await;

    let events = session.drain();
    assert_eq!(events.len(), 1);
    let WatchEvent::Add { specifier, route } = &events[0] else {
        panic!("expected add, got {:?}", events[0]);
    };
    assert_eq!(specifier.as_str(), "/pages/about.tsx");
    assert_eq!(route.as_ref().unwrap().path, "/about");
    assert!(
        session
            .engine
            .routes()
            .contains_module(RouteKind::Page, "/pages/about.tsx")
    );

    // Removed before it was ever compiled: route still dropped
    session.fixture.remove("/pages/about.tsx");
    session.fire("/pages/about.tsx").await;
    assert_eq!(session.drain(), vec![WatchEvent::remove(spec("/pages/about.tsx"))]);
    assert!(
        session
            .engine
            .routes()
            .lookup(RouteKind::Page, "/about")
            .is_none()
    );
}

#[tokio::test]
async fn test_add_api_is_silent() {
    let mut session = Session::start(&[]).await;

    session.fixture.write("/api/users.ts", "export default 1\n");
    session.fire("/api/users.ts").await;

    assert!(session.drain().is_empty());
    assert!(
        session
            .engine
            .routes()
            .contains_module(RouteKind::Api, "/api/users.ts")
    );
}

#[tokio::test]
async fn test_add_and_remove_app_module() {
    let mut session = Session::start(&[("/pages/index.tsx", "export default 1\n")]).await;

    session.fixture.write("/app.tsx", "export default function App() {}\n");
    session.fire("/app.tsx").await;
    assert_eq!(session.drain(), vec![WatchEvent::add(spec("/app.tsx"), None)]);
    assert!(session.engine.registry().contains("/app.tsx"));
    session.invalidated();

    session.fixture.remove("/app.tsx");
    session.fire("/app.tsx").await;
    assert_eq!(session.drain(), vec![WatchEvent::remove(spec("/app.tsx"))]);
    assert!(!session.engine.registry().contains("/app.tsx"));
    // App removal clears every rendered page
    assert_eq!(session.invalidated(), vec![None]);
}

#[tokio::test]
async fn test_remove_page() {
    let mut session = Session::start(&[("/pages/blog/index.tsx", "export default 1\n")]).await;
    session.invalidated();

    session.fixture.remove("/pages/blog/index.tsx");
    session.fire("/pages/blog/index.tsx").await;

    assert_eq!(session.drain(), vec![WatchEvent::remove(spec("/pages/blog/index.tsx"))]);
    assert!(session.engine.get_module("/pages/blog/index.tsx").is_none());
    assert!(session.engine.routes().is_empty());
    assert_eq!(session.invalidated(), vec![Some("/blog".to_string())]);
}

#[tokio::test]
async fn test_untracked_missing_file_is_ignored() {
    let mut session = Session::start(&[]).await;
    session.fire("/pages/ghost.tsx").await;
    assert!(session.drain().is_empty());
}

#[tokio::test]
async fn test_import_map_change_rebuilds() {
    let mut session = Session::start(&[("/pages/index.tsx", "export default 1\n")]).await;
    assert_eq!(session.counter.calls("/pages/index.tsx"), 1);

    session.fixture.write(
        "/import_map.json",
        r#"{"imports":{"react":"https://esm.sh/react@17.0.2"}}"#,
    );
    session.fire("/import_map.json").await;

    let import_map = session.engine.compiler().import_map();
    assert_eq!(
        import_map.resolve("react", "/pages/index.tsx").as_deref(),
        Some("https://esm.sh/react@17.0.2")
    );
    // Clean build: the page went through the transformer again
    assert_eq!(session.counter.calls("/pages/index.tsx"), 2);
    assert!(session.engine.registry().contains("/pages/index.tsx"));
    assert!(session.invalidated().contains(&None));
    assert!(session.drain().is_empty());
}

#[tokio::test]
async fn test_watch_loop_end_to_end() {
    let mut session = Session::start(&[("/pages/index.tsx", "export default 1\n")]).await;
    let handle = session.engine.watch().unwrap();

    // Give the platform watcher a moment to attach
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.fixture.write("/pages/index.tsx", "export default 2\n");

    let event = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .expect("no event within timeout")
        .unwrap();
    assert_eq!(
        event,
        WatchEvent::modify(spec("/pages/index.tsx"), RefreshPolicy::HotPatch)
    );

    handle.stop().await;
}

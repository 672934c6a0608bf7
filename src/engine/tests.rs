use std::ops::ControlFlow;
use std::sync::Arc;

use super::*;
use crate::compiler::testing::{CountingTransformer, Fixture};

fn engine_with(fixture: &Fixture, counter: &Arc<CountingTransformer>) -> Engine {
    Engine::builder(fixture.config.clone())
        .transformer(Arc::clone(counter) as Arc<dyn Transformer>)
        .build()
        .unwrap()
}

fn site() -> Fixture {
    let fixture = Fixture::new();
    fixture.write("/app.tsx", "export default function App() {}\n");
    fixture.write(
        "/pages/index.tsx",
        "import Nav from '../components/nav'\nexport default function Home() { return Nav }\n",
    );
    fixture.write("/pages/blog/index.tsx", "export default function Blog() {}\n");
    fixture.write("/pages/notes.txt", "not a page");
    fixture.write("/components/nav.tsx", "export default 'nav'\n");
    fixture.write("/api/users.ts", "export default function users() {}\n");
    fixture.write("/api/_middlewares.ts", "export default []\n");
    fixture
}

#[tokio::test]
async fn test_prepare_compiles_app_and_routes() {
    let fixture = site();
    let counter = CountingTransformer::new();
    let engine = engine_with(&fixture, &counter);

    let stats = engine.prepare().await.unwrap();
    assert_eq!(stats.failed, 0);
    // app, two pages, one API route
    assert_eq!(stats.compiled, 4);
    assert_eq!(stats.routes, 3);
    assert!(stats.clean);

    let routes = engine.routes();
    assert_eq!(
        routes.lookup(RouteKind::Page, "/").unwrap().module.as_str(),
        "/pages/index.tsx"
    );
    assert!(routes.lookup(RouteKind::Page, "/blog").unwrap().is_index);
    assert!(routes.contains_module(RouteKind::Api, "/api/users.ts"));
    assert!(!routes.contains_module(RouteKind::Api, "/api/_middlewares.ts"));

    // Dependencies came along
    assert!(engine.registry().contains("/components/nav.tsx"));
    assert!(!engine.registry().contains("/pages/notes.txt"));
    assert_eq!(counter.total(), 5);
    assert!(BuildManifest::path(&fixture.build_dir()).is_file());

    // API modules keep remote deps external
    assert!(engine.get_module("/api/users.ts").unwrap().external_remote_deps);
}

#[tokio::test]
async fn test_restart_reuses_warm_cache() {
    let fixture = site();
    let first = CountingTransformer::new();
    engine_with(&fixture, &first).prepare().await.unwrap();
    assert!(first.total() > 0);

    let second = CountingTransformer::new();
    let engine = engine_with(&fixture, &second);
    let stats = engine.prepare().await.unwrap();

    assert!(!stats.clean);
    assert_eq!(stats.compiled, 4);
    assert_eq!(second.total(), 0);

    // Same hashes as a fresh compile would give
    let nav = engine.get_module("/components/nav.tsx").unwrap();
    let home = engine.get_module("/pages/index.tsx").unwrap();
    assert_eq!(
        home.hash,
        crate::freshness::composite_hash(home.source_hash, [Some(nav.hash)])
    );
}

#[tokio::test]
async fn test_transformer_change_discards_cache() {
    let fixture = site();
    let counter = CountingTransformer::new();
    engine_with(&fixture, &counter).prepare().await.unwrap();

    // Default transformer has a different checksum
    let engine = Engine::builder(fixture.config.clone()).build().unwrap();
    let stats = engine.prepare().await.unwrap();
    assert!(stats.clean);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_reload_config_forces_clean_build() {
    let fixture = site();
    let counter = CountingTransformer::new();
    engine_with(&fixture, &counter).prepare().await.unwrap();

    let mut config = fixture.config.clone();
    config.build.reload = true;
    let again = CountingTransformer::new();
    let engine = Engine::builder(config)
        .transformer(Arc::clone(&again) as Arc<dyn Transformer>)
        .build()
        .unwrap();

    let stats = engine.prepare().await.unwrap();
    assert!(stats.clean);
    assert_eq!(again.total(), 5);
    assert!(!engine.compiler().is_reload());
}

#[tokio::test]
async fn test_rebuild_reloads_import_map() {
    let fixture = site();
    let counter = CountingTransformer::new();
    let engine = engine_with(&fixture, &counter);
    engine.prepare().await.unwrap();
    assert!(engine.compiler().import_map().is_empty());

    fixture.write(
        "/import_map.json",
        r#"{"imports":{"~/":"./"}}"#,
    );
    let stats = engine.rebuild().await.unwrap();
    assert!(stats.clean);
    assert_eq!(
        engine.compiler().import_map().resolve("~/lib/a.ts", "/pages/index.tsx").as_deref(),
        Some("./lib/a.ts")
    );
    assert_eq!(counter.calls("/pages/index.tsx"), 2);
}

#[tokio::test]
async fn test_virtual_module_lifecycle() {
    let fixture = Fixture::new();
    fixture.write("/components/nav.tsx", "export default 'nav'\n");
    let counter = CountingTransformer::new();
    let engine = engine_with(&fixture, &counter);

    let entry = engine
        .add_module(
            "/pages/generated.tsx",
            "import Nav from '../components/nav'\nexport default Nav\n",
        )
        .await
        .unwrap();
    assert_eq!(entry.read().deps.len(), 1);
    assert_eq!(
        engine
            .routes()
            .lookup(RouteKind::Page, "/generated")
            .unwrap()
            .module
            .as_str(),
        "/pages/generated.tsx"
    );
    // Never written to the source tree
    assert!(!fixture.path("pages/generated.tsx").exists());

    assert!(engine.remove_module("/pages/generated.tsx"));
    assert!(engine.get_module("/pages/generated.tsx").is_none());
    assert!(engine.routes().is_empty());
    assert!(!engine.remove_module("/pages/generated.tsx"));
}

#[tokio::test]
async fn test_virtual_api_module() {
    let fixture = Fixture::new();
    let counter = CountingTransformer::new();
    let engine = engine_with(&fixture, &counter);

    engine
        .add_module("/api/health.ts", "export default () => 'ok'\n")
        .await
        .unwrap();
    assert!(engine.routes().contains_module(RouteKind::Api, "/api/health.ts"));

    engine.remove_module("/api/health.ts");
    assert!(!engine.routes().contains_module(RouteKind::Api, "/api/health.ts"));
}

fn cyclic() -> Fixture {
    let fixture = Fixture::new();
    fixture.write("/a.ts", "import './b'\nimport './c'\n");
    fixture.write("/b.ts", "import './c'\n");
    fixture.write("/c.ts", "import './a'\n");
    fixture
}

#[tokio::test]
async fn test_walk_deps_is_cycle_safe() {
    let fixture = cyclic();
    let counter = CountingTransformer::new();
    let engine = engine_with(&fixture, &counter);
    engine.compile("/a.ts", CompileOptions::default()).await.unwrap();

    let mut seen = Vec::new();
    let flow = engine.walk_deps("/a.ts", |dep| {
        seen.push(dep.specifier.to_string());
        ControlFlow::Continue(())
    });

    assert_eq!(flow, ControlFlow::Continue(()));
    // a's deps first, then b's, then c's; a is not expanded twice
    assert_eq!(seen, ["/b.ts", "/c.ts", "/c.ts", "/a.ts"]);
}

#[tokio::test]
async fn test_walk_deps_early_stop() {
    let fixture = cyclic();
    let counter = CountingTransformer::new();
    let engine = engine_with(&fixture, &counter);
    engine.compile("/a.ts", CompileOptions::default()).await.unwrap();

    let mut seen = Vec::new();
    let flow = engine.walk_deps("/a.ts", |dep| {
        seen.push(dep.specifier.to_string());
        if dep.specifier.as_str() == "/c.ts" {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(seen, ["/b.ts", "/c.ts"]);
    assert_eq!(
        engine.walk_deps("/missing.ts", |_| ControlFlow::Break(())),
        ControlFlow::Continue(())
    );
}

#[tokio::test]
async fn test_find_module() {
    let fixture = site();
    let counter = CountingTransformer::new();
    let engine = engine_with(&fixture, &counter);
    engine.prepare().await.unwrap();

    let found = engine
        .find_module(|m| m.depends_on("/components/nav.tsx"))
        .unwrap();
    assert_eq!(found.specifier.as_str(), "/pages/index.tsx");
    assert!(engine.find_module(|m| m.external).is_none());
}

#[tokio::test]
async fn test_outputs_load_lazily_after_restart() {
    let fixture = Fixture::new();
    fixture.write(
        "/pages/index.tsx",
        "export default function Page() { return 1 }\nexport async function getServerProps() { return { a: 1 } }\n",
    );
    let counter = CountingTransformer::new();
    engine_with(&fixture, &counter).prepare().await.unwrap();

    let engine = engine_with(&fixture, &CountingTransformer::new());
    engine.prepare().await.unwrap();

    let output = engine.output("/pages/index.tsx").await.unwrap().unwrap();
    assert!(String::from_utf8(output).unwrap().contains("getServerProps"));

    let client = engine.client_output("/pages/index.tsx").await.unwrap().unwrap();
    let client = std::str::from_utf8(&client).unwrap();
    assert!(client.contains("function Page"));
    assert!(!client.contains("getServerProps"));

    assert!(engine.output("/pages/none.tsx").await.unwrap().is_none());
}

#[tokio::test]
async fn test_hot_accept_policy_uses_plugins() {
    let fixture = Fixture::new();
    let engine = Engine::builder(fixture.config.clone())
        .resolver(Regex::new(r"\.vue$").unwrap(), |_: &str| {
            crate::compiler::Resolution {
                accept_hot: true,
                ..Default::default()
            }
        })
        .build()
        .unwrap();

    assert!(engine.is_hot_accepting(&Specifier::new("/lib/widget.vue")));
    assert!(!engine.is_hot_accepting(&Specifier::new("/lib/widget.ts")));
    assert!(engine.is_page_module(&Specifier::new("/pages/a.jsx")));
}

#[test]
fn test_engines_are_independent() {
    let a = Fixture::new();
    let b = Fixture::new();
    let engine_a = Engine::builder(a.config.clone()).build().unwrap();
    let engine_b = Engine::builder(b.config.clone()).build().unwrap();

    engine_a
        .registry()
        .insert_settled(Module::new(Specifier::new("/x.ts")));
    assert!(engine_a.registry().contains("/x.ts"));
    assert!(!engine_b.registry().contains("/x.ts"));
}

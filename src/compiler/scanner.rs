//! `EsmScanner`: a regex-based import rewriter.
//!
//! It does not parse or downlevel anything. It finds `import`/`export ...
//! from` and `import()` specifiers, rewrites local ones to the dependency's
//! artifact path followed by a `?v=` hash placeholder, maps bare specifiers
//! through the import map, and wraps CSS in a module exporting its text.
//!
//! ```text
//! import Button from "../components/button.tsx"
//!   -> import Button from "../components/button.js?v=000000"
//! ```

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use super::plugin::{TransformInput, TransformOutput, TransformedDep, Transformer};
use crate::config::ImportMap;
use crate::module::{BUILTIN_EXTS, ModuleFlags, SourceKind, Specifier, clean_path, relative_import};

/// Hash placeholder written after `?v=`; patched in place later.
pub const HASH_PLACEHOLDER: &str = "000000";

/// `from "x"`, `import "x"`, `import("x")`
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(from|import)[ \t]*(\([ \t]*)?["']([^"'\r\n]+)["']"#).expect("valid import regex")
});

static PROPS_FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export[ \t]+(async[ \t]+)?function[ \t]+(get[A-Za-z0-9_]*Props)[ \t]*\(")
        .expect("valid props regex")
});

static PATHS_FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export[ \t]+(async[ \t]+)?function[ \t]+getStaticPaths[ \t]*\(")
        .expect("valid paths regex")
});

static SERVER_HOOK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"useServerData[ \t]*\([ \t]*["']([A-Za-z0-9_\-]+)["']"#)
        .expect("valid hook regex")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct EsmScanner;

impl EsmScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Transformer for EsmScanner {
    fn transform(&self, input: TransformInput) -> Result<TransformOutput> {
        let code = String::from_utf8(input.code)
            .with_context(|| format!("'{}' is not valid UTF-8", input.specifier))?;

        if input.kind == SourceKind::Css {
            return css_module(&input.specifier, &code, input.options.source_map);
        }

        let importer = Specifier::new(input.specifier.local_path());
        let ctx = ScanContext {
            specifier: &input.specifier,
            importer_dir: importer.dir(),
            working_dir: &input.options.working_dir,
            import_map: &input.options.import_map,
            external_remote_deps: input.options.external_remote_deps,
        };

        let mut out = String::with_capacity(code.len() + 64);
        let mut deps: Vec<TransformedDep> = Vec::new();
        let mut last = 0;

        for caps in IMPORT_RE.captures_iter(&code) {
            let (Some(whole), Some(raw)) = (caps.get(0), caps.get(3)) else {
                continue;
            };
            if !is_keyword_start(&code, whole.start()) {
                continue;
            }
            let is_dynamic = caps.get(2).is_some();
            if is_dynamic && &caps[1] != "import" {
                continue;
            }

            let Some((dep, rewritten)) = ctx.rewrite(raw.as_str()) else {
                continue;
            };
            // Anchor the marker on the opening quote: `./b.js?v=` is a
            // substring of `../b.js?v=`.
            let quote = &code[raw.start() - 1..raw.start()];
            let dep = TransformedDep {
                resolved: dep.resolved.map(|marker| format!("{quote}{marker}")),
                ..dep
            };
            out.push_str(&code[last..raw.start()]);
            out.push_str(&rewritten);
            last = raw.end();

            if !deps.iter().any(|d| d.specifier == dep.specifier) {
                deps.push(TransformedDep { is_dynamic, ..dep });
            }
        }
        out.push_str(&code[last..]);

        let map = input
            .options
            .source_map
            .then(|| source_map(&input.specifier, &code));

        Ok(TransformOutput {
            code: out.into_bytes(),
            deps,
            map,
            flags: scan_flags(&code),
        })
    }

    fn checksum(&self) -> String {
        format!("esm-scanner@{}", env!("CARGO_PKG_VERSION"))
    }
}

struct ScanContext<'a> {
    specifier: &'a Specifier,
    importer_dir: &'a str,
    working_dir: &'a Path,
    import_map: &'a ImportMap,
    external_remote_deps: bool,
}

impl ScanContext<'_> {
    /// Dependency and replacement text for one import specifier.
    fn rewrite(&self, raw: &str) -> Option<(TransformedDep, String)> {
        if raw.starts_with("https://") || raw.starts_with("http://") {
            return Some(self.remote(raw));
        }
        if raw.starts_with("./") || raw.starts_with("../") || raw.starts_with('/') {
            let joined = if raw.starts_with('/') {
                clean_path(raw)
            } else {
                clean_path(&format!("{}/{raw}", self.importer_dir))
            };
            return Some(self.local(&joined));
        }

        let target = self.import_map.resolve(raw, self.specifier.as_str())?;
        if target.starts_with("https://") || target.starts_with("http://") {
            Some(self.remote(&target))
        } else {
            Some(self.local(&clean_path(&target)))
        }
    }

    fn local(&self, path: &str) -> (TransformedDep, String) {
        let specifier = Specifier::new(probe_extension(self.working_dir, path));
        let target = format!("/{}", specifier.output_path().to_string_lossy().replace('\\', "/"));
        let rewritten = format!(
            "{}?v={HASH_PLACEHOLDER}",
            relative_import(self.importer_dir, &target)
        );
        let dep = TransformedDep {
            specifier: specifier.as_str().to_string(),
            resolved: Some(rewritten.clone()),
            is_dynamic: false,
        };
        (dep, rewritten)
    }

    fn remote(&self, url: &str) -> (TransformedDep, String) {
        let specifier = Specifier::new(url);
        let rewritten = if self.external_remote_deps {
            url.to_string()
        } else {
            let target = format!("/{}", specifier.output_path().to_string_lossy().replace('\\', "/"));
            relative_import(self.importer_dir, &target)
        };
        let dep = TransformedDep {
            specifier: specifier.as_str().to_string(),
            resolved: None,
            is_dynamic: false,
        };
        (dep, rewritten)
    }
}

/// Complete an extensionless local import by probing the source tree.
fn probe_extension(working_dir: &Path, path: &str) -> String {
    let spec = Specifier::new(path);
    if spec.extension().is_some() {
        return path.to_string();
    }
    let exists = |candidate: &str| Specifier::new(candidate).source_path(working_dir).is_file();

    BUILTIN_EXTS
        .iter()
        .map(|ext| format!("{path}.{ext}"))
        .chain(BUILTIN_EXTS.iter().map(|ext| format!("{path}/index.{ext}")))
        .find(|candidate| exists(candidate))
        .unwrap_or_else(|| path.to_string())
}

/// The match must start a token: not preceded by an identifier character or `.`.
fn is_keyword_start(code: &str, start: usize) -> bool {
    code[..start]
        .bytes()
        .next_back()
        .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c == b'.'))
}

fn scan_flags(code: &str) -> ModuleFlags {
    let mut hooks: Vec<String> = SERVER_HOOK_RE
        .captures_iter(code)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    hooks.sort();
    hooks.dedup();

    ModuleFlags {
        is_style: false,
        props_fn: PROPS_FN_RE
            .captures(code)
            .and_then(|c| c.get(2))
            .map(|m| m.as_str().to_string()),
        paths_fn: PATHS_FN_RE.is_match(code),
        server_hooks: hooks,
    }
}

fn css_module(specifier: &Specifier, css: &str, with_map: bool) -> Result<TransformOutput> {
    let text = serde_json::to_string(css)?;
    let code = format!("const css = {text};\nexport default css;\n");
    Ok(TransformOutput {
        code: code.into_bytes(),
        deps: Vec::new(),
        map: with_map.then(|| source_map(specifier, css)),
        flags: ModuleFlags {
            is_style: true,
            ..Default::default()
        },
    })
}

/// Minimal v3 source map carrying the original source.
fn source_map(specifier: &Specifier, source: &str) -> String {
    serde_json::json!({
        "version": 3,
        "sources": [specifier.as_str()],
        "sourcesContent": [source],
        "names": [],
        "mappings": "",
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::plugin::TransformOptions;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn run(dir: &Path, specifier: &str, code: &str, map: ImportMap) -> TransformOutput {
        let spec = Specifier::new(specifier);
        EsmScanner
            .transform(TransformInput {
                kind: SourceKind::from_extension(spec.extension()),
                specifier: spec,
                code: code.as_bytes().to_vec(),
                options: TransformOptions {
                    working_dir: dir.to_path_buf(),
                    import_map: Arc::new(map),
                    source_map: false,
                    dev: true,
                    external_remote_deps: false,
                },
            })
            .unwrap()
    }

    #[test]
    fn test_rewrites_local_imports() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("components")).unwrap();
        fs::write(dir.path().join("components/button.tsx"), "").unwrap();

        let out = run(
            dir.path(),
            "/pages/index.tsx",
            "import Button from '../components/button'\nconst x = 1\n",
            ImportMap::default(),
        );
        let code = String::from_utf8(out.code).unwrap();
        assert_eq!(
            code,
            "import Button from '../components/button.js?v=000000'\nconst x = 1\n"
        );
        assert_eq!(out.deps.len(), 1);
        assert_eq!(out.deps[0].specifier, "/components/button.tsx");
        assert_eq!(
            out.deps[0].resolved.as_deref(),
            Some("'../components/button.js?v=000000")
        );
    }

    #[test]
    fn test_markers_are_distinct_for_nested_relative_imports() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pages")).unwrap();
        fs::write(dir.path().join("b.ts"), "").unwrap();
        fs::write(dir.path().join("pages/b.ts"), "").unwrap();

        let out = run(
            dir.path(),
            "/pages/a.ts",
            "import {outer} from '../b'\nimport {inner} from \"./b\"\n",
            ImportMap::default(),
        );
        let code = String::from_utf8(out.code).unwrap();
        let outer = out.deps[0].resolved.as_deref().unwrap();
        let inner = out.deps[1].resolved.as_deref().unwrap();
        assert_eq!(outer, "'../b.js?v=000000");
        assert_eq!(inner, "\"./b.js?v=000000");
        assert_eq!(code.matches(outer).count(), 1);
        assert_eq!(code.matches(inner).count(), 1);
    }

    #[test]
    fn test_dynamic_and_side_effect_imports() {
        let dir = TempDir::new().unwrap();
        let out = run(
            dir.path(),
            "/app.tsx",
            "import './style.css';\nconst m = await import(\"./lazy.ts\");\n",
            ImportMap::default(),
        );
        let code = String::from_utf8(out.code).unwrap();
        assert!(code.contains("import './style.css.js?v=000000'"));
        assert!(code.contains("import(\"./lazy.js?v=000000\")"));
        assert!(!out.deps[0].is_dynamic);
        assert!(out.deps[1].is_dynamic);
    }

    #[test]
    fn test_bare_and_remote_imports() {
        let dir = TempDir::new().unwrap();
        let map: ImportMap =
            serde_json::from_str(r#"{"imports":{"react":"https://esm.sh/react"}}"#).unwrap();
        let out = run(
            dir.path(),
            "/pages/index.tsx",
            "import React from 'react'\nimport x from 'unmapped'\n",
            map,
        );
        let code = String::from_utf8(out.code).unwrap();
        assert!(code.contains("from '../-/esm.sh/react.js'"));
        assert!(code.contains("from 'unmapped'"));
        assert_eq!(out.deps.len(), 1);
        assert_eq!(out.deps[0].specifier, "https://esm.sh/react");
        assert!(out.deps[0].resolved.is_none());
    }

    #[test]
    fn test_ignores_identifier_suffix() {
        let dir = TempDir::new().unwrap();
        let out = run(
            dir.path(),
            "/a.ts",
            "const transform = 1; obj.import('./x.ts'); reimport './y.ts'",
            ImportMap::default(),
        );
        assert!(out.deps.is_empty());
    }

    #[test]
    fn test_flags() {
        let dir = TempDir::new().unwrap();
        let out = run(
            dir.path(),
            "/pages/post.tsx",
            "export async function getServerSideProps() { return {} }\n\
             export function getStaticPaths() { return [] }\n\
             const a = useServerData('posts'); const b = useServerData(\"posts\");\n",
            ImportMap::default(),
        );
        assert_eq!(out.flags.props_fn.as_deref(), Some("getServerSideProps"));
        assert!(out.flags.paths_fn);
        assert_eq!(out.flags.server_hooks, vec!["posts".to_string()]);
    }

    #[test]
    fn test_css_module() {
        let dir = TempDir::new().unwrap();
        let out = run(dir.path(), "/style.css", "a { color: red }", ImportMap::default());
        let code = String::from_utf8(out.code).unwrap();
        assert_eq!(code, "const css = \"a { color: red }\";\nexport default css;\n");
        assert!(out.flags.is_style);
    }
}

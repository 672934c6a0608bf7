//! Canonical module specifiers.
//!
//! Local specifiers are absolute paths inside the source directory
//! (`/pages/index.tsx`). Remote specifiers are `http(s)://` URLs and map to
//! `-/[http_]<host>[_<port>]/<path>` inside the build directory, with a
//! short hash of the query string inserted before the extension.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::freshness::hash_bytes;

/// Extensions compiled by the built-in pipeline (stripped from output names).
pub const BUILTIN_EXTS: [&str; 5] = ["tsx", "jsx", "ts", "js", "mjs"];

/// Canonical identifier for one source unit in the module graph.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Specifier(Arc<str>);

impl Specifier {
    /// Normalize a raw specifier.
    ///
    /// Remote URLs are kept verbatim; everything else is cleaned into an
    /// absolute slash-separated path.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        if is_remote_str(raw) {
            Self(Arc::from(raw))
        } else {
            Self(Arc::from(clean_path(raw)))
        }
    }

    /// Build a local specifier from a filesystem path under `src_dir`.
    pub fn from_source_path(src_dir: &Path, path: &Path) -> Option<Self> {
        let rel = path.strip_prefix(src_dir).ok()?;
        let mut out = String::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => {
                    out.push('/');
                    out.push_str(part.to_str()?);
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        if out.is_empty() {
            return None;
        }
        Some(Self(Arc::from(out)))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_remote(&self) -> bool {
        is_remote_str(&self.0)
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        self.0.starts_with('/')
    }

    /// File extension of the last path segment, without query or fragment.
    pub fn extension(&self) -> Option<&str> {
        let path = self.path_part();
        let name = path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext)
    }

    pub fn has_builtin_ext(&self) -> bool {
        self.extension()
            .is_some_and(|ext| BUILTIN_EXTS.contains(&ext))
    }

    /// Specifier with a built-in module extension removed.
    pub fn trim_builtin_ext(&self) -> &str {
        match self.extension() {
            Some(ext) if BUILTIN_EXTS.contains(&ext) => &self.0[..self.0.len() - ext.len() - 1],
            _ => &self.0,
        }
    }

    /// Top-level application module (`/app.tsx`, `/app.js`, ...).
    pub fn is_app(&self) -> bool {
        self.has_builtin_ext() && self.trim_builtin_ext() == "/app"
    }

    /// API route module (`/api/**` with a built-in extension, middlewares excluded).
    pub fn is_api(&self) -> bool {
        self.0.starts_with("/api/")
            && !self.0.starts_with("/api/_middlewares.")
            && self.has_builtin_ext()
    }

    /// Path of this module inside the build tree, always starting with `/`.
    pub fn local_path(&self) -> String {
        if !self.is_remote() {
            return self.0.to_string();
        }
        match url::Url::parse(&self.0) {
            Ok(url) => {
                let scheme = if url.scheme() == "http" { "http_" } else { "" };
                let host = url.host_str().unwrap_or("unknown");
                let port = url.port().map(|p| format!("_{p}")).unwrap_or_default();
                let path = if url.path().is_empty() { "/" } else { url.path() };
                let path = match url.query().filter(|q| !q.is_empty()) {
                    Some(query) => with_query_suffix(path, query),
                    None => path.to_string(),
                };
                format!("/-/{scheme}{host}{port}{path}")
            }
            Err(_) => format!("/-/{}", self.0.replace("://", "/")),
        }
    }

    /// Artifact location relative to the build directory.
    ///
    /// The file name keeps non-builtin extensions (`style.css` -> `style.css.js`).
    pub fn output_path(&self) -> PathBuf {
        let local = self.local_path();
        let (dir, name) = local.rsplit_once('/').unwrap_or(("", local.as_str()));
        let name = BUILTIN_EXTS
            .iter()
            .find_map(|ext| name.strip_suffix(&format!(".{ext}")))
            .unwrap_or(name);
        let name = if name.is_empty() { "index" } else { name };

        let mut path = PathBuf::new();
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.push(format!("{name}.js"));
        path
    }

    /// Source file backing a local specifier.
    pub fn source_path(&self, src_dir: &Path) -> PathBuf {
        let mut path = src_dir.to_path_buf();
        for part in self.0.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    /// Directory part of the local path (`/pages/blog/a.tsx` -> `/pages/blog`).
    pub fn dir(&self) -> &str {
        match self.0.rfind('/') {
            Some(0) | None => "/",
            Some(idx) if !self.is_remote() => &self.0[..idx],
            Some(_) => "/",
        }
    }

    fn path_part(&self) -> &str {
        let end = self.0.find(['?', '#']).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

/// `/react.js` + `dev` -> `/react.<hash8>.js`; the suffix goes before the
/// extension so builtin extensions are still stripped.
fn with_query_suffix(path: &str, query: &str) -> String {
    let tag = &hash_bytes(query.as_bytes()).to_hex()[..8];
    let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
    let name = if name.is_empty() { "index" } else { name };
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && (BUILTIN_EXTS.contains(&ext) || ext == "css") => {
            format!("{dir}/{stem}.{tag}.{ext}")
        }
        _ => format!("{dir}/{name}.{tag}"),
    }
}

fn is_remote_str(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://")
}

/// Clean a slash path: resolve `.` and `..`, collapse separators, force a
/// leading `/`.
pub fn clean_path(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Relative import path from directory `from_dir` to absolute path `to`.
///
/// ```ignore
/// relative_import("/pages", "/components/b.js") == "../components/b.js"
/// relative_import("/pages", "/pages/a.js")      == "./a.js"
/// ```
pub fn relative_import(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|p| !p.is_empty()).collect();
    let target: Vec<&str> = to.split('/').filter(|p| !p.is_empty()).collect();

    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    // The last target segment is a file name, never a shared directory.
    let common = common.min(target.len().saturating_sub(1));

    let ups = from.len() - common;
    let rest = target[common..].join("/");
    if ups == 0 {
        format!("./{rest}")
    } else {
        format!("{}{rest}", "../".repeat(ups))
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl AsRef<str> for Specifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Specifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for Specifier {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Specifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Specifier> for String {
    fn from(value: Specifier) -> Self {
        value.0.to_string()
    }
}

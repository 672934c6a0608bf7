//! Module graph data model.
//!
//! | Module      | Purpose                                         |
//! |-------------|-------------------------------------------------|
//! | `specifier` | Canonical specifiers and build-tree paths       |
//! | `kind`      | Source language of a loaded module              |
//! | `record`    | `Module`, `Dependency`, extracted flags         |
//! | `client`    | Client copy with server exports removed         |
//! | `registry`  | Specifier -> entry map with single-flight ready |

mod client;
mod kind;
mod record;
mod registry;
mod specifier;

pub use kind::SourceKind;
pub use record::{Dependency, Module, ModuleFlags, PatchError};
pub use registry::{ModuleEntry, ModuleRegistry, Readiness, TraversalId};
pub use specifier::{BUILTIN_EXTS, Specifier, clean_path, relative_import};

//! Module compilation.
//!
//! | Module      | Purpose                                            |
//! |-------------|----------------------------------------------------|
//! | `plugin`    | Resolver, loader and transformer extension points  |
//! | `pipeline`  | `Compiler::compile`, single-flight, warm cache use |
//! | `propagate` | In-place hash token patching of dependents         |
//! | `scanner`   | Bundled regex-based `EsmScanner` transformer       |

mod error;
mod pipeline;
mod plugin;
mod propagate;
mod scanner;

#[cfg(test)]
pub(crate) mod testing;

pub use error::CompileError;
pub use pipeline::{CompileOptions, Compiler};
pub use plugin::{
    Loader, LoadedSource, Plugins, Resolution, Resolver, RouteHint, TransformInput,
    TransformOptions, TransformOutput, TransformedDep, Transformer,
};
pub use scanner::{EsmScanner, HASH_PLACEHOLDER};

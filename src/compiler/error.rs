//! Compile errors.

use thiserror::Error;

use crate::cache::CacheError;
use crate::module::{SourceKind, Specifier};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unsupported module '{specifier}' ({})", kind.label())]
    Unsupported {
        specifier: Specifier,
        kind: SourceKind,
    },

    #[error("failed to load '{specifier}': {message}")]
    Load { specifier: Specifier, message: String },

    #[error("failed to transform '{specifier}': {message}")]
    Transform { specifier: Specifier, message: String },

    /// Another traversal owned the compile and it failed.
    #[error("compilation of '{0}' failed")]
    Failed(Specifier),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl CompileError {
    pub fn specifier(&self) -> Option<&Specifier> {
        match self {
            Self::Unsupported { specifier, .. }
            | Self::Load { specifier, .. }
            | Self::Transform { specifier, .. } => Some(specifier),
            Self::Failed(specifier) => Some(specifier),
            Self::Cache(_) => None,
        }
    }
}

//! Incremental module compilation engine.
//!
//! Keeps a content-addressed graph of source modules, recompiles only what
//! changed, patches dependency hash tokens into already compiled dependents
//! instead of recompiling them, and publishes live-reload events for a
//! development session.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod freshness;
pub mod logger;
pub mod module;
pub mod reload;
pub mod route;
pub mod watch;

pub use compiler::{CompileError, CompileOptions};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, PrepareStats};
pub use reload::{RefreshPolicy, WatchEvent};

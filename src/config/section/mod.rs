//! Configuration section definitions.
//!
//! | Section   | Purpose                                         |
//! |-----------|-------------------------------------------------|
//! | `[build]` | Source/build directories, import map, flags     |
//! | `[watch]` | File watcher enable switch, debounce, excludes  |

mod build;
mod watch;

pub use build::{BuildConfig, BuildMode};
pub use watch::WatchConfig;

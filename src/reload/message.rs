//! Live-reload event protocol.
//!
//! Events are broadcast to transports and serialize to the JSON wire format
//! the client expects:
//!
//! ```json
//! {"type":"add","specifier":"/pages/about.tsx","route":{"path":"/about","module":"/pages/about.tsx"}}
//! {"type":"modify","specifier":"/components/nav.tsx","refresh":"hot_patch"}
//! {"type":"remove","specifier":"/pages/about.tsx"}
//! ```

use serde::{Deserialize, Serialize};

use crate::module::Specifier;
use crate::route::Route;

/// How a client applies a modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Swap the module in place.
    #[default]
    HotPatch,
    /// Server data changed; the page must be fetched again.
    Reload,
}

/// Event emitted by the watch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WatchEvent {
    Add {
        specifier: Specifier,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        route: Option<Route>,
    },
    Modify {
        specifier: Specifier,
        refresh: RefreshPolicy,
    },
    Remove {
        specifier: Specifier,
    },
}

impl WatchEvent {
    pub fn add(specifier: Specifier, route: Option<Route>) -> Self {
        Self::Add { specifier, route }
    }

    pub fn modify(specifier: Specifier, refresh: RefreshPolicy) -> Self {
        Self::Modify { specifier, refresh }
    }

    pub fn remove(specifier: Specifier) -> Self {
        Self::Remove { specifier }
    }

    pub fn specifier(&self) -> &Specifier {
        match self {
            Self::Add { specifier, .. }
            | Self::Modify { specifier, .. }
            | Self::Remove { specifier } => specifier,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Modify { .. } => "modify",
            Self::Remove { .. } => "remove",
        }
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"type":"{}","specifier":""}}"#, self.label())
        })
    }

    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}

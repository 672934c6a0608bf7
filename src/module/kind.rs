use serde::{Deserialize, Serialize};

/// Source language of a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Js,
    Jsx,
    Ts,
    Tsx,
    Css,
    #[default]
    Unknown,
}

impl SourceKind {
    /// Map a file extension to a kind.
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext {
            Some("js" | "mjs") => Self::Js,
            Some("jsx") => Self::Jsx,
            Some("ts") => Self::Ts,
            Some("tsx") => Self::Tsx,
            Some("css") => Self::Css,
            _ => Self::Unknown,
        }
    }

    #[inline]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Jsx => "jsx",
            Self::Ts => "ts",
            Self::Tsx => "tsx",
            Self::Css => "css",
            Self::Unknown => "unknown",
        }
    }
}

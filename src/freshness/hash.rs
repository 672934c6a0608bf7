//! Content hashing for module identity using blake3.
//!
//! Two kinds of digests flow through the module graph:
//! - source hash: digest of the raw module source as loaded
//! - composite hash: source hash folded with every dependency's hash,
//!   in declared dependency order
//!
//! Compiled output embeds the first [`TOKEN_LEN`] hex characters of a
//! dependency's hash, so a changed dependency can be patched in place.

use serde::{Deserialize, Serialize};

/// Width of the hash token embedded in compiled output.
pub const TOKEN_LEN: usize = 6;

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create a hash representing "not loaded yet" (all zeros).
    #[inline]
    pub const fn empty() -> Self {
        Self([0; 32])
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Some(Self(arr))
    }

    /// Fixed-width lowercase hex token embedded in compiled output.
    pub fn token(&self) -> [u8; TOKEN_LEN] {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = [0u8; TOKEN_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            let byte = self.0[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            *slot = HEX[nibble as usize];
        }
        out
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 16 hex chars for brevity
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        if hash.is_empty() {
            String::new()
        } else {
            hash.to_hex()
        }
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self::empty());
        }
        Self::from_hex(&value).ok_or_else(|| format!("invalid content hash `{value}`"))
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self::empty()
    }
}

/// Hash raw source bytes.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash::new(*blake3::hash(bytes).as_bytes())
}

/// Compute a module's composite hash.
///
/// `deps` holds one entry per declared dependency, in order; `None` marks a
/// dependency that could not be found and contributes nothing. A module
/// without declared dependencies hashes to its own source hash.
pub fn composite_hash<I>(source: ContentHash, deps: I) -> ContentHash
where
    I: IntoIterator<Item = Option<ContentHash>>,
{
    let mut deps = deps.into_iter().peekable();
    if deps.peek().is_none() {
        return source;
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(source.as_bytes());
    for dep in deps.flatten() {
        hasher.update(dep.as_bytes());
    }
    ContentHash::new(*hasher.finalize().as_bytes())
}

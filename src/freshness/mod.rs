//! Freshness detection: content hashes (blake3) for module sources and
//! composite dependency hashes.

mod hash;

pub use hash::{ContentHash, TOKEN_LEN, composite_hash, hash_bytes};

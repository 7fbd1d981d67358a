//! Content hashes used as cache keys.

use crate::imports::SourceSet;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 over everything a compilation reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the file ids and texts of `set` (root first, then imports in
    /// load order) together with the configuration fingerprint. Every field
    /// is length-prefixed, so moving bytes between fields changes the hash.
    pub fn compute(set: &SourceSet, fingerprint: &str) -> Self {
        let mut hasher = Sha256::new();
        field(&mut hasher, fingerprint);
        field(&mut hasher, &set.root.id);
        field(&mut hasher, &set.root.text);
        for file in &set.imports {
            field(&mut hasher, &file.id);
            field(&mut hasher, &file.text);
        }
        ContentHash(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

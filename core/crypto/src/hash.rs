//! Content hashing of logical document names.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Maps a logical document name to a stable on-disk file stem.
///
/// The mapping must be deterministic for the whole lifetime of a vault.
pub trait ContentHasher: Send + Sync {
    /// Hash `name` into a filesystem-safe string.
    fn hash_name(&self, name: &str) -> String;
}

/// Blake2b-256, lowercase hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake2Hasher;

impl ContentHasher for Blake2Hasher {
    fn hash_name(&self, name: &str) -> String {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(name.as_bytes());
        hex::encode(hasher.finalize())
    }
}

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// Runs `f` against a fresh hasher and returns the digest. Stable within one
/// process, which is all dataset versioning needs.
pub fn stable_hash_with(f: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    f(&mut hasher);
    hasher.finish()
}

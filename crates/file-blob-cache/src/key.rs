use sha2::{Digest, Sha256};

use crate::cache::CACHE_INFO_FILE;
use crate::error::{BlobCacheError, Result};

/// Derive a filesystem-safe cache key from identifying parts
///
/// The parts are joined with `:` and hashed, so the same request
/// attributes always map to the same 64-character hex key.
pub fn cache_key<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(":");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reject keys that cannot name a sibling file of the counter file
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key == CACHE_INFO_FILE
        || key.contains('/')
        || key.contains('\0');
    if bad {
        return Err(BlobCacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

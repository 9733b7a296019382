//! Error types for the blob cache

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors from blob cache operations
#[derive(Debug)]
pub enum BlobCacheError {
    /// The cache could not be set up with the given parameters
    Config(String),
    /// The key cannot name an entry file
    InvalidKey(String),
    /// `put` found an entry with the same key already in the cache
    KeyExists(String),
    /// No entry with this key is cached
    NotFound(String),
    /// The size counter file does not hold exactly one `u64`
    Corrupt(String),
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

impl BlobCacheError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True for the ordinary "nothing to do" outcomes: a missing key on
    /// read/delete or an existing key on store.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::KeyExists(_))
    }
}

impl fmt::Display for BlobCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::InvalidKey(key) => write!(f, "Invalid cache key: {key:?}"),
            Self::KeyExists(key) => write!(f, "Key already cached: {key}"),
            Self::NotFound(key) => write!(f, "Key not cached: {key}"),
            Self::Corrupt(msg) => write!(f, "Corrupt cache info: {msg}"),
            Self::Io { op, path, source } => {
                write!(f, "IO error during {op} on {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for BlobCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BlobCacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_io_error_display() {
        let err = BlobCacheError::io(
            "copy",
            "/cache/key1",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(
            format!("{}", err),
            "IO error during copy on /cache/key1: disk full"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_miss_classification() {
        assert!(BlobCacheError::NotFound("k".to_string()).is_miss());
        assert!(BlobCacheError::KeyExists("k".to_string()).is_miss());
        assert!(!BlobCacheError::Corrupt("short".to_string()).is_miss());
        assert!(!BlobCacheError::Config("no dir".to_string()).is_miss());
    }

    #[test]
    fn test_config_error_display() {
        let err = BlobCacheError::Config("missing directory".to_string());
        assert_eq!(format!("{}", err), "Configuration error: missing directory");
        assert!(err.source().is_none());
    }
}

//! Error types for the blob cache admin tool

use std::fmt;

#[derive(Debug)]
pub enum AdminError {
    Cache(file_blob_cache::BlobCacheError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl AdminError {
    /// Misses are reported with their own exit status
    pub fn is_miss(&self) -> bool {
        matches!(self, AdminError::Cache(err) if err.is_miss())
    }
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::Cache(err) => write!(f, "Cache error: {}", err),
            AdminError::Io(err) => write!(f, "IO error: {}", err),
            AdminError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AdminError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdminError::Cache(err) => Some(err),
            AdminError::Io(err) => Some(err.as_ref()),
            AdminError::Config(_) => None,
        }
    }
}

impl From<file_blob_cache::BlobCacheError> for AdminError {
    fn from(err: file_blob_cache::BlobCacheError) -> Self {
        AdminError::Cache(err)
    }
}

impl From<std::io::Error> for AdminError {
    fn from(err: std::io::Error) -> Self {
        AdminError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for AdminError {
    fn from(err: serde_json::Error) -> Self {
        AdminError::Io(Box::new(err.into()))
    }
}

impl From<tracing_subscriber::filter::ParseError> for AdminError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        AdminError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AdminError>;

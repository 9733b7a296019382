use std::env;
use std::path::PathBuf;

use crate::error::{AdminError, Result};

const DEFAULT_CACHE_DIR: &str = "./cache/blobs";

/// Blob cache settings parsed from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminConfig {
    pub cache_dir: PathBuf,
    /// 0 means unlimited
    pub max_size: u64,
    /// 0 means never purge
    pub purge_size: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            max_size: 0,
            purge_size: 0,
        }
    }
}

impl AdminConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let cache_dir = lookup("BLOB_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let max_size = parse_size(&lookup, "BLOB_CACHE_MAX_SIZE")?.unwrap_or(defaults.max_size);
        let purge_size =
            parse_size(&lookup, "BLOB_CACHE_PURGE_SIZE")?.unwrap_or(defaults.purge_size);

        Ok(Self {
            cache_dir,
            max_size,
            purge_size,
        })
    }

    /// Apply command line flags on top of the environment
    pub fn with_overrides(
        mut self,
        cache_dir: Option<PathBuf>,
        max_size: Option<u64>,
        purge_size: Option<u64>,
    ) -> Self {
        if let Some(dir) = cache_dir {
            self.cache_dir = dir;
        }
        if let Some(size) = max_size {
            self.max_size = size;
        }
        if let Some(size) = purge_size {
            self.purge_size = size;
        }
        self
    }
}

fn parse_size(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| AdminError::Config(format!("{name}={raw:?}: {e}"))),
    }
}

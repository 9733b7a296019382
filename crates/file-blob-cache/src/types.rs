//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry file as seen by a directory scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFileInfo {
    pub key: String,
    pub size: u64,
    pub accessed_at: DateTime<Utc>,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub max_size: u64,
    pub purge_size: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Outcome of an explicit purge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Keys that were removed, oldest access first
    pub removed: Vec<String>,
    /// Keys over the target that were skipped because a reader held them
    pub busy: Vec<String>,
    pub size_before: u64,
    pub size_after: u64,
}

impl PurgeReport {
    pub fn freed(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }
}

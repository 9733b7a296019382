//! Bounded in-process value cache
//!
//! Small, frequently requested objects (catalog documents, parsed metadata)
//! are kept in memory keyed by string. Once the configured item count is
//! reached, the oldest inserted keys are dropped in one batch. Reads never
//! change eviction order.

mod cache;

pub use cache::{ValueCache, ValueCacheStats};

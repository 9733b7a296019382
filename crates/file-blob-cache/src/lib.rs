//! File-based blob cache shared between processes
//!
//! Every entry is one regular file in the cache directory, named after its
//! key. A reserved `cache_info` file next to the entries holds the running
//! total of entry sizes as a native-endian `u64`. All structural operations
//! take an exclusive advisory lock on that file; readers hold a shared lock
//! on the entry they opened for as long as they keep the returned [`Item`].

mod cache;
mod error;
mod item;
mod key;
mod lock;
mod types;

pub use cache::{BlobCache, CACHE_INFO_FILE, TRANSFER_BUFFER_SIZE};
pub use error::{BlobCacheError, Result};
pub use item::Item;
pub use key::cache_key;
pub use types::{CacheFileInfo, CacheStats, PurgeReport};

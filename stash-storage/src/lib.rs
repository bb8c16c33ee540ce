//! STASH Storage - Memory Store, Disk Store and Cache Façade
//!
//! [`MemoryStorage`] and [`DiskStorage`] are usable on their own;
//! [`CacheStorage`] combines them into a read-through, write-through cache
//! that publishes change notifications.

pub mod cache;
pub mod disk;
pub mod memory;
pub mod record;
pub mod stats;

mod notify;
mod sweep;
mod sync;
mod writer;

pub use cache::{CacheStorage, SweepReport};
pub use disk::{DiskStorage, FILE_AGE_CEILING};
pub use memory::MemoryStorage;
pub use record::{decode_record, encode_record};
pub use stats::CacheStats;

// Re-export the value types callers need alongside the stores.
pub use stash_core::{
    CacheEntry, CacheKey, CacheStorageConfig, Cacheable, ChangeEvent, ChangeSet, DiskConfig,
    ExpirationPolicy, MemoryConfig, StashError, StashResult, StorageChange, StorageError,
    StorageResult,
};

//! STASH Core - Cache Value Types
//!
//! Pure data structures shared by the memory and disk stores. This crate
//! contains no I/O: expiration rules, the cache entry wrapper, the key and
//! value contracts, change notifications, errors and configuration.

pub mod change;
pub mod config;
pub mod entry;
pub mod error;
pub mod expiration;
pub mod key;
pub mod timestamp;
pub mod value;

use chrono::{DateTime, Utc};

pub use change::{ChangeEvent, ChangeSet, StorageChange};
pub use config::{CacheStorageConfig, DiskConfig, MemoryConfig};
pub use entry::CacheEntry;
pub use error::{ConfigError, StashError, StashResult, StorageError, StorageResult};
pub use expiration::ExpirationPolicy;
pub use key::CacheKey;
pub use value::Cacheable;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Seconds in one day, used by [`ExpirationPolicy::Days`].
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

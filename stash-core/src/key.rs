//! Cache key contract.
//!
//! Keys are used as-is by the memory store and turned into a single file
//! name by the disk store.

use std::fmt::Debug;
use std::hash::Hash;

use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Characters that are replaced with `_` when a key becomes a file name.
const RESERVED_CHARS: [char; 4] = ['/', ':', '?', '&'];

/// A key that can address both the memory table and the disk directory.
pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {
    /// Deterministic string form of the key. Must be stable across runs.
    fn disk_key_path(&self) -> String;

    /// Filesystem-safe file name for this key.
    ///
    /// Replaces `/`, `:`, `?` and `&` with `_`. Fails with
    /// [`StorageError::TransformFailed`] when the result cannot name a file
    /// in the cache directory.
    fn file_name(&self) -> StorageResult<String> {
        let raw = self.disk_key_path();
        let sanitized: String = raw
            .chars()
            .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
            .collect();

        if sanitized.is_empty() || sanitized == "." || sanitized == ".." || sanitized.contains('\0') {
            return Err(StorageError::TransformFailed { key: raw });
        }
        Ok(sanitized)
    }
}

impl CacheKey for String {
    fn disk_key_path(&self) -> String {
        self.clone()
    }
}

impl CacheKey for &'static str {
    fn disk_key_path(&self) -> String {
        (*self).to_string()
    }
}

impl CacheKey for u64 {
    fn disk_key_path(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for i64 {
    fn disk_key_path(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for Uuid {
    fn disk_key_path(&self) -> String {
        self.as_hyphenated().to_string()
    }
}

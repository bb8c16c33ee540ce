//! Cache entry wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::expiration::ExpirationPolicy;

/// A cached value together with its expiration policy and creation time.
///
/// Entries are immutable; an update replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    value: V,
    expiration: ExpirationPolicy,
    #[serde(with = "crate::timestamp")]
    created_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    /// Create an entry stamped with the current time.
    pub fn new(value: V, expiration: ExpirationPolicy) -> Self {
        Self::with_created_at(value, expiration, Utc::now())
    }

    /// Create an entry with an explicit creation time.
    pub fn with_created_at(value: V, expiration: ExpirationPolicy, created_at: DateTime<Utc>) -> Self {
        Self {
            value,
            expiration,
            created_at,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn expiration(&self) -> &ExpirationPolicy {
        &self.expiration
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the entry is stale right now.
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Whether the entry is stale at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_stale(self.created_at, now)
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

//! On-disk record format.
//!
//! One JSON document per file:
//!
//! ```json
//! {
//!   "value": <value>,
//!   "expiration": {"type": "seconds", "value": 300.0},
//!   "created_at": "2024-11-27T09:30:00.000000Z"
//! }
//! ```
//!
//! Decoding runs in two stages so failures can be told apart: bytes that
//! are not JSON, an envelope with bad attributes, and a value of the wrong
//! shape each map to their own [`StorageError`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::error::Category;
use stash_core::{CacheEntry, Cacheable, ExpirationPolicy, StorageError, StorageResult};

/// Envelope with the value left undecoded.
#[derive(Deserialize)]
struct RawRecord {
    value: serde_json::Value,
    expiration: ExpirationPolicy,
    #[serde(with = "stash_core::timestamp")]
    created_at: DateTime<Utc>,
}

pub fn encode_record<V: Cacheable>(entry: &CacheEntry<V>) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(entry).map_err(|e| StorageError::EncodingFailed {
        reason: e.to_string(),
    })
}

pub fn decode_record<V: Cacheable>(bytes: &[u8]) -> StorageResult<CacheEntry<V>> {
    let raw: RawRecord = serde_json::from_slice(bytes).map_err(|e| match e.classify() {
        Category::Data => StorageError::MalformedAttributes {
            reason: e.to_string(),
        },
        Category::Io | Category::Syntax | Category::Eof => StorageError::DecodingFailed {
            reason: e.to_string(),
        },
    })?;

    let value = V::deserialize(raw.value).map_err(|e| StorageError::TypeMismatch {
        reason: e.to_string(),
    })?;

    Ok(CacheEntry::with_created_at(value, raw.expiration, raw.created_at))
}

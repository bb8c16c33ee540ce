//! STASH Test Utilities
//!
//! Shared test infrastructure for the stash workspace:
//! - Proptest generators for keys, values and expiration policies
//! - Fixtures for store configurations backed by temporary directories
//! - Assertions for storage results and cache files
//! - One-shot tracing setup for test binaries

pub use stash_core::{
    CacheEntry, CacheKey, Cacheable, ConfigError, DiskConfig, ExpirationPolicy, MemoryConfig,
    StashError, StashResult, StorageError, StorageResult, Timestamp,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// SAMPLE VALUE TYPE
// ============================================================================

/// Structured value used to exercise the stores with something richer
/// than a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub title: String,
    pub tags: Vec<String>,
}

impl Cacheable for Record {
    fn cost(&self) -> u32 {
        let bytes = self.title.len() + self.tags.iter().map(String::len).sum::<usize>();
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for stash value types.

    use super::*;
    use chrono::{SubsecRound, TimeDelta};
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Current time truncated so it survives the on-disk timestamp format.
    fn whole_seconds_now() -> Timestamp {
        Utc::now().trunc_subsecs(0)
    }

    /// Generate any ExpirationPolicy variant.
    pub fn arb_expiration_policy() -> impl Strategy<Value = ExpirationPolicy> {
        prop_oneof![
            Just(ExpirationPolicy::Never),
            Just(ExpirationPolicy::AlreadyExpired),
            (-10.0f64..100_000.0).prop_map(ExpirationPolicy::Seconds),
            (-10i64..3650).prop_map(ExpirationPolicy::Days),
            arb_timestamp().prop_map(ExpirationPolicy::AbsoluteDate),
        ]
    }

    /// Generate a policy that stays fresh for at least an hour from now.
    pub fn arb_fresh_policy() -> impl Strategy<Value = ExpirationPolicy> {
        prop_oneof![
            Just(ExpirationPolicy::Never),
            (3600.0f64..86_400.0).prop_map(ExpirationPolicy::Seconds),
            (1i64..365).prop_map(ExpirationPolicy::Days),
            (3600i64..31_536_000)
                .prop_map(|secs| ExpirationPolicy::AbsoluteDate(whole_seconds_now() + TimeDelta::seconds(secs))),
        ]
    }

    /// Generate a policy that a save must reject as already expired.
    pub fn arb_expired_policy() -> impl Strategy<Value = ExpirationPolicy> {
        prop_oneof![
            Just(ExpirationPolicy::AlreadyExpired),
            (-100_000.0f64..=0.0).prop_map(ExpirationPolicy::Seconds),
            (-3650i64..=0).prop_map(ExpirationPolicy::Days),
            (60i64..31_536_000)
                .prop_map(|secs| ExpirationPolicy::AbsoluteDate(whole_seconds_now() - TimeDelta::seconds(secs))),
        ]
    }

    /// Generate a key that maps to a usable file name, including the
    /// characters that are rewritten on disk.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_./:?&=-]{1,48}".prop_filter("names . and .. are reserved", |key| {
            key != "." && key != ".."
        })
    }

    /// Generate between 1 and `max` keys with distinct file names.
    pub fn arb_distinct_keys(max: usize) -> impl Strategy<Value = Vec<String>> {
        prop::collection::hash_set("[a-z0-9]{1,16}", 1..=max.max(1))
            .prop_map(|keys| keys.into_iter().collect())
    }

    /// Generate a Record.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        (
            arb_uuid(),
            "[a-zA-Z0-9 ]{0,64}",
            prop::collection::vec("[a-z]{1,12}", 0..5),
        )
            .prop_map(|(id, title, tags)| Record { id, title, tags })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and values for common scenarios.

    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Create an empty temporary cache directory.
    pub fn temp_cache_dir() -> TempDir {
        match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("Failed to create temp cache dir: {}", e),
        }
    }

    /// Memory config with no limits, no background sweep and entries that
    /// never expire by default.
    pub fn unbounded_memory_config() -> MemoryConfig {
        MemoryConfig::default()
            .with_clean_interval(Duration::ZERO)
            .with_expiration(ExpirationPolicy::Never)
    }

    /// Memory config holding at most `count` entries.
    pub fn count_limited_memory_config(count: u64) -> MemoryConfig {
        unbounded_memory_config().with_count_limit(count)
    }

    /// Disk config rooted at `dir` with the background sweep disabled.
    pub fn temp_disk_config(dir: &Path) -> DiskConfig {
        DiskConfig::new(dir).with_clean_interval(Duration::ZERO)
    }

    /// A small Record.
    pub fn sample_record() -> Record {
        Record {
            id: Uuid::now_v7(),
            title: "Quarterly report".to_string(),
            tags: vec!["finance".to_string(), "q3".to_string()],
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for stash results and on-disk state.

    use super::*;
    use std::path::Path;

    /// Assert that a StorageResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &StorageResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a StorageResult is the Expired error.
    #[track_caller]
    pub fn assert_expired<T: std::fmt::Debug>(result: &StorageResult<T>) {
        match result {
            Err(StorageError::Expired) => {}
            other => panic!("Expected Expired error, got: {:?}", other),
        }
    }

    /// Assert that a StashResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert whether the cache file for `key` exists in `dir`.
    #[track_caller]
    pub fn assert_cache_file<K: CacheKey>(dir: &Path, key: &K, exists: bool) {
        let name = match key.file_name() {
            Ok(name) => name,
            Err(e) => panic!("Key {:?} has no file name: {}", key, e),
        };
        let path = dir.join(name);
        assert_eq!(
            path.is_file(),
            exists,
            "Expected cache file {} to {}",
            path.display(),
            if exists { "exist" } else { "be absent" }
        );
    }
}

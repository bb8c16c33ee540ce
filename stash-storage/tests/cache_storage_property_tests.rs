//! Property-Based Tests for the Two-Tier Cache
//!
//! **Property 1: Memory Visibility** - a save is readable before its disk
//! write completes.
//!
//! **Property 2: Disk Round-Trip** - once the disk write completes, the
//! key's file decodes back to the saved value.
//!
//! **Property 3: Expired Saves** - a save with an already expired policy
//! leaves both stores untouched.
//!
//! **Property 4: Clear** - after `remove_all`, no previously saved key is
//! cached, whether or not the saves' disk writes were awaited.
//!
//! **Property 5: Promotion** - a disk-only value is returned by `retrieve`
//! and is then present in memory.
//!
//! **Property 6: Sweep Idempotence** - a second sweep with no intervening
//! writes removes nothing.

use std::time::Duration;

use proptest::prelude::*;
use stash_storage::{decode_record, CacheEntry, CacheKey, CacheStorage, ExpirationPolicy, StorageError, StorageResult};
use stash_test_utils::fixtures::{temp_cache_dir, temp_disk_config, unbounded_memory_config};
use stash_test_utils::generators::{
    arb_distinct_keys, arb_expired_policy, arb_fresh_policy, arb_key, arb_record,
};
use stash_test_utils::Record;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn check<T>(result: StorageResult<T>) -> Result<T, TestCaseError> {
    result.map_err(|e| TestCaseError::fail(format!("Storage error: {}", e)))
}

fn test_cache(dir: &tempfile::TempDir) -> Result<CacheStorage<String, Record>, TestCaseError> {
    check(CacheStorage::new(
        unbounded_memory_config(),
        temp_disk_config(dir.path()),
    ))
}

async fn disk_write(handle: tokio::task::JoinHandle<StorageResult<()>>) -> Result<(), TestCaseError> {
    let result = handle
        .await
        .map_err(|e| TestCaseError::fail(format!("Disk task failed: {}", e)))?;
    check(result)
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 1: Memory Visibility**
    #[test]
    fn prop_save_then_retrieve(
        key in arb_key(),
        record in arb_record(),
        policy in arb_fresh_policy(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let dir = temp_cache_dir();
            let cache = test_cache(&dir)?;

            let handle = cache.save(key.clone(), record.clone(), Some(policy));
            prop_assert_eq!(cache.memory().retrieve(&key), Some(record.clone()));
            prop_assert_eq!(check(cache.retrieve(&key).await)?, Some(record));

            disk_write(handle).await?;
            Ok(())
        })?;
    }

    /// **Property 2: Disk Round-Trip**
    #[test]
    fn prop_disk_round_trip(
        key in arb_key(),
        record in arb_record(),
        policy in arb_fresh_policy(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let dir = temp_cache_dir();
            let cache = test_cache(&dir)?;

            disk_write(cache.save(key.clone(), record.clone(), Some(policy.clone()))).await?;

            let path = dir.path().join(check(key.file_name())?);
            let bytes = std::fs::read(&path)
                .map_err(|e| TestCaseError::fail(format!("Cache file missing: {}", e)))?;
            let entry: CacheEntry<Record> = check(decode_record(&bytes))?;
            prop_assert_eq!(entry.value(), &record);
            prop_assert_eq!(entry.expiration(), &policy);

            prop_assert_eq!(check(cache.disk().retrieve(&key))?, Some(record));
            Ok(())
        })?;
    }

    /// **Property 3: Expired Saves**
    #[test]
    fn prop_expired_save_is_noop(
        key in arb_key(),
        record in arb_record(),
        policy in arb_expired_policy(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let dir = temp_cache_dir();
            let cache = test_cache(&dir)?;

            let result = cache
                .save(key.clone(), record, Some(policy))
                .await
                .map_err(|e| TestCaseError::fail(format!("Disk task failed: {}", e)))?;
            prop_assert_eq!(result, Err(StorageError::Expired));

            prop_assert_eq!(check(cache.retrieve(&key).await)?, None);
            prop_assert_eq!(check(cache.disk().file_count())?, 0);
            Ok(())
        })?;
    }

    /// **Property 4: Clear**
    #[test]
    fn prop_remove_all_clears_every_key(
        keys in arb_distinct_keys(8),
        record in arb_record(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let dir = temp_cache_dir();
            let cache = test_cache(&dir)?;

            for key in &keys {
                disk_write(cache.save(key.clone(), record.clone(), None)).await?;
            }
            check(cache.remove_all().await)?;

            for key in &keys {
                prop_assert!(!cache.is_cached(key).await, "{} still cached", key);
            }
            Ok(())
        })?;
    }

    /// **Property 4: Clear** with disk writes still in flight
    #[test]
    fn prop_remove_all_clears_unawaited_saves(
        keys in arb_distinct_keys(16),
        record in arb_record(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let dir = temp_cache_dir();
            let cache = test_cache(&dir)?;

            let entries = keys.iter().map(|key| (key.clone(), record.clone()));
            drop(cache.save_batch(entries, None));
            check(cache.remove_all().await)?;

            for key in &keys {
                prop_assert!(!cache.is_cached(key).await, "{} still cached", key);
            }
            prop_assert_eq!(check(cache.disk().file_count())?, 0);
            Ok(())
        })?;
    }

    /// A remove issued right after a save wins over its pending disk write.
    #[test]
    fn prop_remove_follows_unawaited_save(
        key in arb_key(),
        record in arb_record(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let dir = temp_cache_dir();
            let cache = test_cache(&dir)?;

            drop(cache.save(key.clone(), record, None));
            check(cache.remove(&key).await)?;

            prop_assert!(!cache.is_cached(&key).await);
            prop_assert_eq!(check(cache.disk().file_count())?, 0);
            Ok(())
        })?;
    }

    /// **Property 5: Promotion**
    #[test]
    fn prop_disk_hit_is_promoted(
        key in arb_key(),
        record in arb_record(),
        policy in arb_fresh_policy(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let dir = temp_cache_dir();
            let cache = test_cache(&dir)?;

            check(cache.disk().save(&key, record.clone(), Some(policy)))?;
            prop_assert!(!cache.memory().is_cached(&key));

            prop_assert_eq!(check(cache.retrieve(&key).await)?, Some(record.clone()));
            prop_assert_eq!(cache.memory().retrieve(&key), Some(record));
            Ok(())
        })?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// **Property 6: Sweep Idempotence**
    #[test]
    fn prop_sweep_is_idempotent(
        keys in arb_distinct_keys(6),
        short_lived in prop::collection::vec(any::<bool>(), 6),
        record in arb_record(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let dir = temp_cache_dir();
            let cache = test_cache(&dir)?;

            for (key, short) in keys.iter().zip(short_lived.iter()) {
                let policy = if *short {
                    ExpirationPolicy::Seconds(0.01)
                } else {
                    ExpirationPolicy::Days(1)
                };
                disk_write(cache.save(key.clone(), record.clone(), Some(policy))).await?;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;

            let first = check(cache.remove_expired().await)?;
            let expected = keys.iter().zip(short_lived.iter()).filter(|(_, short)| **short).count();
            prop_assert_eq!(first.disk_removed, expected);
            prop_assert_eq!(first.memory_removed, expected);

            let second = check(cache.remove_expired().await)?;
            prop_assert_eq!(second.total(), 0);
            Ok(())
        })?;
    }
}

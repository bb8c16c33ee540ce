//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Memory store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Upper bound on the summed [`Cacheable::cost`] of live entries.
    /// Zero means no cost limit.
    pub total_cost_limit: u64,
    /// Upper bound on the number of live entries. `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_limit: Option<u64>,
    /// Period of the background sweep. Zero disables the sweep.
    #[serde(rename = "clean_interval_secs", with = "duration_secs")]
    pub clean_interval: Duration,
    /// Policy applied when a save does not name one.
    pub expiration: ExpirationPolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            total_cost_limit: 0,
            count_limit: None,
            clean_interval: Duration::from_secs(180),
            expiration: ExpirationPolicy::Seconds(300.0),
        }
    }
}

impl MemoryConfig {
    /// Defaults with the given total cost limit.
    pub fn new(total_cost_limit: u64) -> Self {
        Self {
            total_cost_limit,
            ..Self::default()
        }
    }

    pub fn with_count_limit(mut self, count_limit: u64) -> Self {
        self.count_limit = Some(count_limit);
        self
    }

    pub fn with_clean_interval(mut self, clean_interval: Duration) -> Self {
        self.clean_interval = clean_interval;
        self
    }

    pub fn with_expiration(mut self, expiration: ExpirationPolicy) -> Self {
        self.expiration = expiration;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - count_limit, when set, is greater than 0
    /// - the default expiration is not already expired
    pub fn validate(&self) -> StashResult<()> {
        if self.count_limit == Some(0) {
            return Err(StashError::Config(ConfigError::InvalidValue {
                field: "memory.count_limit".to_string(),
                value: "0".to_string(),
                reason: "count_limit must be greater than 0".to_string(),
            }));
        }

        validate_expiration("memory.expiration", &self.expiration)
    }
}

// ============================================================================
// DISK STORE
// ============================================================================

/// Disk store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Directory holding one file per cached key.
    pub directory: PathBuf,
    /// Period of the background sweep. Zero disables the sweep.
    #[serde(rename = "clean_interval_secs", with = "duration_secs")]
    pub clean_interval: Duration,
    /// Policy applied when a save does not name one.
    pub expiration: ExpirationPolicy,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("stash").join("DiskCache"),
            clean_interval: Duration::from_secs(300),
            expiration: ExpirationPolicy::Days(7),
        }
    }
}

impl DiskConfig {
    /// Defaults rooted at the given directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn with_clean_interval(mut self, clean_interval: Duration) -> Self {
        self.clean_interval = clean_interval;
        self
    }

    pub fn with_expiration(mut self, expiration: ExpirationPolicy) -> Self {
        self.expiration = expiration;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - directory is not empty
    /// - the default expiration is not already expired
    pub fn validate(&self) -> StashResult<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(StashError::Config(ConfigError::MissingRequired {
                field: "disk.directory".to_string(),
            }));
        }

        validate_expiration("disk.expiration", &self.expiration)
    }
}

// ============================================================================
// CACHE FACADE
// ============================================================================

/// Configuration for a complete two-tier cache.
///
/// ```toml
/// notification_capacity = 512
///
/// [memory]
/// count_limit = 1000
/// clean_interval_secs = 60
/// expiration = { type = "seconds", value = 120.0 }
///
/// [disk]
/// directory = "/var/cache/app"
/// expiration = { type = "days", value = 3 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStorageConfig {
    pub memory: MemoryConfig,
    pub disk: DiskConfig,
    /// Number of change events buffered per subscriber before it lags.
    pub notification_capacity: usize,
}

impl Default for CacheStorageConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
            notification_capacity: 256,
        }
    }
}

impl CacheStorageConfig {
    pub fn new(memory: MemoryConfig, disk: DiskConfig) -> Self {
        Self {
            memory,
            disk,
            ..Self::default()
        }
    }

    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> StashResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StashResult<()> {
        self.memory.validate()?;
        self.disk.validate()?;

        if self.notification_capacity == 0 {
            return Err(StashError::Config(ConfigError::InvalidValue {
                field: "notification_capacity".to_string(),
                value: "0".to_string(),
                reason: "notification_capacity must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

fn validate_expiration(field: &str, expiration: &ExpirationPolicy) -> StashResult<()> {
    if expiration.is_already_expired(chrono::Utc::now()) {
        return Err(StashError::Config(ConfigError::InvalidValue {
            field: field.to_string(),
            value: format!("{:?}", expiration),
            reason: "default expiration must not already be expired".to_string(),
        }));
    }
    Ok(())
}

/// Durations written as fractional seconds.
mod duration_secs {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let memory = MemoryConfig::default();
        assert_eq!(memory.total_cost_limit, 0);
        assert_eq!(memory.count_limit, None);
        assert_eq!(memory.clean_interval, Duration::from_secs(180));
        assert_eq!(memory.expiration, ExpirationPolicy::Seconds(300.0));

        let disk = DiskConfig::default();
        assert_eq!(disk.clean_interval, Duration::from_secs(300));
        assert_eq!(disk.expiration, ExpirationPolicy::Days(7));
        assert!(disk.directory.ends_with("stash/DiskCache"));

        assert!(CacheStorageConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_count_limit_rejected() {
        let err = MemoryConfig::default().with_count_limit(0).validate().unwrap_err();
        match err {
            StashError::Config(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "memory.count_limit");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_expired_default_rejected() {
        let memory = MemoryConfig::default().with_expiration(ExpirationPolicy::AlreadyExpired);
        assert!(memory.validate().is_err());

        let disk = DiskConfig::default().with_expiration(ExpirationPolicy::Days(0));
        assert!(disk.validate().is_err());
    }

    #[test]
    fn test_empty_directory_rejected() {
        let err = DiskConfig::new("").validate().unwrap_err();
        assert!(matches!(
            err,
            StashError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_zero_notification_capacity_rejected() {
        let config = CacheStorageConfig::default().with_notification_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let raw = r#"
            notification_capacity = 512

            [memory]
            count_limit = 1000
            clean_interval_secs = 60
            expiration = { type = "seconds", value = 120.0 }

            [disk]
            directory = "/var/cache/app"
            clean_interval_secs = 0.5
            expiration = { type = "days", value = 3 }
        "#;

        let config = CacheStorageConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.notification_capacity, 512);
        assert_eq!(config.memory.count_limit, Some(1000));
        assert_eq!(config.memory.total_cost_limit, 0);
        assert_eq!(config.memory.clean_interval, Duration::from_secs(60));
        assert_eq!(config.memory.expiration, ExpirationPolicy::Seconds(120.0));
        assert_eq!(config.disk.directory, PathBuf::from("/var/cache/app"));
        assert_eq!(config.disk.clean_interval, Duration::from_millis(500));
        assert_eq!(config.disk.expiration, ExpirationPolicy::Days(3));
    }

    #[test]
    fn test_from_toml_str_partial_uses_defaults() {
        let config = CacheStorageConfig::from_toml_str("[memory]\ntotal_cost_limit = 4096\n").unwrap();
        assert_eq!(config.memory.total_cost_limit, 4096);
        assert_eq!(config.disk, DiskConfig::default());
        assert_eq!(config.notification_capacity, 256);
    }

    #[test]
    fn test_from_toml_str_errors() {
        let err = CacheStorageConfig::from_toml_str("memory = 3").unwrap_err();
        assert!(matches!(err, StashError::Config(ConfigError::Parse { .. })));

        let err = CacheStorageConfig::from_toml_str("[memory]\nclean_interval_secs = -1\n").unwrap_err();
        assert!(matches!(err, StashError::Config(ConfigError::Parse { .. })));

        let err = CacheStorageConfig::from_toml_str("[memory]\ncount_limit = 0\n").unwrap_err();
        assert!(matches!(
            err,
            StashError::Config(ConfigError::InvalidValue { .. })
        ));
    }
}

//! Error types for STASH operations

use thiserror::Error;

/// Storage layer errors.
///
/// The memory store never surfaces these; the disk store reports every
/// failure through one of them, and the façade forwards them to callers and
/// onto the change stream. Variants carry strings rather than source errors
/// so a value can be cloned to every subscriber.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Cache file could not be read at {path}: {reason}")]
    NotFound { path: String, reason: String },

    #[error("Cached value does not match the requested type: {reason}")]
    TypeMismatch { reason: String },

    #[error("Cache record attributes are malformed: {reason}")]
    MalformedAttributes { reason: String },

    #[error("Decoding failed: {reason}")]
    DecodingFailed { reason: String },

    #[error("Encoding failed: {reason}")]
    EncodingFailed { reason: String },

    #[error("Storage was deallocated before the operation completed")]
    Deallocated,

    #[error("Key {key} cannot be transformed into a file name")]
    TransformFailed { key: String },

    #[error("Disk write failed at {path}: {reason}")]
    DiskWriteFailure { path: String, reason: String },

    #[error("Disk remove failed at {path}: {reason}")]
    DiskRemoveFailure { path: String, reason: String },

    #[error("Expiration policy is already expired")]
    Expired,

    #[error("Unknown storage error: {reason}")]
    Unknown { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration could not be parsed: {reason}")]
    Parse { reason: String },
}

/// Master error type for all STASH errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StashError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for STASH operations that may also fail on configuration.
pub type StashResult<T> = Result<T, StashError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_disk_write_failure() {
        let err = StorageError::DiskWriteFailure {
            path: "/tmp/stash/user_1".to_string(),
            reason: "No space left on device".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Disk write failed"));
        assert!(msg.contains("/tmp/stash/user_1"));
        assert!(msg.contains("No space left"));
    }

    #[test]
    fn test_storage_error_display_transform_failed() {
        let err = StorageError::TransformFailed {
            key: "..".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains(".."));
        assert!(msg.contains("file name"));
    }

    #[test]
    fn test_storage_error_display_expired() {
        let msg = format!("{}", StorageError::Expired);
        assert!(msg.contains("already expired"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "memory.count_limit".to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("memory.count_limit"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_stash_error_from_variants() {
        let storage = StashError::from(StorageError::Deallocated);
        assert!(matches!(storage, StashError::Storage(StorageError::Deallocated)));

        let config = StashError::from(ConfigError::MissingRequired {
            field: "disk.directory".to_string(),
        });
        assert!(matches!(config, StashError::Config(_)));
    }
}

//! Change notifications published by the cache façade.

use crate::error::StorageError;

/// What happened to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageChange<K> {
    Save { key: K },
    Remove { key: K },
    RemoveAll,
}

impl<K> StorageChange<K> {
    /// The affected key, if the change concerns a single key.
    pub fn key(&self) -> Option<&K> {
        match self {
            Self::Save { key } | Self::Remove { key } => Some(key),
            Self::RemoveAll => None,
        }
    }
}

/// A change paired with the value it affected.
///
/// `value` is the saved value for `Save`, the previous value (if any) for
/// `Remove`, and `None` for `RemoveAll`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<K, V> {
    pub change: StorageChange<K>,
    pub value: Option<V>,
}

impl<K, V> ChangeSet<K, V> {
    pub fn new(change: StorageChange<K>, value: Option<V>) -> Self {
        Self { change, value }
    }
}

/// One item on the notification stream.
pub type ChangeEvent<K, V> = Result<ChangeSet<K, V>, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_key() {
        let save: StorageChange<String> = StorageChange::Save { key: "a".into() };
        assert_eq!(save.key().map(String::as_str), Some("a"));
        assert_eq!(StorageChange::<String>::RemoveAll.key(), None);
    }

    #[test]
    fn test_event_carries_error() {
        let event: ChangeEvent<String, String> = Err(StorageError::Expired);
        assert_eq!(event, Err(StorageError::Expired));
    }
}

//! Cache value contract.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value that can be held in memory and written to disk.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Cost charged against the memory store's total cost limit.
    fn cost(&self) -> u32 {
        1
    }
}

impl Cacheable for String {
    fn cost(&self) -> u32 {
        u32::try_from(self.len()).unwrap_or(u32::MAX)
    }
}

impl Cacheable for Vec<u8> {
    fn cost(&self) -> u32 {
        u32::try_from(self.len()).unwrap_or(u32::MAX)
    }
}

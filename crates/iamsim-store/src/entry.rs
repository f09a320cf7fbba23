//! Stored entries and versioned reads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One key's record inside the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Value,
    /// Store-wide sequence number of the write that produced this value.
    pub version: u64,
}

/// A decoded value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

//! Device-scoped key-value persistence.
//!
//! The browser build backs this with local storage; headless builds and tests
//! use [`MemoryKeyValueStore`]. The contract is deliberately infallible: a
//! backend that cannot read or write behaves as if the key were absent, and
//! callers degrade accordingly (a fresh anonymous session id, no watermark).

use std::collections::HashMap;
use std::sync::Mutex;

/// Key under which the anonymous session identifier is persisted.
pub const SESSION_ID_KEY: &str = "verificationSessionId";

/// Key under which the last-viewed watermark is persisted (RFC 3339).
pub const LAST_VIEWED_KEY: &str = "paymentsLastViewedAt";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory store. One instance per logical device.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.entries.lock() {
            Ok(entries) => entries.get(key).cloned(),
            Err(_) => None,
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

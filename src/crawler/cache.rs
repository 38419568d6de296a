//! Response caching for the fetcher
//!
//! The fetcher only talks to the [`Cache`] trait, so the storage policy can
//! change without touching its retry and rate-limit control flow.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;

/// A keyed store of response bodies
pub trait Cache: Send + Sync {
    /// Returns the body cached under `key`, if any
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Stores `body` under `key`
    fn put(&self, key: String, body: Bytes);
}

/// Unbounded in-memory cache keyed by exact URL
///
/// Entries live for the lifetime of the process and are never evicted.
/// Reads take a shared lock, so concurrent workers only serialise on writes.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached responses
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Bytes> {
        match self.entries.read() {
            Ok(entries) => entries.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn put(&self, key: String, body: Bytes) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key, body);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, body);
            }
        }
    }
}

//! Keyed payload cache.
//!
//! The cache is consulted before any fetch is scheduled and written only by
//! cache-store tasks. Reads never block on the network.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::types::ResourceKey;

/// Mapping from resource key to fetched payload.
///
/// Implementations must be safe to share between worker contexts. A bounded
/// implementation may evict, but must never return a payload for `key` other
/// than one that was stored for `key`.
pub trait Cache: Send + Sync + 'static {
    /// Look up a payload. No side effects.
    fn lookup(&self, key: &ResourceKey) -> Option<Bytes>;

    /// Store a payload. Storing the same key twice overwrites.
    fn store(&self, key: ResourceKey, payload: Bytes);

    /// Number of cached entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded in-memory cache, kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<ResourceKey, Bytes>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a single entry, returning it.
    pub fn remove(&self, key: &ResourceKey) -> Option<Bytes> {
        self.entries.write().remove(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Cache for MemoryCache {
    fn lookup(&self, key: &ResourceKey) -> Option<Bytes> {
        self.entries.read().get(key).cloned()
    }

    fn store(&self, key: ResourceKey, payload: Bytes) {
        self.entries.write().insert(key, payload);
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

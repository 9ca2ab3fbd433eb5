//! Configuration structures for Aion stores.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options controlling how a store is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Maintain the bitemporal index set (SPOT/POST/OSPT/TSPO) instead of
    /// the plain triple set (SPO/POS/OSP).
    pub temporal: bool,
    /// Prefix every key with a graph atom, enabling per-graph range scans.
    /// When false the default graph is implied and omitted from keys.
    pub named_graphs: bool,
    /// Page cache configuration.
    pub cache: CacheConfig,
    /// How long a writer waits on the single-writer lock before the
    /// operation fails with `Busy`.
    pub writer_lock_timeout_ms: u64,
    /// Flush data pages and metadata after every committed write batch.
    /// Disabling trades durability for bulk-load speed.
    pub fsync_enabled: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            temporal: true,
            named_graphs: true,
            cache: CacheConfig::default(),
            writer_lock_timeout_ms: 5_000,
            fsync_enabled: true,
        }
    }
}

impl StoreOptions {
    /// Options for a plain (non-temporal) triple store.
    pub fn triple_store() -> Self {
        Self {
            temporal: false,
            ..Default::default()
        }
    }

    /// The writer lock timeout as a Duration.
    pub fn writer_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.writer_lock_timeout_ms)
    }
}

/// Configuration for the page cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of page frames in the cache. Capacity is bounded by count,
    /// not bytes, because pages are fixed-size.
    pub num_frames: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

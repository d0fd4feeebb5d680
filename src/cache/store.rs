//! Process-wide bitmap cache shared by every loaded document.

use std::sync::RwLock;

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use crate::domain::{bitmap::Bitmap, types::RenderKey};

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "mathmark_cache_hit_total";
const METRIC_MISS: &str = "mathmark_cache_miss_total";
const METRIC_EVICT: &str = "mathmark_cache_evict_total";

struct Entries {
    lru: LruCache<RenderKey, (Bitmap, usize)>,
    bytes: usize,
}

/// Bounded LRU store of rendered bitmaps.
///
/// Both the item count and the aggregate cost are enforced on insertion by
/// dropping least recently used entries. A miss only ever means "not rendered
/// yet"; failures live in the owning document's error table.
pub struct RenderCache {
    entries: RwLock<Entries>,
    max_bytes: usize,
}

impl RenderCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(Entries {
                lru: LruCache::new(config.max_items_non_zero()),
                bytes: 0,
            }),
            max_bytes: config.max_bytes_non_zero().get(),
        }
    }

    pub fn get(&self, key: &RenderKey) -> Option<Bitmap> {
        let found = rw_write(&self.entries, SOURCE, "get")
            .lru
            .get(key)
            .map(|(bitmap, _)| bitmap.clone());
        match found {
            Some(_) => counter!(METRIC_HIT).increment(1),
            None => counter!(METRIC_MISS).increment(1),
        }
        found
    }

    /// Insert `bitmap` under `key` with the given cost, returning the keys
    /// evicted to make room.
    ///
    /// An entry costlier than the whole byte budget is still kept, alone, so
    /// a finished render is always observable at least once.
    pub fn put(&self, key: RenderKey, bitmap: Bitmap, cost: usize) -> Vec<RenderKey> {
        let mut guard = rw_write(&self.entries, SOURCE, "put");
        let entries = &mut *guard;
        let mut evicted = Vec::new();

        if let Some((previous_key, (_, previous_cost))) =
            entries.lru.push(key.clone(), (bitmap, cost))
        {
            entries.bytes = entries.bytes.saturating_sub(previous_cost);
            if previous_key != key {
                evicted.push(previous_key);
            }
        }
        entries.bytes = entries.bytes.saturating_add(cost);

        while entries.bytes > self.max_bytes && entries.lru.len() > 1 {
            match entries.lru.pop_lru() {
                Some((old_key, (_, old_cost))) => {
                    entries.bytes = entries.bytes.saturating_sub(old_cost);
                    evicted.push(old_key);
                }
                None => break,
            }
        }
        drop(guard);

        if !evicted.is_empty() {
            counter!(METRIC_EVICT).increment(evicted.len() as u64);
            debug!(
                target = "cache::store",
                op = "put",
                evicted = evicted.len(),
                "Evicted cached bitmaps"
            );
        }
        evicted
    }

    /// Insert using the bitmap's own pixel-buffer size as its cost.
    pub fn insert(&self, key: RenderKey, bitmap: Bitmap) -> Vec<RenderKey> {
        let cost = bitmap.byte_cost();
        self.put(key, bitmap, cost)
    }

    pub fn contains(&self, key: &RenderKey) -> bool {
        rw_read(&self.entries, SOURCE, "contains").lru.contains(key)
    }

    pub fn remove(&self, key: &RenderKey) -> Option<Bitmap> {
        let mut entries = rw_write(&self.entries, SOURCE, "remove");
        let (bitmap, cost) = entries.lru.pop(key)?;
        entries.bytes = entries.bytes.saturating_sub(cost);
        Some(bitmap)
    }

    /// Byte budget enforced on insertion.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Get the number of cached bitmaps.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate cost of everything currently cached.
    pub fn total_bytes(&self) -> usize {
        rw_read(&self.entries, SOURCE, "total_bytes").bytes
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

//! Render cache configuration.

use std::num::NonZeroUsize;

use serde::Deserialize;

pub const DEFAULT_MAX_ITEMS: usize = 200;
pub const DEFAULT_MAX_BYTES: usize = 100 * 1024 * 1024;

/// Bounds of the shared render cache, from the `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached bitmaps.
    pub max_items: usize,
    /// Maximum aggregate pixel-buffer size in bytes.
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_items: settings.max_items.get(),
            max_bytes: settings.max_bytes.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the item bound as NonZeroUsize, clamping to 1 if zero.
    pub fn max_items_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_items).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the byte bound, clamping to 1 if zero.
    pub fn max_bytes_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_bytes).unwrap_or(NonZeroUsize::MIN)
    }
}

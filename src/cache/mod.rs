//! Shared render cache.
//!
//! One [`RenderCache`] is created per process and passed explicitly to every
//! document engine. Bounds come from the `[cache]` section:
//!
//! ```toml
//! [cache]
//! max_items = 200
//! max_bytes = 104857600
//! ```

mod config;
pub(crate) mod lock;
mod store;

pub use config::{CacheConfig, DEFAULT_MAX_BYTES, DEFAULT_MAX_ITEMS};
pub use store::RenderCache;

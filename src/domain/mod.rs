//! Domain layer types and invariants.

pub mod bitmap;
pub mod entries;
pub mod error;
pub mod location;
pub mod types;

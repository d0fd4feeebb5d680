//! Math-aware markdown: find LaTeX and images in a document, render them
//! concurrently into a shared bounded cache, and answer per-location queries.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::document::{
    BatchHandle, BatchWaitError, Engine, MathDocument, Phase, Placement, PlacementKind, Resolution,
};
pub use application::render::RenderServices;
pub use cache::{CacheConfig, RenderCache};

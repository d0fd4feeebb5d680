//! Application layer: markup extraction, render scheduling and the document
//! lifecycle that ties them together.

pub mod document;
pub mod error;
pub mod markup;
pub mod render;

//! Concurrent rendering of extracted math and image references.
//!
//! Jobs are planned from an [`Extraction`](crate::application::markup::Extraction),
//! scheduled by the [`RenderDispatcher`] with per-kind concurrency, and
//! counted by one [`CompletionGate`] per batch. Results land in the shared
//! [`RenderCache`](crate::cache::RenderCache) and the document's error table
//! held by the [`DocumentRegistry`].

mod dispatch;
mod gate;
mod jobs;
mod runtime;
mod service;
mod types;

pub use dispatch::{DEFAULT_REMOTE_CONCURRENCY, RenderDispatcher, RenderServices};
pub use gate::{Arrival, BatchSummary, CompletionGate};
pub use jobs::{JobPlan, plan_jobs};
pub use runtime::{DocumentRegistry, Registration};
pub use service::{CliMathRenderer, MathRenderError, PngRoundTrip, UnavailableMathRenderer};
pub use types::{
    BitmapPostProcess, HttpFetcher, HttpResponse, JobKind, MathRenderer, MathRequest, RenderJob,
    ResourceLocator,
};

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use url::Url;

use crate::domain::{
    bitmap::{Bitmap, Color},
    entries::MathStyle,
    error::JobError,
};

/// Status and body of a completed HTTP GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP used by remote image jobs. Transport failures (no response
/// at all) are reported as [`JobError::Transport`] with no status.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, url: &Url) -> Result<HttpResponse, JobError>;
}

/// Everything a math renderer needs for one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct MathRequest {
    pub latex: String,
    pub style: MathStyle,
    pub font_size: f32,
    pub color: Color,
}

/// External LaTeX rasteriser. Called on the blocking pool, so
/// implementations may block.
pub trait MathRenderer: Send + Sync {
    fn render(&self, request: &MathRequest) -> Result<Bitmap, JobError>;
}

/// Host-provided lookup of local resources by name.
#[async_trait]
pub trait ResourceLocator: Send + Sync {
    /// Bytes of `name`, or `None` when no such resource exists.
    async fn locate(&self, name: &str) -> Option<Bytes>;
}

/// Optional fix-up applied to rendered math before it is cached.
pub trait BitmapPostProcess: Send + Sync {
    fn process(&self, bitmap: Bitmap) -> Result<Bitmap, JobError>;
}

/// The three concurrency classes of render work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    RemoteFetch,
    MathRender,
    LocalLoad,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::RemoteFetch => "remote_fetch",
            JobKind::MathRender => "math_render",
            JobKind::LocalLoad => "local_load",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless description of one unit of render work, keyed by the location
/// string its result is reported under.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderJob {
    RemoteFetch { location: String, url: Url },
    MathRender { location: String, request: MathRequest },
    LocalLoad { location: String, name: String },
}

impl RenderJob {
    pub fn location(&self) -> &str {
        match self {
            RenderJob::RemoteFetch { location, .. }
            | RenderJob::MathRender { location, .. }
            | RenderJob::LocalLoad { location, .. } => location,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            RenderJob::RemoteFetch { .. } => JobKind::RemoteFetch,
            RenderJob::MathRender { .. } => JobKind::MathRender,
            RenderJob::LocalLoad { .. } => JobKind::LocalLoad,
        }
    }
}

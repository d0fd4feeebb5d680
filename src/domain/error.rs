use thiserror::Error;
use uuid::Uuid;

use super::location::SourceRange;

/// Failures that abort document construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("internal consistency violated: {0}")]
    InternalConsistency(#[from] ConsistencyError),
}

/// Pipeline-wide invariant violations detected while building a document.
///
/// These mean the external parser dropped, duplicated or relocated content
/// that the segmenter emitted, so no entry built afterwards can be trusted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("markdown parsing lost {missing} of {total} inline math placeholders: {sources:?}")]
    Unresolved {
        missing: usize,
        total: usize,
        sources: Vec<String>,
    },
    #[error("placeholder {id} appeared more than once in the parsed document")]
    Duplicated { id: Uuid },
    #[error("two extracted entries share the location {range}")]
    LocationCollision { range: SourceRange },
}

/// Per-job failure, recorded against the job's location and never
/// propagated past the completion gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("transport error ({}): {message}", status_label(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },
    #[error("image decode failed: {message}")]
    Decode { message: String },
    #[error("math render failed: {message}")]
    Render { message: String },
    #[error("resource `{name}` not found")]
    ResourceNotFound { name: String },
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "no response".to_string(),
    }
}

impl JobError {
    pub fn http_status(status: u16) -> Self {
        Self::Transport {
            status: Some(status),
            message: format!("unexpected status {status}"),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }

    pub fn resource_not_found(name: impl Into<String>) -> Self {
        Self::ResourceNotFound { name: name.into() }
    }

    /// Stable classification used in logs, metrics and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Transport { .. } => "transport",
            JobError::Decode { .. } => "decode",
            JobError::Render { .. } => "render",
            JobError::ResourceNotFound { .. } => "resource_not_found",
        }
    }
}

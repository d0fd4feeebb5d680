use std::{error::Error as StdError, io, path::PathBuf};

use thiserror::Error;

use crate::{
    application::document::BatchWaitError, config::LoadError, domain::error::DocumentError,
    infra::error::InfraError,
};

/// Flattened error chain for diagnostics output.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Batch(#[from] BatchWaitError),
    #[error("failed to read `{path}`: {source}")]
    Input { path: PathBuf, source: io::Error },
    #[error("failed to write output: {0}")]
    Output(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn input(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Input {
            path: path.into(),
            source,
        }
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::Output(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 78,
            AppError::Input { .. } => 66,
            AppError::Document(_) => 65,
            AppError::Batch(BatchWaitError::TimedOut(_)) => 75,
            AppError::Infra(_)
            | AppError::Batch(_)
            | AppError::Output(_)
            | AppError::Unexpected(_) => 70,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

//! Error types for the generation orchestrator

use std::time::Duration;
use thiserror::Error;

/// Fatal errors that abort a run before or during dispatch.
///
/// Per-task failures are never represented here — they are carried as values
/// inside [`crate::models::ImageResult`] so that one failing task cannot take
/// down its siblings.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("allocation failed: {message}")]
    Allocation { message: String },

    #[error("state file corrupted, refusing to resume: {path}")]
    StateCorruption { path: String },

    #[error("template error: {message}")]
    Template { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GeneratorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn allocation(message: impl Into<String>) -> Self {
        Self::Allocation {
            message: message.into(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }
}

pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// Errors surfaced by generation backends.
///
/// The retry policy classifies these; everything else in the orchestrator
/// treats them as opaque failure text.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend task failed: {message}")]
    Task { message: String, retryable: bool },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("task {task_id} still pending after {waited:?}")]
    DeadlineExceeded { task_id: String, waited: Duration },
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by the storage uploader.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("upload rejected with HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("upload transport error: {0}")]
    Transport(String),

    #[error("invalid uploader response: {0}")]
    InvalidResponse(String),

    #[error("failed to read asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Transport(err.to_string())
    }
}

//! Error types for the research pipeline.
//!
//! Only structural failures live here. Malformed model output never becomes an
//! `Error`; stages absorb it and report an [`Outcome::Degraded`](crate::nodes::Outcome).

use std::path::PathBuf;

/// Top-level error type. Any variant aborts the research session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input for {stage}: {reason}")]
    InvalidInput { stage: &'static str, reason: String },

    #[error("section index {index} out of range ({len} sections)")]
    SectionIndex { index: usize, len: usize },

    #[error("illegal state transition: {0}")]
    Transition(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("failed to access {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state document error: {0}")]
    StateDocument(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_input(stage: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            stage,
            reason: reason.into(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the text-generation provider.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {message}")]
    Request { message: String },

    #[error("authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response parse error: {message}")]
    ResponseParse { message: String },
}

/// Errors from the web-search provider. An empty result list is not an error.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {message}")]
    Request { message: String },

    #[error("search authentication failed")]
    AuthFailed,

    #[error("search provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("search response parse error: {message}")]
    ResponseParse { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

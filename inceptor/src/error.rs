//! Error types for the pipeline.
//!
//! Caller-input errors ([`PipelineError`]) abort `inception`. Per-task errors
//! ([`StageError`]) are recovered by the orchestrator and recorded in the
//! solution metadata instead.

use std::time::Duration;

use crate::core::level::Level;
use crate::core::types::FailureKind;

/// Errors that abort a pipeline run before a solution is produced.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("max_levels must be between {min} and {max}, got {requested}")]
    InvalidDepth { requested: u8, min: u8, max: u8 },

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Prompt construction errors.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("prompt for {level} is missing required field `{field}`")]
    MissingField { level: Level, field: String },

    #[error("prompt template for {level} failed: {source}")]
    Template {
        level: Level,
        #[source]
        source: minijinja::Error,
    },
}

/// Failures reported by a generation backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("backend transport error: {0}")]
    Transport(String),

    #[error("backend response could not be decoded: {0}")]
    Decode(String),

    #[error("backend command failed: {0}")]
    Command(String),

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http { status, .. } => *status == 429 || *status >= 500,
            BackendError::Transport(_) | BackendError::Timeout(_) => true,
            BackendError::Decode(_) | BackendError::Command(_) => false,
        }
    }
}

/// No structured record could be recovered from a model response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no structured record found in model response ({len} bytes)", len = .raw.len())]
pub struct ResponseParseError {
    /// The unmodified response, kept for diagnostics.
    pub raw: String,
}

/// Failure of a single stage invocation.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Parse(#[from] ResponseParseError),
}

impl StageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::Backend(_) => FailureKind::Backend,
            StageError::Parse(_) => FailureKind::ResponseParse,
        }
    }
}

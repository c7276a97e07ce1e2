use std::path::PathBuf;
use thiserror::Error;

/// Terminal failures of a single compose call. None are retried internally.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("no clips given to compose")]
    EmptyInput,

    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("failed to encode output: {reason}")]
    Encode { reason: String },

    #[error("transition duration must be a positive number of seconds, got {duration}")]
    InvalidTransition { duration: f64 },

    #[error(
        "transition of {duration:.3}s exceeds the shorter clip ({shortest:.3}s) at junction {index}"
    )]
    TransitionTooLong {
        index: usize,
        duration: f64,
        shortest: f64,
    },
}

impl ComposeError {
    pub(crate) fn encode(reason: impl Into<String>) -> Self {
        ComposeError::Encode {
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ComposeError::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

//! Error type shared by every module of the crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DkvmnError {
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{path}:{line}: {message}")]
    Data {
        path: String,
        line: usize,
        message: String,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("checkpoint mismatch: {0}")]
    CheckpointMismatch(String),

    #[error("non-finite loss at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize },
}

pub type Result<T> = std::result::Result<T, DkvmnError>;

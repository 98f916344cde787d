//! Crate-wide error type.
//!
//! Every failure the engine can report is fatal to the current run: recovery
//! happens by restarting the process and replaying the output log, never by
//! retrying inside the library.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocBatchError>;

#[derive(Debug, Error)]
pub enum DocBatchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("cache decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// An input document is missing its identity or text, or is otherwise unusable.
    #[error("malformed input at line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },

    /// The output log disagrees with the input, or its batch markers are inconsistent.
    #[error("corrupt state at record {index}: {reason}")]
    CorruptState { index: usize, reason: String },

    /// A log line could not be decoded into a record.
    #[error("invalid record at line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("index {index} out of range for {len} entries")]
    OutOfRange { index: usize, len: usize },

    /// A one-shot operation was invoked a second time.
    #[error("{operation} already done")]
    AlreadyDone { operation: &'static str },

    /// An operation ran before the step it depends on.
    #[error("{operation} requires {requirement}")]
    NotReady {
        operation: &'static str,
        requirement: &'static str,
    },

    #[error("output log {path} is sealed")]
    Sealed { path: PathBuf },

    /// Batch statistics handed to the monitor must all be positive.
    #[error("invalid batch statistics: {reason}")]
    InvalidStatistics { reason: String },

    #[error("invalid options: {reason}")]
    InvalidOptions { reason: String },

    #[error("lock error: {0}")]
    Lock(String),
}

impl DocBatchError {
    pub(crate) fn corrupt(index: usize, reason: impl Into<String>) -> Self {
        Self::CorruptState {
            index,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            line,
            reason: reason.into(),
        }
    }
}

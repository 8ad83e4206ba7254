//! Error types shared across the numeric engine and the execution engine.

use thiserror::Error;

/// Shape and argument errors raised by the numeric primitives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("Invalid tensor shape {dims:?}: every dimension must be positive")]
    InvalidShape { dims: Vec<i64> },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Tensor shape {dims:?} exceeds the limit of {limit} elements")]
    TooLarge { dims: Vec<usize>, limit: usize },
}

/// A script that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (line {line}, column {column})")]
pub struct CompileError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Rejections raised by [`crate::runtime::Engine`] before a run starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("a run is already active (run {run_id})")]
    AlreadyRunning { run_id: u64 },
}

/// Failure to deliver an answer to a confirmation prompt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfirmationError {
    #[error("confirmation {id} is stale: its run already ended or stopped")]
    Stale { id: u64 },
}

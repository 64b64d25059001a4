//! Error types for the threadline crate

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Goal not found: {0}")]
    GoalNotFound(String),

    #[error("Subtask not found: {0}")]
    SubtaskNotFound(String),

    #[error("Decision not found: {0}")]
    DecisionNotFound(String),

    #[error("Blocker not found: {0}")]
    BlockerNotFound(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for threadline operations
pub type Result<T> = std::result::Result<T, Error>;

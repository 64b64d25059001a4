//! Threadline - context budget management for LLM agent sessions
//!
//! This crate provides:
//! - Compression strategies (truncate, summarize, hybrid) over conversation
//!   history, with a shared preserve-recent budget rule
//! - A compression coordinator that blocks user input for the duration of a
//!   cycle and guarantees pinned content survives verbatim
//! - Restorable context snapshots with bounded retention
//! - A goal/task state machine (subtasks, checkpoints, locked decisions,
//!   blockers) with JSON persistence

pub mod context;
pub mod error;
pub mod goals;
pub mod llm;

// Re-export commonly used types
pub use context::{
    CheckpointManager, CompressedContext, CompressedSession, CompressionCoordinator,
    CompressionEstimate, CompressionOutcome, CompressionRecord, CompressionService,
    CompressionStatus, CompressionStrategy, ContextEvent, ContextTier, ConversationContext,
    Message, ModeProfile, OperationalMode, SessionMessage, Snapshot, SnapshotManager,
    StrategyKind, SummarizationHandle, TierConfig, TokenCounter,
};
pub use error::{Error, Result};
pub use goals::{
    Goal, GoalCheckpoint, GoalManager, GoalManagerConfig, GoalPriority, GoalStatus, Subtask,
    SubtaskStatus,
};
pub use llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, MockLlmClient, MockStep, Role,
    StreamChunk, ToolCall, WireMessage,
};

//! Context compression engine.
//!
//! [`CompressionCoordinator`] owns a conversation and drives compression
//! cycles; [`CompressionService`] implements the strategies; the checkpoint
//! and snapshot managers cover pinned-content preservation and rollback.

pub mod checkpoint;
pub mod compression;
pub mod coordinator;
pub mod session;
pub mod snapshot;
pub mod tokens;
pub mod types;

pub use checkpoint::{CheckpointManager, CriticalInfo};
pub use compression::{
    CompressedContext, CompressionEstimate, CompressionService, CompressionStatus,
    CompressionStrategy, StrategyKind,
};
pub use coordinator::{
    CompressionCoordinator, CompressionOutcome, ContextEvent, SummarizationHandle,
};
pub use session::{CompressedSession, Part, SessionMessage};
pub use snapshot::{Snapshot, SnapshotHook, SnapshotManager};
pub use tokens::{CacheMetrics, TokenCounter};
pub use types::{
    CompressionRecord, ContextCheckpoint, ContextMetadata, ContextTier, ConversationContext,
    Message, MessageMetadata, ModeProfile, OperationalMode, TierConfig,
};

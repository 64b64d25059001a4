//! Never-compressed content preservation and checkpoint aging.
//!
//! The guarantee that `never_compressed` entries survive every compression
//! cycle byte-identical lives here, not in the strategies: content is pulled
//! out before compression and spliced back into the result unchanged, so the
//! invariant holds regardless of which strategy ran.

use crate::goals::Goal;

use super::compression::CompressedContext;
use super::tokens::TokenCounter;
use super::types::{ConversationContext, Message, TierConfig};

/// Content extracted from a context before compression.
#[derive(Debug, Clone, Default)]
pub struct CriticalInfo {
    pub never_compressed: Vec<Message>,
    pub architecture_decisions: Vec<String>,
}

/// Extracts, preserves, and reconstructs content that must outlive
/// compression cycles.
#[derive(Debug, Default)]
pub struct CheckpointManager;

impl CheckpointManager {
    pub fn new() -> Self {
        Self
    }

    /// Pull critical content out of the context ahead of a compression run.
    pub fn extract_critical_info(&self, context: &ConversationContext) -> CriticalInfo {
        CriticalInfo {
            never_compressed: context.never_compressed.clone(),
            architecture_decisions: context.architecture_decisions.clone(),
        }
    }

    /// Alias used by the coordinator at step 2 of the compression cycle.
    pub fn preserve_never_compressed(&self, context: &ConversationContext) -> CriticalInfo {
        self.extract_critical_info(context)
    }

    /// Splice preserved entries back into a compression result, unchanged.
    ///
    /// Entries already present in the preserved tail (same id) are not
    /// duplicated. Token totals and status are recomputed so the result
    /// stays internally consistent.
    pub fn reconstruct_never_compressed(
        &self,
        info: &CriticalInfo,
        result: &mut CompressedContext,
        counter: &TokenCounter,
    ) {
        if info.never_compressed.is_empty() {
            return;
        }

        // Splice point: after any leading synthetic/system messages so the
        // preserved tail keeps its relative order.
        let insert_at = result
            .preserved
            .iter()
            .take_while(|m| m.role == crate::llm::Role::System)
            .count();

        let mut offset = 0;
        for entry in &info.never_compressed {
            if result.preserved.iter().any(|m| m.id == entry.id) {
                continue;
            }
            result.preserved.insert(insert_at + offset, entry.clone());
            offset += 1;
        }

        if offset > 0 {
            result.compressed_tokens = counter.count_conversation_tokens(&result.preserved);
            if result.original_tokens > 0 {
                result.compression_ratio =
                    result.compressed_tokens as f64 / result.original_tokens as f64;
            }
            if result.compressed_tokens >= result.original_tokens {
                result.status = super::compression::CompressionStatus::Inflated;
            }
        }
    }

    /// Age out goal-level checkpoints down to the tier's retention bound.
    /// Oldest entries go first. Distinct from conversation snapshots.
    pub fn compress_old_checkpoints(&self, goal: &mut Goal, tier: &TierConfig) {
        if goal.checkpoints.len() > tier.max_checkpoints {
            let excess = goal.checkpoints.len() - tier.max_checkpoints;
            goal.checkpoints.drain(..excess);
            tracing::debug!(
                goal_id = %goal.id,
                evicted = excess,
                retained = tier.max_checkpoints,
                "aged out old goal checkpoints"
            );
        }
    }
}

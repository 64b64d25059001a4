//! Compression cycle orchestration.
//!
//! The coordinator is the only writer of a [`ConversationContext`]. A cycle
//! runs: block input, snapshot, extract pinned content, compress, splice
//! pinned content back, apply, unblock. Input is unblocked on every exit
//! path, including adapter failures (which the service already recovers
//! internally) and inflated results (which are discarded).

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use super::checkpoint::CheckpointManager;
use super::compression::{CompressionService, CompressionStatus, CompressionStrategy};
use super::snapshot::SnapshotManager;
use super::types::{CompressionRecord, ConversationContext, Message, ModeProfile, TierConfig};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Preserved-tail floor as a percentage of the context's token budget. The
/// strategy default floor is sized for large contexts; cycles scale it to
/// the session instead.
const PRESERVE_RECENT_PCT: usize = 20;

/// Events the host UI consumes. Delivery is best effort: a full channel
/// drops the event rather than stalling the compression cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    /// User input must be held while a cycle runs.
    BlockUserInput { reason: String },
    /// Input may resume. Always follows a `BlockUserInput`.
    UnblockUserInput { reason: String },
    CompressionComplete {
        original_tokens: usize,
        compressed_tokens: usize,
        strategy: String,
    },
}

/// Result of one compression attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionOutcome {
    /// Usage was below the trigger threshold.
    NotNeeded,
    Applied {
        snapshot_id: String,
        original_tokens: usize,
        compressed_tokens: usize,
    },
    /// The result was not smaller than the input and was discarded. The
    /// context is unchanged; the snapshot still exists.
    Skipped { snapshot_id: String },
}

/// Cloneable observer for the in-progress flag. Waiters do not hold the
/// coordinator; any number may wait concurrently.
#[derive(Clone)]
pub struct SummarizationHandle {
    rx: watch::Receiver<bool>,
}

impl SummarizationHandle {
    pub fn is_in_progress(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until no compression cycle is running. Returns `false` if the
    /// timeout elapsed (or the coordinator was dropped mid-cycle).
    pub async fn wait_for_summarization(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.rx.clone();
        let wait = rx.wait_for(|busy| !*busy);
        match timeout {
            Some(limit) => matches!(tokio::time::timeout(limit, wait).await, Ok(Ok(_))),
            None => wait.await.is_ok(),
        }
    }
}

/// Owns the conversation context and runs compression cycles against it.
pub struct CompressionCoordinator {
    context: ConversationContext,
    service: CompressionService,
    checkpoints: CheckpointManager,
    snapshots: SnapshotManager,
    tier: TierConfig,
    mode: ModeProfile,
    events: mpsc::Sender<ContextEvent>,
    busy: watch::Sender<bool>,
}

impl CompressionCoordinator {
    pub fn new(
        context: ConversationContext,
        service: CompressionService,
        tier: TierConfig,
        mode: ModeProfile,
    ) -> (Self, mpsc::Receiver<ContextEvent>) {
        Self::with_event_capacity(context, service, tier, mode, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(
        context: ConversationContext,
        service: CompressionService,
        tier: TierConfig,
        mode: ModeProfile,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ContextEvent>) {
        let (events, rx) = mpsc::channel(capacity.max(1));
        let (busy, _) = watch::channel(false);
        (
            Self {
                context,
                service,
                checkpoints: CheckpointManager::new(),
                snapshots: SnapshotManager::new(),
                tier,
                mode,
                events,
                busy,
            },
            rx,
        )
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn snapshots(&mut self) -> &mut SnapshotManager {
        &mut self.snapshots
    }

    /// Observer handle for the in-progress flag.
    pub fn handle(&self) -> SummarizationHandle {
        SummarizationHandle {
            rx: self.busy.subscribe(),
        }
    }

    /// Advisory: a cycle is currently running. Not a lock; single-flight
    /// discipline is the caller's responsibility.
    pub fn is_summarization_in_progress(&self) -> bool {
        *self.busy.borrow()
    }

    /// Append a message and keep the running token count current.
    pub fn push_message(&mut self, message: Message) {
        self.context.token_count += self.service.counter().count_message(&message);
        self.context.messages.push(message);
    }

    /// Pin a message so it survives every compression cycle verbatim.
    pub fn pin_message(&mut self, message: Message) {
        self.context.never_compressed.push(message);
    }

    /// Run a compression cycle if usage has crossed the mode threshold.
    pub async fn handle_auto_threshold(&mut self) -> CompressionOutcome {
        if self.context.usage() <= self.mode.compression_threshold {
            return CompressionOutcome::NotNeeded;
        }
        tracing::info!(
            session_id = %self.context.session_id,
            usage = self.context.usage(),
            threshold = self.mode.compression_threshold,
            "auto-compression threshold crossed"
        );
        self.run_cycle().await
    }

    /// Run a compression cycle unconditionally.
    pub async fn compress_now(&mut self) -> CompressionOutcome {
        self.run_cycle().await
    }

    async fn run_cycle(&mut self) -> CompressionOutcome {
        // Input stays blocked for exactly the duration of the cycle; the
        // unblock below is unconditional. send_replace updates the flag even
        // when no handle is currently subscribed.
        self.busy.send_replace(true);
        self.emit(ContextEvent::BlockUserInput {
            reason: "checkpoint-creation".to_string(),
        });

        let outcome = self.compress_once().await;

        self.busy.send_replace(false);
        self.emit(ContextEvent::UnblockUserInput {
            reason: "checkpoint-complete".to_string(),
        });
        outcome
    }

    async fn compress_once(&mut self) -> CompressionOutcome {
        let snapshot_id = self.snapshots.create_snapshot(&self.context, "pre-compression");
        let info = self.checkpoints.preserve_never_compressed(&self.context);

        let strategy = CompressionStrategy::new(self.tier.strategy)
            .with_preserve_recent(self.context.max_tokens * PRESERVE_RECENT_PCT / 100);
        let mut result = self.service.compress(&self.context.messages, &strategy).await;
        self.checkpoints
            .reconstruct_never_compressed(&info, &mut result, self.service.counter());

        if result.status == CompressionStatus::Inflated {
            tracing::warn!(
                session_id = %self.context.session_id,
                original = result.original_tokens,
                compressed = result.compressed_tokens,
                "compression did not shrink the context, discarding result"
            );
            return CompressionOutcome::Skipped { snapshot_id };
        }

        self.context.messages = result.preserved;
        self.context.token_count = result.compressed_tokens;
        self.context
            .metadata
            .compression_history
            .push(CompressionRecord {
                timestamp: Utc::now(),
                strategy: strategy.kind.as_str().to_string(),
                original_tokens: result.original_tokens,
                compressed_tokens: result.compressed_tokens,
            });

        tracing::info!(
            session_id = %self.context.session_id,
            original = result.original_tokens,
            compressed = result.compressed_tokens,
            ratio = result.compression_ratio,
            "applied compression"
        );
        self.emit(ContextEvent::CompressionComplete {
            original_tokens: result.original_tokens,
            compressed_tokens: result.compressed_tokens,
            strategy: strategy.kind.as_str().to_string(),
        });
        CompressionOutcome::Applied {
            snapshot_id,
            original_tokens: result.original_tokens,
            compressed_tokens: result.compressed_tokens,
        }
    }

    fn emit(&self, event: ContextEvent) {
        if let Err(err) = self.events.try_send(event) {
            tracing::warn!(error = %err, "context event channel full, dropping event");
        }
    }
}

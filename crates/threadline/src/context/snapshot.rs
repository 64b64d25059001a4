//! Restorable whole-context snapshots taken before destructive operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::types::ConversationContext;

const DEFAULT_MAX_SNAPSHOTS: usize = 10;

/// Point-in-time copy of a conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub reason: String,
    pub token_count: usize,
    pub message_count: usize,
    pub timestamp: DateTime<Utc>,
    pub context: ConversationContext,
}

/// Hook invoked when the host signals a threshold or imminent overflow.
pub type SnapshotHook = Box<dyn Fn(&Snapshot) + Send + Sync>;

/// Stores and restores context snapshots. Retention is bounded; the oldest
/// snapshot is evicted first.
pub struct SnapshotManager {
    snapshots: Vec<Snapshot>,
    max_snapshots: usize,
    threshold_hooks: Vec<SnapshotHook>,
    overflow_hooks: Vec<SnapshotHook>,
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self {
            snapshots: Vec::new(),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            threshold_hooks: Vec::new(),
            overflow_hooks: Vec::new(),
        }
    }

    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max.max(1);
        self
    }

    /// Deep-copy `context` into a new snapshot and return its id.
    pub fn create_snapshot(
        &mut self,
        context: &ConversationContext,
        reason: impl Into<String>,
    ) -> String {
        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            reason: reason.into(),
            token_count: context.token_count,
            message_count: context.messages.len(),
            timestamp: Utc::now(),
            context: context.clone(),
        };
        let id = snapshot.id.clone();
        tracing::debug!(
            snapshot_id = %id,
            reason = %snapshot.reason,
            messages = snapshot.message_count,
            "created context snapshot"
        );
        self.snapshots.push(snapshot);
        if self.snapshots.len() > self.max_snapshots {
            self.snapshots.remove(0);
        }
        id
    }

    /// Return the stored context copy for `id`.
    pub fn restore_snapshot(&self, id: &str) -> Result<ConversationContext> {
        self.get_snapshot(id).map(|s| s.context.clone())
    }

    pub fn get_snapshot(&self, id: &str) -> Result<&Snapshot> {
        self.snapshots
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::SnapshotNotFound(id.to_string()))
    }

    /// All snapshots, oldest first.
    pub fn list_snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Register a hook fired when the host reports crossing the usage
    /// threshold. The coordinator uses this to guarantee a snapshot exists
    /// before any destructive compression.
    pub fn on_context_threshold(&mut self, hook: SnapshotHook) {
        self.threshold_hooks.push(hook);
    }

    /// Register a hook fired just before the context would overflow.
    pub fn on_before_overflow(&mut self, hook: SnapshotHook) {
        self.overflow_hooks.push(hook);
    }

    /// Host signal: usage threshold crossed. Snapshots the context and runs
    /// threshold hooks.
    pub fn notify_context_threshold(&mut self, context: &ConversationContext) -> String {
        let id = self.create_snapshot(context, "context-threshold");
        self.run_hooks(&id, false);
        id
    }

    /// Host signal: overflow imminent. Snapshots the context and runs
    /// overflow hooks.
    pub fn notify_before_overflow(&mut self, context: &ConversationContext) -> String {
        let id = self.create_snapshot(context, "before-overflow");
        self.run_hooks(&id, true);
        id
    }

    fn run_hooks(&self, id: &str, overflow: bool) {
        // create_snapshot just pushed this id.
        let Ok(snapshot) = self.get_snapshot(id) else {
            return;
        };
        let hooks = if overflow {
            &self.overflow_hooks
        } else {
            &self.threshold_hooks
        };
        for hook in hooks {
            hook(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::Message;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> ConversationContext {
        let mut ctx = ConversationContext::new("s1", 1000);
        ctx.messages.push(Message::user("hello"));
        ctx.token_count = 42;
        ctx
    }

    #[test]
    fn snapshot_captures_counts_and_context() {
        let mut manager = SnapshotManager::new();
        let ctx = context();
        let id = manager.create_snapshot(&ctx, "pre-compression");

        let snapshot = manager.get_snapshot(&id).unwrap();
        assert_eq!(snapshot.reason, "pre-compression");
        assert_eq!(snapshot.token_count, 42);
        assert_eq!(snapshot.message_count, 1);
        assert_eq!(snapshot.context, ctx);
    }

    #[test]
    fn restore_returns_equal_deep_copy() {
        let mut manager = SnapshotManager::new();
        let mut ctx = context();
        let id = manager.create_snapshot(&ctx, "pre-compression");

        // Mutate the live context after the snapshot.
        ctx.messages.clear();
        ctx.token_count = 0;

        let restored = manager.restore_snapshot(&id).unwrap();
        assert_eq!(restored.messages.len(), 1);
        assert_eq!(restored.token_count, 42);
    }

    #[test]
    fn unknown_snapshot_id_is_not_found() {
        let manager = SnapshotManager::new();
        assert!(matches!(
            manager.restore_snapshot("nope"),
            Err(Error::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn retention_evicts_oldest() {
        let mut manager = SnapshotManager::new().with_max_snapshots(3);
        let ctx = context();
        let first = manager.create_snapshot(&ctx, "one");
        for reason in ["two", "three", "four"] {
            manager.create_snapshot(&ctx, reason);
        }
        assert_eq!(manager.list_snapshots().len(), 3);
        assert!(manager.get_snapshot(&first).is_err());
        assert_eq!(manager.list_snapshots()[0].reason, "two");
    }

    #[test]
    fn threshold_notification_snapshots_and_fires_hooks() {
        let mut manager = SnapshotManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        manager.on_context_threshold(Box::new(move |snapshot| {
            assert_eq!(snapshot.reason, "context-threshold");
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let id = manager.notify_context_threshold(&context());
        assert!(manager.get_snapshot(&id).is_ok());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overflow_notification_uses_overflow_hooks_only() {
        let mut manager = SnapshotManager::new();
        let threshold_fired = Arc::new(AtomicUsize::new(0));
        let overflow_fired = Arc::new(AtomicUsize::new(0));
        let t = threshold_fired.clone();
        let o = overflow_fired.clone();
        manager.on_context_threshold(Box::new(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        }));
        manager.on_before_overflow(Box::new(move |_| {
            o.fetch_add(1, Ordering::SeqCst);
        }));

        manager.notify_before_overflow(&context());
        assert_eq!(threshold_fired.load(Ordering::SeqCst), 0);
        assert_eq!(overflow_fired.load(Ordering::SeqCst), 1);
    }
}

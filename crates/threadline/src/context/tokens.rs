//! Heuristic token counting with a per-message cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::types::Message;

/// Rough bytes-per-token heuristic. The exact constants are an interface
/// detail; callers must not depend on specific values.
pub(crate) const CHARS_PER_TOKEN: usize = 4;
pub(crate) const ROLE_OVERHEAD_TOKENS: usize = 4;

/// Cache hit/miss counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
}

/// Token counter with a memoized per-message-id cache.
///
/// The cache is keyed by message id only: reusing an id after editing the
/// content returns the stale count. Callers mint a fresh id on edit.
#[derive(Debug, Default)]
pub struct TokenCounter {
    cache: Mutex<HashMap<String, usize>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count tokens for `text`, memoized under `id`.
    pub fn count_tokens_cached(&self, id: &str, text: &str) -> usize {
        if let Some(&cached) = self.cache.lock().get(id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return cached;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let count = estimate_text_tokens(text);
        self.cache.lock().insert(id.to_string(), count);
        count
    }

    /// Count tokens for a full message, including tool-call payloads.
    pub fn count_message(&self, message: &Message) -> usize {
        let mut extra = 0;
        if let Some(calls) = &message.metadata.tool_calls {
            for call in calls {
                extra += call.id.len() + call.name.len();
                extra += call.arguments.to_string().len();
            }
        }
        self.count_tokens_cached(&message.id, &message.content) + extra / CHARS_PER_TOKEN
    }

    /// Sum tokens over a message list.
    pub fn count_conversation_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }

    /// Current cache metrics.
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Number of cached entries.
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }
}

/// Estimate tokens for raw text (bytes / CHARS_PER_TOKEN + role overhead).
pub(crate) fn estimate_text_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN + ROLE_OVERHEAD_TOKENS
}

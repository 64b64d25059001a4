//! Compression strategies over conversation history.
//!
//! Three strategies share one budget rule: the preserved tail gets
//! max(`preserve_recent`, 30% of total conversation tokens). **Truncate**
//! drops everything older, **Summarize** sends it through the LLM adapter,
//! **Hybrid** truncates the oldest half of the remainder and summarizes only
//! the middle. Summarization failures never propagate: a deterministic
//! placeholder takes the summary's place.

use std::sync::Arc;

use crate::llm::{CompletionRequest, LlmClient, Role, WireMessage};

use super::tokens::TokenCounter;
use super::types::Message;

const SUMMARY_PROMPT: &str = include_str!("templates/summary_prompt.md");

/// Fraction of total tokens the preserved tail is guaranteed, in percent.
const PRESERVE_FLOOR_PCT: usize = 30;
/// Per-message clip applied when building the summarization transcript.
const TRANSCRIPT_CLIP_CHARS: usize = 4000;
/// Upper bound on the whole transcript handed to the adapter.
const TRANSCRIPT_MAX_CHARS: usize = 24_000;

/// Compression strategy kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Truncate,
    Summarize,
    Hybrid,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Truncate => "truncate",
            StrategyKind::Summarize => "summarize",
            StrategyKind::Hybrid => "hybrid",
        }
    }
}

/// Input to [`CompressionService::compress`].
#[derive(Debug, Clone)]
pub struct CompressionStrategy {
    pub kind: StrategyKind,
    /// Token floor for the preserved tail (raised to 30% of total if larger).
    pub preserve_recent: usize,
    /// Max tokens requested from the adapter for the summary.
    pub summary_max_tokens: usize,
}

impl CompressionStrategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            preserve_recent: 1000,
            summary_max_tokens: 500,
        }
    }

    pub fn with_preserve_recent(mut self, tokens: usize) -> Self {
        self.preserve_recent = tokens;
        self
    }

    pub fn with_summary_max_tokens(mut self, tokens: usize) -> Self {
        self.summary_max_tokens = tokens;
        self
    }
}

/// Whether a compression attempt actually shrank the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStatus {
    Success,
    /// Output was not smaller than the input. The result is still usable;
    /// the caller decides whether to apply it.
    Inflated,
}

/// Output of a compression run.
#[derive(Debug, Clone)]
pub struct CompressedContext {
    /// Summary text (or truncation notice) describing what was removed.
    pub summary: String,
    /// The full replacement message list: synthetic leader plus verbatim tail.
    pub preserved: Vec<Message>,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub compression_ratio: f64,
    pub status: CompressionStatus,
}

impl CompressedContext {
    /// No reduction happened. `compressed == original` falls under the
    /// inflation rule, so callers can tell a did-nothing result apart from
    /// a real shrink.
    fn passthrough(messages: &[Message], tokens: usize) -> Self {
        Self {
            summary: String::new(),
            preserved: messages.to_vec(),
            original_tokens: tokens,
            compressed_tokens: tokens,
            compression_ratio: 1.0,
            status: CompressionStatus::Inflated,
        }
    }
}

/// Synchronous preview for UI, no strategy execution.
#[derive(Debug, Clone, Copy)]
pub struct CompressionEstimate {
    pub current_tokens: usize,
    pub estimated_tokens: usize,
    pub estimated_ratio: f64,
}

/// Compression engine. Holds the token counter and the optional LLM adapter;
/// with no adapter, summarization falls back to the placeholder.
pub struct CompressionService {
    counter: TokenCounter,
    llm: Option<Arc<dyn LlmClient>>,
}

impl CompressionService {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            counter: TokenCounter::new(),
            llm,
        }
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    pub(crate) fn adapter(&self) -> Option<&Arc<dyn LlmClient>> {
        self.llm.as_ref()
    }

    /// Boolean threshold gate.
    pub fn should_compress(&self, token_count: usize, threshold: usize) -> bool {
        token_count > threshold
    }

    /// O(1)-style preview assuming a fixed 50% reduction.
    pub fn estimate_compression(&self, messages: &[Message]) -> CompressionEstimate {
        let current = self.counter.count_conversation_tokens(messages);
        CompressionEstimate {
            current_tokens: current,
            estimated_tokens: current / 2,
            estimated_ratio: 0.5,
        }
    }

    /// Compress `messages` per `strategy`. Never fails: adapter errors are
    /// recovered with a deterministic placeholder summary.
    pub async fn compress(
        &self,
        messages: &[Message],
        strategy: &CompressionStrategy,
    ) -> CompressedContext {
        let original_tokens = self.counter.count_conversation_tokens(messages);
        if messages.is_empty() {
            return CompressedContext::passthrough(messages, original_tokens);
        }

        let budget = preserve_budget(original_tokens, strategy.preserve_recent);
        let sizes: Vec<usize> = messages.iter().map(|m| self.counter.count_message(m)).collect();
        let split = split_by_budget(&sizes, budget);

        let older = &messages[..split];
        let tail = &messages[split..];
        if older.is_empty() {
            return CompressedContext::passthrough(messages, original_tokens);
        }

        let summary = match strategy.kind {
            StrategyKind::Truncate => format!("[{} earlier messages truncated]", older.len()),
            StrategyKind::Summarize => self.summarize(older, strategy).await,
            StrategyKind::Hybrid => {
                // Oldest half is dropped outright; only the middle half is
                // worth adapter tokens.
                let cut = older.len() / 2;
                let (dropped, middle) = older.split_at(cut);
                let middle_summary = self.summarize(middle, strategy).await;
                if dropped.is_empty() {
                    middle_summary
                } else {
                    format!(
                        "[{} earlier messages truncated] {}",
                        dropped.len(),
                        middle_summary
                    )
                }
            }
        };

        let mut preserved = Vec::with_capacity(tail.len() + 1);
        preserved.push(Message::system(match strategy.kind {
            StrategyKind::Truncate => summary.clone(),
            _ => format!("Previous conversation summary: {summary}"),
        }));
        preserved.extend_from_slice(tail);

        self.finish(summary, preserved, original_tokens)
    }

    fn finish(
        &self,
        summary: String,
        preserved: Vec<Message>,
        original_tokens: usize,
    ) -> CompressedContext {
        let compressed_tokens = self.counter.count_conversation_tokens(&preserved);
        let compression_ratio = if original_tokens > 0 {
            compressed_tokens as f64 / original_tokens as f64
        } else {
            1.0
        };
        let status = if compressed_tokens >= original_tokens {
            CompressionStatus::Inflated
        } else {
            CompressionStatus::Success
        };
        if status == CompressionStatus::Inflated {
            tracing::warn!(
                original_tokens,
                compressed_tokens,
                "compression inflated the context"
            );
        }
        CompressedContext {
            summary,
            preserved,
            original_tokens,
            compressed_tokens,
            compression_ratio,
            status,
        }
    }

    /// Summarize `messages` through the adapter, falling back to the
    /// deterministic placeholder on error or empty output.
    async fn summarize(&self, messages: &[Message], strategy: &CompressionStrategy) -> String {
        let Some(llm) = &self.llm else {
            return placeholder_summary(messages);
        };

        let transcript = format_transcript(messages);
        let request = CompletionRequest::new(vec![
            WireMessage::system(SUMMARY_PROMPT),
            WireMessage::user(transcript),
        ])
        .with_max_tokens(strategy.summary_max_tokens as u32)
        .with_temperature(0.3);

        match llm.complete(request).await {
            Ok(response) => {
                let text = response.content.unwrap_or_default();
                if text.trim().is_empty() {
                    tracing::warn!("adapter returned empty summary, using placeholder");
                    placeholder_summary(messages)
                } else {
                    text
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "summarization failed, using placeholder");
                placeholder_summary(messages)
            }
        }
    }
}

/// Preserve-token budget: max of the strategy floor and 30% of total.
pub(crate) fn preserve_budget(total_tokens: usize, preserve_recent: usize) -> usize {
    preserve_recent.max(total_tokens * PRESERVE_FLOOR_PCT / 100)
}

/// Walk newest-first accumulating into `budget`; returns the split index.
/// Everything at `split..` fits; a message exactly filling the budget is kept.
pub(crate) fn split_by_budget(sizes: &[usize], budget: usize) -> usize {
    let mut accumulated = 0;
    let mut split = sizes.len();
    for (i, &size) in sizes.iter().enumerate().rev() {
        if accumulated + size > budget {
            break;
        }
        accumulated += size;
        split = i;
    }
    split
}

/// Deterministic summary used whenever the adapter cannot produce one.
pub(crate) fn placeholder_summary(messages: &[Message]) -> String {
    let users = messages.iter().filter(|m| m.role == Role::User).count();
    let assistants = messages.iter().filter(|m| m.role == Role::Assistant).count();
    placeholder_summary_for_counts(messages.len(), users, assistants)
}

pub(crate) fn placeholder_summary_for_counts(
    total: usize,
    users: usize,
    assistants: usize,
) -> String {
    format!(
        "[Conversation summary: {total} messages compressed ({users} user, {assistants} assistant)]"
    )
}

/// Render messages as a bounded-length transcript for the adapter.
fn format_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        let label = match msg.role {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::Tool => "TOOL",
        };
        out.push_str(&format!(
            "[{}] {}\n\n",
            label,
            clip_middle(&msg.content, TRANSCRIPT_CLIP_CHARS)
        ));
        if let Some(calls) = &msg.metadata.tool_calls {
            for call in calls {
                let args = call.arguments.to_string();
                out.push_str(&format!(
                    "  -> tool_call: {}({})\n",
                    call.name,
                    clip_middle(&args, 200)
                ));
            }
        }
    }
    clip_middle(&out, TRANSCRIPT_MAX_CHARS)
}

/// Keep head + tail of a string with a marker in the middle, UTF-8 safe.
pub(crate) fn clip_middle(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let marker = format!("\n... [{} chars clipped] ...\n", s.len() - max_len);
    if max_len <= marker.len() {
        return s[..boundary_at_or_before(s, max_len)].to_string();
    }

    let available = max_len - marker.len();
    let head = boundary_at_or_before(s, available / 2);
    let tail = boundary_at_or_after(s, s.len() - (available - available / 2));
    format!("{}{}{}", &s[..head], marker, &s[tail..])
}

fn boundary_at_or_before(s: &str, mut pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn boundary_at_or_after(s: &str, mut pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    while pos < s.len() && !s.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, MockStep};

    fn service() -> CompressionService {
        CompressionService::new(None)
    }

    fn service_with(steps: Vec<MockStep>) -> CompressionService {
        CompressionService::new(Some(Arc::new(MockLlmClient::from_steps("mock", steps))))
    }

    /// ~50 tokens each at the bytes/4 + overhead heuristic.
    fn chatter(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                let body = format!("turn {i} {}", "word ".repeat(36));
                if i % 2 == 0 {
                    Message::user(body)
                } else {
                    Message::assistant(body)
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // budget arithmetic
    // ------------------------------------------------------------------

    #[test]
    fn budget_is_max_of_floor_and_30_pct() {
        assert_eq!(preserve_budget(1000, 10), 300);
        assert_eq!(preserve_budget(1000, 500), 500);
        assert_eq!(preserve_budget(0, 10), 10);
    }

    #[test]
    fn split_keeps_exactly_filling_message() {
        // Walking from the back: 30 + 70 == 100 fits exactly.
        let sizes = [50, 70, 30];
        assert_eq!(split_by_budget(&sizes, 100), 1);
    }

    #[test]
    fn split_empty_and_oversized() {
        assert_eq!(split_by_budget(&[], 100), 0);
        // Newest message alone exceeds the budget: nothing preserved.
        assert_eq!(split_by_budget(&[10, 500], 100), 2);
    }

    #[test]
    fn split_preserves_everything_under_budget() {
        assert_eq!(split_by_budget(&[10, 20, 30], 1000), 0);
    }

    // ------------------------------------------------------------------
    // truncate
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn truncate_scenario_15_messages() {
        // preserve_recent=10 is below the 30% floor, so the
        // floor governs; the preserved list holds only the newest messages
        // fitting that budget plus one synthetic notice.
        let svc = service();
        let messages = chatter(15);
        let strategy =
            CompressionStrategy::new(StrategyKind::Truncate).with_preserve_recent(10);

        let result = svc.compress(&messages, &strategy).await;

        assert_eq!(result.preserved[0].role, Role::System);
        assert!(result.preserved[0].content.contains("earlier messages truncated"));
        let tail = &result.preserved[1..];
        assert!(!tail.is_empty());
        assert!(tail.len() < messages.len());
        // Preserved tail is byte-identical to the newest originals.
        assert_eq!(tail, &messages[messages.len() - tail.len()..]);
        assert_eq!(result.status, CompressionStatus::Success);
        assert!(result.compressed_tokens < result.original_tokens);
    }

    #[tokio::test]
    async fn truncate_counts_dropped_messages() {
        let svc = service();
        let messages = chatter(10);
        let strategy = CompressionStrategy::new(StrategyKind::Truncate).with_preserve_recent(1);
        let result = svc.compress(&messages, &strategy).await;
        let dropped = messages.len() - (result.preserved.len() - 1);
        assert!(result.summary.contains(&format!("[{dropped} earlier messages truncated]")));
    }

    #[tokio::test]
    async fn truncate_passthrough_when_all_fit() {
        let svc = service();
        let messages = chatter(4);
        let strategy =
            CompressionStrategy::new(StrategyKind::Truncate).with_preserve_recent(100_000);
        let result = svc.compress(&messages, &strategy).await;
        assert_eq!(result.preserved, messages);
        assert!(result.summary.is_empty());
        assert_eq!(result.compression_ratio, 1.0);
        // Nothing shrank, so the inflation rule applies.
        assert_eq!(result.status, CompressionStatus::Inflated);
    }

    #[tokio::test]
    async fn compress_empty_input_is_passthrough() {
        let svc = service();
        let strategy = CompressionStrategy::new(StrategyKind::Truncate);
        let result = svc.compress(&[], &strategy).await;
        assert!(result.preserved.is_empty());
        assert_eq!(result.status, CompressionStatus::Inflated);
    }

    // ------------------------------------------------------------------
    // summarize
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn summarize_uses_adapter_output() {
        let svc = service_with(vec![MockStep::text("goal: refactor; done: parser")]);
        let messages = chatter(12);
        let strategy =
            CompressionStrategy::new(StrategyKind::Summarize).with_preserve_recent(10);
        let result = svc.compress(&messages, &strategy).await;
        assert_eq!(result.summary, "goal: refactor; done: parser");
        assert!(result.preserved[0]
            .content
            .starts_with("Previous conversation summary:"));
    }

    #[tokio::test]
    async fn summarize_recovers_from_adapter_error() {
        let svc = service_with(vec![MockStep::error("backend down")]);
        let messages = chatter(12);
        let strategy =
            CompressionStrategy::new(StrategyKind::Summarize).with_preserve_recent(10);
        let result = svc.compress(&messages, &strategy).await;
        assert!(result.summary.starts_with("[Conversation summary:"));
        assert!(result.summary.contains("user"));
        assert!(result.summary.contains("assistant"));
    }

    #[tokio::test]
    async fn summarize_recovers_from_empty_output() {
        let svc = service_with(vec![MockStep::text("   \n")]);
        let messages = chatter(12);
        let strategy =
            CompressionStrategy::new(StrategyKind::Summarize).with_preserve_recent(10);
        let result = svc.compress(&messages, &strategy).await;
        assert!(result.summary.starts_with("[Conversation summary:"));
    }

    #[tokio::test]
    async fn summarize_without_adapter_uses_placeholder() {
        let svc = service();
        let messages = chatter(12);
        let strategy =
            CompressionStrategy::new(StrategyKind::Summarize).with_preserve_recent(10);
        let result = svc.compress(&messages, &strategy).await;
        assert!(result.summary.starts_with("[Conversation summary:"));
    }

    #[tokio::test]
    async fn summarize_preserved_tail_is_verbatim() {
        let svc = service_with(vec![MockStep::text("s")]);
        let messages = chatter(12);
        let strategy =
            CompressionStrategy::new(StrategyKind::Summarize).with_preserve_recent(10);
        let result = svc.compress(&messages, &strategy).await;
        let tail = &result.preserved[1..];
        assert_eq!(tail, &messages[messages.len() - tail.len()..]);
    }

    // ------------------------------------------------------------------
    // hybrid
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn hybrid_truncates_oldest_half_and_summarizes_middle() {
        let svc = service_with(vec![MockStep::text("middle summary")]);
        let messages = chatter(16);
        let strategy = CompressionStrategy::new(StrategyKind::Hybrid).with_preserve_recent(10);
        let result = svc.compress(&messages, &strategy).await;
        assert!(result.summary.contains("earlier messages truncated"));
        assert!(result.summary.contains("middle summary"));
        let tail = &result.preserved[1..];
        assert_eq!(tail, &messages[messages.len() - tail.len()..]);
    }

    #[tokio::test]
    async fn hybrid_single_old_message_skips_truncation_notice() {
        let svc = service_with(vec![MockStep::text("just a summary")]);
        // Small enough that only one message falls outside the budget.
        let messages = chatter(5);
        let sizes: Vec<usize> = messages
            .iter()
            .map(|m| svc.counter().count_message(m))
            .collect();
        let total: usize = sizes.iter().sum();
        let tail_tokens: usize = sizes[1..].iter().sum();
        let strategy =
            CompressionStrategy::new(StrategyKind::Hybrid).with_preserve_recent(tail_tokens);
        // Guard the setup: budget admits all but the oldest message.
        assert!(preserve_budget(total, tail_tokens) >= tail_tokens);
        let result = svc.compress(&messages, &strategy).await;
        // One old message halves to (0 dropped, 1 summarized).
        assert_eq!(result.summary, "just a summary");
    }

    // ------------------------------------------------------------------
    // estimates and gates
    // ------------------------------------------------------------------

    #[test]
    fn estimate_is_half_of_current() {
        let svc = service();
        let messages = chatter(8);
        let estimate = svc.estimate_compression(&messages);
        assert_eq!(estimate.estimated_tokens, estimate.current_tokens / 2);
        assert_eq!(estimate.estimated_ratio, 0.5);
    }

    #[test]
    fn should_compress_is_strict_threshold() {
        let svc = service();
        assert!(!svc.should_compress(100, 100));
        assert!(svc.should_compress(101, 100));
    }

    #[tokio::test]
    async fn inflation_is_reported_not_discarded() {
        let svc = service();
        // Two tiny messages: the synthetic notice costs more than the
        // single dropped message.
        let messages = vec![Message::user("a"), Message::user("b")];
        let strategy = CompressionStrategy::new(StrategyKind::Truncate).with_preserve_recent(5);
        let result = svc.compress(&messages, &strategy).await;
        if result.compressed_tokens >= result.original_tokens {
            assert_eq!(result.status, CompressionStatus::Inflated);
            assert!(!result.preserved.is_empty());
        }
    }

    // ------------------------------------------------------------------
    // clip_middle
    // ------------------------------------------------------------------

    #[test]
    fn clip_middle_short_string_unchanged() {
        assert_eq!(clip_middle("hello", 100), "hello");
    }

    #[test]
    fn clip_middle_never_exceeds_max() {
        for max in [50, 200, 1000] {
            let s = "x".repeat(5000);
            assert!(clip_middle(&s, max).len() <= max);
        }
    }

    #[test]
    fn clip_middle_keeps_head_and_tail() {
        let s = format!("{}{}", "H".repeat(500), "T".repeat(500));
        let clipped = clip_middle(&s, 200);
        assert!(clipped.starts_with('H'));
        assert!(clipped.ends_with('T'));
        assert!(clipped.contains("chars clipped"));
    }

    #[test]
    fn clip_middle_utf8_safe() {
        let s = "自動要約🚀".repeat(100);
        let clipped = clip_middle(&s, 150);
        assert!(clipped.len() <= 150);
        let _ = clipped.chars().count(); // would panic on invalid boundaries
    }
}

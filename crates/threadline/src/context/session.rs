//! Session-level compression over the wire message shape.
//!
//! Persisted sessions store messages as role + typed parts with string
//! timestamps. The same three strategies apply, with one extra rule: a
//! leading system prompt is always preserved and its tokens are carved out
//! of the budget before the recent/summary split.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::llm::{CompletionRequest, Role, WireMessage};

use super::compression::{
    CompressionService, CompressionStatus, CompressionStrategy, StrategyKind, clip_middle,
    placeholder_summary_for_counts, preserve_budget, split_by_budget,
};
use super::tokens::estimate_text_tokens;

const SUMMARY_PROMPT: &str = include_str!("templates/summary_prompt.md");
const TRANSCRIPT_MAX_CHARS: usize = 24_000;

/// One typed part of a wire message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
}

/// Wire-persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMessage {
    pub role: Role,
    pub parts: Vec<Part>,
    pub timestamp: String,
}

impl SessionMessage {
    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    /// Concatenated text of all parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => text.as_str(),
            })
            .collect()
    }

    fn tokens(&self) -> usize {
        estimate_text_tokens(&self.text())
    }
}

/// Output of a session compression run.
#[derive(Debug, Clone)]
pub struct CompressedSession {
    pub summary: String,
    pub preserved: Vec<SessionMessage>,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub compression_ratio: f64,
    pub status: CompressionStatus,
}

impl CompressionService {
    /// Threshold gate over the wire shape.
    pub fn should_compress_session(
        &self,
        messages: &[SessionMessage],
        token_limit: usize,
        threshold: f64,
    ) -> bool {
        if token_limit == 0 {
            return false;
        }
        let total: usize = messages.iter().map(SessionMessage::tokens).sum();
        total > (token_limit as f64 * threshold) as usize
    }

    /// Compress wire-format messages per `strategy`. Same recovery rules as
    /// [`CompressionService::compress`]: this never fails.
    pub async fn compress_session(
        &self,
        messages: &[SessionMessage],
        strategy: &CompressionStrategy,
    ) -> CompressedSession {
        let original_tokens: usize = messages.iter().map(SessionMessage::tokens).sum();
        if messages.is_empty() {
            return passthrough(messages, original_tokens);
        }

        // A leading system prompt is preserved first; its cost comes out of
        // the budget before the recent/summary split.
        let (system, body) = match messages.first() {
            Some(first) if first.role == Role::System => (Some(first.clone()), &messages[1..]),
            _ => (None, messages),
        };
        let system_tokens = system.as_ref().map(SessionMessage::tokens).unwrap_or(0);
        let budget = preserve_budget(original_tokens, strategy.preserve_recent)
            .saturating_sub(system_tokens);

        let sizes: Vec<usize> = body.iter().map(SessionMessage::tokens).collect();
        let split = split_by_budget(&sizes, budget);
        let older = &body[..split];
        let tail = &body[split..];
        if older.is_empty() {
            return passthrough(messages, original_tokens);
        }

        let summary = match strategy.kind {
            StrategyKind::Truncate => format!("[{} earlier messages truncated]", older.len()),
            StrategyKind::Summarize => self.summarize_session(older, strategy).await,
            StrategyKind::Hybrid => {
                let cut = older.len() / 2;
                let (dropped, middle) = older.split_at(cut);
                let middle_summary = self.summarize_session(middle, strategy).await;
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

        let mut preserved = Vec::with_capacity(tail.len() + 2);
        if let Some(system) = system {
            preserved.push(system);
        }
        preserved.push(SessionMessage::system(match strategy.kind {
            StrategyKind::Truncate => summary.clone(),
            _ => format!("Previous conversation summary: {summary}"),
        }));
        preserved.extend_from_slice(tail);

        let compressed_tokens: usize = preserved.iter().map(SessionMessage::tokens).sum();
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

        CompressedSession {
            summary,
            preserved,
            original_tokens,
            compressed_tokens,
            compression_ratio,
            status,
        }
    }

    async fn summarize_session(
        &self,
        messages: &[SessionMessage],
        strategy: &CompressionStrategy,
    ) -> String {
        let placeholder = || {
            let users = messages.iter().filter(|m| m.role == Role::User).count();
            let assistants = messages.iter().filter(|m| m.role == Role::Assistant).count();
            placeholder_summary_for_counts(messages.len(), users, assistants)
        };

        let Some(llm) = self.adapter() else {
            return placeholder();
        };

        let mut transcript = String::new();
        for msg in messages {
            let label = match msg.role {
                Role::System => "SYSTEM",
                Role::User => "USER",
                Role::Assistant => "ASSISTANT",
                Role::Tool => "TOOL",
            };
            transcript.push_str(&format!("[{}] {}\n\n", label, msg.text()));
        }
        let transcript = clip_middle(&transcript, TRANSCRIPT_MAX_CHARS);

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
                    tracing::warn!("adapter returned empty session summary, using placeholder");
                    placeholder()
                } else {
                    text
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "session summarization failed, using placeholder");
                placeholder()
            }
        }
    }
}

// `compressed == original` falls under the inflation rule, same as the
// in-memory path.
fn passthrough(messages: &[SessionMessage], tokens: usize) -> CompressedSession {
    CompressedSession {
        summary: String::new(),
        preserved: messages.to_vec(),
        original_tokens: tokens,
        compressed_tokens: tokens,
        compression_ratio: 1.0,
        status: CompressionStatus::Inflated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, MockStep};
    use std::sync::Arc;

    fn session(n: usize) -> Vec<SessionMessage> {
        let mut messages = vec![SessionMessage::system("you are a careful agent")];
        for i in 0..n {
            let body = format!("turn {i} {}", "word ".repeat(36));
            if i % 2 == 0 {
                messages.push(SessionMessage::user(body));
            } else {
                messages.push(SessionMessage::assistant(body));
            }
        }
        messages
    }

    fn service() -> CompressionService {
        CompressionService::new(None)
    }

    #[tokio::test]
    async fn leading_system_prompt_survives_all_strategies() {
        for kind in [StrategyKind::Truncate, StrategyKind::Summarize, StrategyKind::Hybrid] {
            let svc = service();
            let messages = session(14);
            let strategy = CompressionStrategy::new(kind).with_preserve_recent(10);
            let result = svc.compress_session(&messages, &strategy).await;
            assert_eq!(
                result.preserved[0], messages[0],
                "strategy {kind:?} must keep the system prompt first"
            );
        }
    }

    #[tokio::test]
    async fn system_tokens_are_carved_from_the_budget() {
        let svc = service();
        // Heavy system prompt shrinks the tail budget.
        let mut heavy = session(14);
        heavy[0] = SessionMessage::system("rule ".repeat(500));
        let light = session(14);

        let strategy = CompressionStrategy::new(StrategyKind::Truncate).with_preserve_recent(10);
        let heavy_result = svc.compress_session(&heavy, &strategy).await;
        let light_result = svc.compress_session(&light, &strategy).await;

        // system + notice excluded from tail length comparison
        assert!(heavy_result.preserved.len() <= light_result.preserved.len());
    }

    #[tokio::test]
    async fn truncate_session_replaces_old_messages_with_notice() {
        let svc = service();
        let messages = session(14);
        let strategy = CompressionStrategy::new(StrategyKind::Truncate).with_preserve_recent(10);
        let result = svc.compress_session(&messages, &strategy).await;
        assert_eq!(result.preserved[1].role, Role::System);
        assert!(result.preserved[1].text().contains("earlier messages truncated"));
        assert!(result.compressed_tokens < result.original_tokens);
        assert_eq!(result.status, CompressionStatus::Success);
    }

    #[tokio::test]
    async fn summarize_session_uses_adapter() {
        let svc = CompressionService::new(Some(Arc::new(MockLlmClient::from_steps(
            "mock",
            vec![MockStep::text("wire summary")],
        ))));
        let messages = session(14);
        let strategy = CompressionStrategy::new(StrategyKind::Summarize).with_preserve_recent(10);
        let result = svc.compress_session(&messages, &strategy).await;
        assert_eq!(result.summary, "wire summary");
    }

    #[tokio::test]
    async fn summarize_session_recovers_from_error() {
        let svc = CompressionService::new(Some(Arc::new(MockLlmClient::from_steps(
            "mock",
            vec![MockStep::error("gone")],
        ))));
        let messages = session(14);
        let strategy = CompressionStrategy::new(StrategyKind::Summarize).with_preserve_recent(10);
        let result = svc.compress_session(&messages, &strategy).await;
        assert!(result.summary.starts_with("[Conversation summary:"));
    }

    #[tokio::test]
    async fn preserved_tail_is_verbatim_wire_messages() {
        let svc = service();
        let messages = session(14);
        let strategy = CompressionStrategy::new(StrategyKind::Truncate).with_preserve_recent(10);
        let result = svc.compress_session(&messages, &strategy).await;
        let tail = &result.preserved[2..];
        assert_eq!(tail, &messages[messages.len() - tail.len()..]);
    }

    #[test]
    fn should_compress_session_gate() {
        let svc = service();
        let messages = session(14);
        assert!(svc.should_compress_session(&messages, 100, 0.8));
        assert!(!svc.should_compress_session(&messages, 1_000_000, 0.8));
        assert!(!svc.should_compress_session(&messages, 0, 0.8));
    }

    #[test]
    fn part_serialization_shape() {
        let msg = SessionMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["parts"][0]["type"], "text");
        assert_eq!(json["parts"][0]["text"], "hi");
        assert_eq!(json["role"], "user");
    }
}

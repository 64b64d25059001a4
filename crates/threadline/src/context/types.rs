//! Conversation context data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{Role, ToolCall};

/// In-memory chat message.
///
/// Each message carries a unique id used as the token-cache key. Editing a
/// message's content requires minting a fresh id; reusing an id with
/// different content yields stale token counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

/// Optional per-message metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a tool result message
    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role(Role::Tool, content)
    }

    /// Attach tool calls (assistant messages)
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.metadata.tool_calls = Some(tool_calls);
        self
    }
}

/// A recorded compression cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompressionRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy: String,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
}

/// Conversation-level checkpoint marker carried in the context.
///
/// Distinct from both goal-level checkpoints and snapshots: this is plain
/// data the host attaches to the conversation and the compressor preserves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextCheckpoint {
    pub id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl ContextCheckpoint {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Context metadata block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextMetadata {
    pub model: String,
    pub context_size: usize,
    #[serde(default)]
    pub compression_history: Vec<CompressionRecord>,
}

/// Full conversation context for one session.
///
/// Mutated only by the [`CompressionCoordinator`](super::CompressionCoordinator);
/// everyone else reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationContext {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub token_count: usize,
    pub max_tokens: usize,
    #[serde(default)]
    pub checkpoints: Vec<ContextCheckpoint>,
    #[serde(default)]
    pub architecture_decisions: Vec<String>,
    /// Entries guaranteed to survive every compression cycle verbatim.
    #[serde(default)]
    pub never_compressed: Vec<Message>,
    #[serde(default)]
    pub metadata: ContextMetadata,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            system_prompt: String::new(),
            token_count: 0,
            max_tokens,
            checkpoints: Vec::new(),
            architecture_decisions: Vec::new(),
            never_compressed: Vec::new(),
            metadata: ContextMetadata {
                context_size: max_tokens,
                ..ContextMetadata::default()
            },
        }
    }

    /// Current usage as a fraction of the budget, 0.0 when the budget is 0.
    pub fn usage(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        self.token_count as f64 / self.max_tokens as f64
    }
}

/// Coarse context-size regime determining compression aggressiveness
/// and checkpoint retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextTier {
    Tier1,
    Tier2,
    Tier3,
}

/// Per-tier compression settings. Host-supplied, read-only.
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub strategy: super::StrategyKind,
    pub max_checkpoints: usize,
}

impl ContextTier {
    /// Default configuration for each tier. Hosts may supply their own.
    pub fn default_config(self) -> TierConfig {
        use super::StrategyKind;
        match self {
            ContextTier::Tier1 => TierConfig {
                strategy: StrategyKind::Truncate,
                max_checkpoints: 5,
            },
            ContextTier::Tier2 => TierConfig {
                strategy: StrategyKind::Hybrid,
                max_checkpoints: 10,
            },
            ContextTier::Tier3 => TierConfig {
                strategy: StrategyKind::Summarize,
                max_checkpoints: 20,
            },
        }
    }
}

/// Deployment/usage profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationalMode {
    Assistant,
    Agent,
}

/// Per-mode settings. Host-supplied, read-only.
#[derive(Debug, Clone, Copy)]
pub struct ModeProfile {
    /// The mode's default strategy. The coordinator follows the tier's
    /// strategy; hosts consult this field when building the [`TierConfig`]s
    /// they pass in, so the mode default carries into the tiers.
    pub context_strategy: super::StrategyKind,
    /// Token-usage fraction of `max_tokens` that triggers auto-compression.
    pub compression_threshold: f64,
}

impl OperationalMode {
    /// Default profile for each mode. Hosts may supply their own.
    pub fn default_profile(self) -> ModeProfile {
        use super::StrategyKind;
        match self {
            OperationalMode::Assistant => ModeProfile {
                context_strategy: StrategyKind::Truncate,
                compression_threshold: 0.85,
            },
            OperationalMode::Agent => ModeProfile {
                context_strategy: StrategyKind::Hybrid,
                compression_threshold: 0.75,
            },
        }
    }
}

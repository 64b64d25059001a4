//! LLM adapter boundary - client trait, wire types, and the test mock

mod client;
mod mock_client;

pub use client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Role, StreamChunk,
    StreamResult, TokenUsage, ToolCall, WireMessage,
};
pub use mock_client::{MockLlmClient, MockStep, MockStepKind};

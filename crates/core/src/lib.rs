//! # ferrocall Core
//!
//! Domain types, traits, and error definitions for the ferrocall agent.
//! This crate defines the model that every other crate implements against:
//! the conversation log, the provider (completion oracle) contract, and the
//! tool registry with its never-throwing execution contract.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, QueryOptions, ResponseFormat,
    StreamChunk, ToolChoice, ToolDefinition, Usage,
};
pub use tool::{Tool, ToolCallCandidate, ToolExecutionRecord, ToolRegistry, ToolResult};

//! Provider trait: the abstraction over the completion oracle.
//!
//! A Provider knows how to send a conversation snapshot to a model and hand
//! back the reply as an ordered stream of text deltas terminated by a
//! `done` chunk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// How the model is asked to shape its reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Unconstrained prose (tool calls, if any, embedded as text)
    #[default]
    FreeText,
    /// A single JSON object
    StructuredJson,
}

/// Whether the model may or must call a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    Forced,
}

/// A tool summary offered to the model: name, description and parameter
/// schema, without the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Per-query knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    /// The model to use (e.g., "llama3.1", "gpt-4o-mini")
    pub model: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling cutoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub response_format: ResponseFormat,

    /// Tools offered for structured decoding; empty in free-text mode,
    /// where the catalog travels in the system preamble instead.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_catalog: Vec<ToolDefinition>,

    #[serde(default)]
    pub tool_choice: ToolChoice,
}

fn default_temperature() -> f32 {
    0.2
}

impl QueryOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            top_p: None,
            max_tokens: None,
            response_format: ResponseFormat::FreeText,
            tool_catalog: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }
}

/// A complete query: an immutable conversation snapshot plus options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The conversation messages
    pub messages: Vec<Message>,

    #[serde(flatten)]
    pub options: QueryOptions,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
            usage: None,
        }
    }

    pub fn finished(usage: Option<Usage>) -> Self {
        Self {
            content: None,
            done: true,
            usage,
        }
    }
}

/// The receiving half of a provider stream.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// A fully assembled (non-streaming) reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The concatenation of every content delta
    pub content: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model was asked
    pub model: String,
}

/// The core Provider trait.
///
/// Every backend implements `stream()`; the agent never parses partial
/// output, it buffers deltas until the `done` chunk arrives.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "ollama", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a stream of response chunks.
    ///
    /// An `Err` here means the request itself failed; once a receiver is
    /// returned, failures arrive as a single `Err` item and nothing follows.
    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError>;

    /// Send a request and wait for the assembled reply.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let model = request.options.model.clone();
        let mut rx = self.stream(request).await?;
        let mut content = String::new();
        let mut usage = None;

        while let Some(item) = rx.recv().await {
            let chunk = item?;
            if let Some(delta) = chunk.content {
                content.push_str(&delta);
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        Ok(ProviderResponse {
            content,
            usage,
            model,
        })
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

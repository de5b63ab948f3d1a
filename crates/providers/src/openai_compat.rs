//! OpenAI-compatible streaming provider.
//!
//! Works with: Ollama (`/v1`), OpenAI, OpenRouter, vLLM, llama.cpp server,
//! and any other endpoint exposing `/v1/chat/completions` with SSE.
//!
//! Every reply is surfaced as text. When the model answers with native
//! function-calling deltas (which happens when a forced tool choice is
//! requested), those are accumulated and rendered into one final text delta
//! using the fenced `{"tool_calls":[...]}` form, so downstream extraction has
//! a single input format.

use async_trait::async_trait;
use futures::StreamExt;
use ferrocall_core::error::ProviderError;
use ferrocall_core::message::Message;
use ferrocall_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        // No overall request timeout: streamed replies can legitimately run
        // long. Connection setup is bounded instead.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Build the JSON body for a streaming chat completion.
    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let opts = &request.options;
        let mut body = serde_json::json!({
            "model": opts.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": opts.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(top_p) = opts.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        if let Some(max_tokens) = opts.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if opts.response_format == ResponseFormat::StructuredJson {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        if !opts.tool_catalog.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&opts.tool_catalog));
            body["tool_choice"] = match opts.tool_choice {
                ToolChoice::Auto => serde_json::json!("auto"),
                ToolChoice::Forced => serde_json::json!("required"),
            };
        }

        body
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.options.model,
            format = ?request.options.response_format,
            tool_choice = ?request.options.tool_choice,
            "Sending streaming request"
        );

        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward chunks in order
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in decoder.feed(&bytes) {
                    match event {
                        SseEvent::Chunk(chunk) => {
                            let done = chunk.done;
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                            if done {
                                return;
                            }
                        }
                        SseEvent::Unparsed { data, error } => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %error,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            for chunk in decoder.finish(None) {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- SSE decoding ---

/// Output of the SSE decoder.
#[derive(Debug)]
enum SseEvent {
    Chunk(StreamChunk),
    Unparsed { data: String, error: String },
}

/// Incremental SSE line decoder.
///
/// Bytes arrive in arbitrary slices; only complete `data:` lines are parsed.
#[derive(Default)]
struct SseDecoder {
    buffer: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.extend(self.finish(None).into_iter().map(SseEvent::Chunk));
                return events;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(resp) => {
                    if let Some(choice) = resp.choices.first() {
                        if let Some(ref tc_deltas) = choice.delta.tool_calls {
                            self.accumulate(tc_deltas);
                        }
                        if let Some(content) = choice.delta.content.as_ref().filter(|c| !c.is_empty()) {
                            events.push(SseEvent::Chunk(StreamChunk::delta(content.clone())));
                        }
                    }

                    // Usage arrives in the last chunk when include_usage is set
                    if let Some(usage) = resp.usage {
                        events.extend(self.finish(Some(Usage {
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                            total_tokens: usage.total_tokens,
                        })).into_iter().map(SseEvent::Chunk));
                        return events;
                    }
                }
                Err(e) => events.push(SseEvent::Unparsed {
                    data: data.to_string(),
                    error: e.to_string(),
                }),
            }
        }

        events
    }

    fn accumulate(&mut self, deltas: &[StreamToolCallDelta]) {
        for delta in deltas {
            let acc = self.tool_calls.entry(delta.index).or_default();
            if let Some(ref func) = delta.function {
                if let Some(ref name) = func.name {
                    acc.name = name.clone();
                }
                if let Some(ref args) = func.arguments {
                    acc.arguments.push_str(args);
                }
            }
        }
    }

    /// Emit the rendered native tool calls (if any) and the terminal chunk.
    fn finish(&mut self, usage: Option<Usage>) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut chunks = Vec::new();
        if let Some(text) = render_native_tool_calls(self.tool_calls.values()) {
            chunks.push(StreamChunk::delta(text));
        }
        chunks.push(StreamChunk::finished(usage));
        chunks
    }
}

/// Render accumulated native tool calls as a fenced `tool_calls` block.
fn render_native_tool_calls<'a>(
    calls: impl Iterator<Item = &'a ToolCallAccumulator>,
) -> Option<String> {
    let rendered: Vec<serde_json::Value> = calls
        .filter(|acc| !acc.name.is_empty())
        .map(|acc| {
            let parameters = serde_json::from_str::<serde_json::Value>(&acc.arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
            serde_json::json!({ "name": acc.name, "parameters": parameters })
        })
        .collect();

    if rendered.is_empty() {
        return None;
    }

    let body = serde_json::json!({ "tool_calls": rendered });
    Some(format!("\n```json\n{body}\n```\n"))
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    name: String,
    arguments: String,
}

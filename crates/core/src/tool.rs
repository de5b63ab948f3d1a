//! Tool trait and registry: the execution side of the tool protocol.
//!
//! Tools are registered once at startup into an explicit [`ToolRegistry`]
//! which is then shared (read-only) with the orchestration loop. The
//! registry's [`ToolRegistry::execute`] never fails: unknown names, tool
//! errors and panics all come back as [`ToolResult::Failure`].

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::ToolError;
use crate::event::{DomainEvent, EventBus};
use crate::provider::ToolDefinition;

/// A tool invocation recovered from model output, not yet checked against
/// the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallCandidate {
    /// Name of the tool to execute
    pub name: String,

    /// Untyped argument mapping
    pub arguments: Map<String, Value>,
}

impl ToolCallCandidate {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { data: Value },
    Failure { error: String },
}

impl ToolResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The `{success, data?, error?}` shape fed back to the model.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Success { data } => serde_json::json!({ "success": true, "data": data }),
            Self::Failure { error } => serde_json::json!({ "success": false, "error": error }),
        }
    }
}

/// One execution as reported to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub result: ToolResult,
    pub duration_ms: u64,
}

/// The core Tool trait.
///
/// Implementations report expected failures as `Err(ToolError)`; the
/// registry turns those into [`ToolResult::Failure`] values.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "listDir", "readFile").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Map<String, Value>) -> std::result::Result<Value, ToolError>;

    /// Convert this tool into a ToolDefinition for the prompt catalog.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The name → tool mapping.
///
/// Registration is last-write-wins. Executions are serialized through an
/// internal gate so two calls never overlap, even if the registry is shared.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    gate: tokio::sync::Mutex<()>,
    events: Option<Arc<EventBus>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            gate: tokio::sync::Mutex::new(()),
            events: None,
        }
    }

    /// Publish registration warnings and execution records on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Register a tool, replacing any existing tool with the same name.
    ///
    /// Returns `true` when an earlier definition was overwritten.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        let replaced = self.tools.insert(name.clone(), tool).is_some();
        if replaced {
            warn!(tool = %name, "Tool re-registered, previous definition replaced");
            self.publish(DomainEvent::ToolReplaced {
                name,
                timestamp: chrono::Utc::now(),
            });
        }
        replaced
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool definitions, sorted by name.
    pub fn list_all(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name. Never fails; see [`ToolResult`].
    pub async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> ToolResult {
        self.execute_recorded(name, arguments).await.result
    }

    /// Execute a tool and return the full execution record.
    pub async fn execute_recorded(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> ToolExecutionRecord {
        let _serial = self.gate.lock().await;
        let start = Instant::now();

        let result = match self.tools.get(name) {
            None => ToolResult::failure(ToolError::NotFound(name.to_string()).to_string()),
            Some(tool) => {
                let outcome = AssertUnwindSafe(tool.execute(arguments.clone()))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(data)) => ToolResult::Success { data },
                    Ok(Err(e)) => ToolResult::failure(e.to_string()),
                    Err(panic) => ToolResult::failure(
                        ToolError::Panicked {
                            tool_name: name.to_string(),
                            reason: panic_message(panic.as_ref()),
                        }
                        .to_string(),
                    ),
                }
            }
        };

        let record = ToolExecutionRecord {
            tool_name: name.to_string(),
            arguments: arguments.clone(),
            result,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        match &record.result {
            ToolResult::Success { .. } => info!(
                tool = %record.tool_name,
                duration_ms = record.duration_ms,
                "Tool executed"
            ),
            ToolResult::Failure { error } => warn!(
                tool = %record.tool_name,
                duration_ms = record.duration_ms,
                error = %error,
                "Tool failed"
            ),
        }
        self.publish(DomainEvent::ToolExecuted {
            record: record.clone(),
            timestamp: chrono::Utc::now(),
        });

        record
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A simple test tool for unit tests.
    struct EchoTool {
        description: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl EchoTool {
        fn new(description: &'static str) -> Self {
            Self {
                description,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            self.description
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match arguments.get("text").and_then(Value::as_str) {
                Some(text) => Ok(Value::String(text.to_string())),
                None => Err(ToolError::InvalidArguments("Missing 'text' argument".into())),
            }
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        async fn execute(&self, _arguments: Map<String, Value>) -> Result<Value, ToolError> {
            panic!("kaboom");
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(!registry.register(Arc::new(EchoTool::new("Echoes"))));
        assert!(registry.has("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn reregistration_is_last_write_wins() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let mut registry = ToolRegistry::new().with_event_bus(bus);

        registry.register(Arc::new(EchoTool::new("first")));
        assert!(registry.register(Arc::new(EchoTool::new("second"))));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_all()[0].description, "second");

        let mut warnings = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.as_ref(), DomainEvent::ToolReplaced { .. }) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn execute_success() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("Echoes")));

        let result = registry
            .execute("echo", &args(serde_json::json!({"text": "hello world"})))
            .await;
        assert_eq!(
            result,
            ToolResult::Success {
                data: Value::String("hello world".into())
            }
        );
    }

    #[tokio::test]
    async fn execute_missing_tool_is_failure() {
        let tool = Arc::new(EchoTool::new("Echoes"));
        let calls = tool.calls.clone();
        let mut registry = ToolRegistry::new();
        registry.register(tool);

        let result = registry.execute("doesNotExist", &Map::new()).await;
        match result {
            ToolResult::Failure { error } => {
                assert!(error.to_lowercase().contains("tool not found"))
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_error_becomes_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("Echoes")));

        let result = registry.execute("echo", &Map::new()).await;
        assert!(matches!(result, ToolResult::Failure { ref error } if error.contains("text")));
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanickingTool));

        let result = registry.execute("explode", &Map::new()).await;
        assert!(matches!(result, ToolResult::Failure { ref error } if error.contains("kaboom")));
    }

    #[tokio::test]
    async fn execution_records_are_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let mut registry = ToolRegistry::new().with_event_bus(bus);
        registry.register(Arc::new(EchoTool::new("Echoes")));

        registry
            .execute("echo", &args(serde_json::json!({"text": "hi"})))
            .await;
        registry.execute("missing", &Map::new()).await;

        let mut records = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::ToolExecuted { record, .. } = event.as_ref() {
                records.push(record.clone());
            }
        }
        assert_eq!(records.len(), 2);
        assert!(records[0].result.is_success());
        assert_eq!(records[1].tool_name, "missing");
        assert!(!records[1].result.is_success());
    }

    #[test]
    fn wire_format_shapes() {
        let ok = ToolResult::Success {
            data: serde_json::json!(["a.txt"]),
        };
        assert_eq!(ok.to_wire(), serde_json::json!({"success": true, "data": ["a.txt"]}));

        let err = ToolResult::failure("nope");
        assert_eq!(err.to_wire(), serde_json::json!({"success": false, "error": "nope"}));
    }
}

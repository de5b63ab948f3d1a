//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps provider deltas and loop activity into events a
//! renderer can consume without touching the orchestration logic.

use serde::{Deserialize, Serialize};

use crate::loop_runner::LoopState;

/// Events emitted by the orchestrator while a turn runs.
///
/// - `chunk`      : partial text from the model
/// - `tool_call`  : the agent is invoking a tool
/// - `tool_result`: tool execution completed
/// - `state`      : the loop changed state
/// - `done`       : the turn is complete
/// - `error`      : a query failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text from the model.
    Chunk { content: String },

    /// The agent is calling a tool.
    ToolCall {
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        name: String,
        output: serde_json::Value,
        success: bool,
        duration_ms: u64,
    },

    /// The loop moved to a new state.
    State { state: LoopState },

    /// The turn is complete.
    Done {
        conversation_id: String,
        tool_calls_made: usize,
        escalated: bool,
    },

    /// A model query failed.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::State { .. } => "state",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_call() {
        let event = AgentStreamEvent::ToolCall {
            name: "listDir".into(),
            input: serde_json::json!({"path": "."}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"listDir""#));
    }

    #[test]
    fn event_serialization_state() {
        let event = AgentStreamEvent::State {
            state: LoopState::ExecutingTool,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"state","state":"executing_tool"}"#);
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            conversation_id: "abc".into(),
            tool_calls_made: 2,
            escalated: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""tool_calls_made":2"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(AgentStreamEvent::Chunk { content: "x".into() }.event_type(), "chunk");
        assert_eq!(
            AgentStreamEvent::ToolResult {
                name: "b".into(),
                output: serde_json::Value::Null,
                success: true,
                duration_ms: 0,
            }
            .event_type(),
            "tool_result"
        );
        assert_eq!(
            AgentStreamEvent::State {
                state: LoopState::Querying
            }
            .event_type(),
            "state"
        );
        assert_eq!(AgentStreamEvent::Error { message: "x".into() }.event_type(), "error");
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"chunk","content":"hi"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::Chunk { content } => assert_eq!(content, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}

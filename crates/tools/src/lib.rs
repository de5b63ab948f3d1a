//! Built-in filesystem tools for ferrocall.
//!
//! Tools give the agent the ability to inspect and change the workspace:
//! list directories, read and write files, create directories. Every path
//! goes through a [`PathPolicy`] before any I/O happens.

pub mod create_dir;
pub mod list_dir;
pub mod policy;
pub mod read_file;
pub mod write_file;

use std::sync::Arc;

use ferrocall_core::error::ToolError;
use ferrocall_core::event::EventBus;
use ferrocall_core::tool::ToolRegistry;
use serde_json::{Map, Value};

pub use create_dir::CreateDirTool;
pub use list_dir::ListDirTool;
pub use policy::{PathPolicy, PathViolation};
pub use read_file::ReadFileTool;
pub use write_file::WriteFileTool;

/// Create a registry holding every built-in tool.
///
/// The list is fixed at compile time; there is no runtime discovery.
pub fn default_registry(policy: PathPolicy, events: Option<Arc<EventBus>>) -> ToolRegistry {
    let policy = Arc::new(policy);
    let mut registry = ToolRegistry::new();
    if let Some(bus) = events {
        registry = registry.with_event_bus(bus);
    }

    registry.register(Arc::new(ListDirTool::new(policy.clone())));
    registry.register(Arc::new(ReadFileTool::new(policy.clone())));
    registry.register(Arc::new(WriteFileTool::new(policy.clone())));
    registry.register(Arc::new(CreateDirTool::new(policy)));
    registry
}

/// Fetch a required string argument.
pub(crate) fn string_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

pub(crate) fn denied(tool_name: &str, violation: PathViolation) -> ToolError {
    ToolError::PermissionDenied {
        tool_name: tool_name.into(),
        reason: violation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_tools() {
        let dir = tempfile::tempdir().unwrap();
        let registry = default_registry(PathPolicy::new(dir.path()), None);
        assert_eq!(registry.names(), ["createDir", "listDir", "readFile", "writeFile"]);
    }

    #[tokio::test]
    async fn registry_round_trips_through_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let registry = default_registry(PathPolicy::new(dir.path()), None);

        let mut args = Map::new();
        args.insert("path".into(), "notes/todo.md".into());
        args.insert("content".into(), "- ship it".into());
        assert!(registry.execute("writeFile", &args).await.is_success());

        args.remove("content");
        match registry.execute("readFile", &args).await {
            ferrocall_core::ToolResult::Success { data } => assert_eq!(data["content"], "- ship it"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn policy_violation_becomes_failure_result() {
        let dir = tempfile::tempdir().unwrap();
        let registry = default_registry(PathPolicy::new(dir.path()), None);

        let mut args = Map::new();
        args.insert("path".into(), "../outside".into());
        match registry.execute("listDir", &args).await {
            ferrocall_core::ToolResult::Failure { error } => assert!(error.contains("traversal")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

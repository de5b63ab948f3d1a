//! listDir: enumerate a directory's entries.

use std::sync::Arc;

use async_trait::async_trait;
use ferrocall_core::error::ToolError;
use ferrocall_core::tool::Tool;
use serde_json::{Map, Value, json};

use crate::policy::PathPolicy;
use crate::{denied, string_arg};

pub struct ListDirTool {
    policy: Arc<PathPolicy>,
}

impl ListDirTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "listDir"
    }

    fn description(&self) -> &str {
        "List the files and directories inside a directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the workspace (use \".\" for the workspace itself)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let raw = string_arg(&arguments, "path")?;
        let path = self.policy.resolve(raw).map_err(|e| denied(self.name(), e))?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Failed to list '{raw}': {e}"),
            })?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?
        {
            let file_type = entry.file_type().await.ok();
            let kind = match file_type {
                Some(t) if t.is_dir() => "directory",
                Some(t) if t.is_symlink() => "symlink",
                Some(_) => "file",
                None => "unknown",
            };
            let size = match kind {
                "file" => entry.metadata().await.ok().map(|m| m.len()),
                _ => None,
            };
            entries.push((entry.file_name().to_string_lossy().into_owned(), kind, size));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let entries: Vec<Value> = entries
            .into_iter()
            .map(|(name, kind, size)| {
                let mut v = json!({ "name": name, "type": kind });
                if let Some(size) = size {
                    v["size"] = json!(size);
                }
                v
            })
            .collect();

        Ok(json!({ "path": raw, "entries": entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(path: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("path".into(), json!(path));
        map
    }

    #[tokio::test]
    async fn lists_sorted_entries_with_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("a_dir")).unwrap();

        let tool = ListDirTool::new(Arc::new(PathPolicy::new(dir.path())));
        let out = tool.execute(args(".")).await.unwrap();

        let entries = out["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "a_dir");
        assert_eq!(entries[0]["type"], "directory");
        assert_eq!(entries[1]["name"], "b.txt");
        assert_eq!(entries[1]["size"], 5);
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ListDirTool::new(Arc::new(PathPolicy::new(dir.path())));
        let err = tool.execute(args("nope")).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn traversal_denied() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ListDirTool::new(Arc::new(PathPolicy::new(dir.path())));
        let err = tool.execute(args("..")).await.unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }
}

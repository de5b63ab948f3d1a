//! readFile: read a UTF-8 text file.

use std::sync::Arc;

use async_trait::async_trait;
use ferrocall_core::error::ToolError;
use ferrocall_core::tool::Tool;
use serde_json::{Map, Value, json};

use crate::policy::PathPolicy;
use crate::{denied, string_arg};

/// Files above this size are refused rather than streamed into the context.
const MAX_READ_BYTES: u64 = 1024 * 1024;

pub struct ReadFileTool {
    policy: Arc<PathPolicy>,
}

impl ReadFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "readFile"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file at the given path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let raw = string_arg(&arguments, "path")?;
        let path = self.policy.resolve(raw).map_err(|e| denied(self.name(), e))?;

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "readFile".into(),
            reason,
        };

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| failed(format!("Failed to read file '{raw}': {e}")))?;
        if metadata.is_dir() {
            return Err(failed(format!("'{raw}' is a directory")));
        }
        if metadata.len() > MAX_READ_BYTES {
            return Err(failed(format!(
                "'{raw}' is {} bytes, larger than the {MAX_READ_BYTES} byte limit",
                metadata.len()
            )));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| failed(format!("Failed to read file '{raw}': {e}")))?;

        Ok(json!({
            "path": raw,
            "bytes": content.len(),
            "content": content,
        }))
    }
}

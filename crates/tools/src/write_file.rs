//! writeFile: create or overwrite a text file.

use std::sync::Arc;

use async_trait::async_trait;
use ferrocall_core::error::ToolError;
use ferrocall_core::tool::Tool;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::policy::PathPolicy;
use crate::{denied, string_arg};

pub struct WriteFileTool {
    policy: Arc<PathPolicy>,
}

impl WriteFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "writeFile"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file (and parent directories) if it doesn't exist, overwrites if it does."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let raw = string_arg(&arguments, "path")?;
        let content = string_arg(&arguments, "content")?;
        let path = self.policy.resolve(raw).map_err(|e| denied(self.name(), e))?;

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "writeFile".into(),
            reason,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("Failed to create parent directory: {e}")))?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| failed(format!("Failed to write file '{raw}': {e}")))?;

        debug!(path = %path.display(), bytes = content.len(), "File written");
        Ok(json!({ "path": raw, "bytesWritten": content.len() }))
    }
}

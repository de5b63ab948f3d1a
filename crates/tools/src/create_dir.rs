//! createDir: create a directory and any missing parents.

use std::sync::Arc;

use async_trait::async_trait;
use ferrocall_core::error::ToolError;
use ferrocall_core::tool::Tool;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::policy::PathPolicy;
use crate::{denied, string_arg};

pub struct CreateDirTool {
    policy: Arc<PathPolicy>,
}

impl CreateDirTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for CreateDirTool {
    fn name(&self) -> &str {
        "createDir"
    }

    fn description(&self) -> &str {
        "Create a directory, including missing parent directories."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory to create"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let raw = string_arg(&arguments, "path")?;
        let path = self.policy.resolve(raw).map_err(|e| denied(self.name(), e))?;

        let existed = path.is_dir();
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Failed to create directory '{raw}': {e}"),
            })?;

        debug!(path = %path.display(), created = !existed, "Directory ensured");
        Ok(json!({ "path": raw, "created": !existed }))
    }
}

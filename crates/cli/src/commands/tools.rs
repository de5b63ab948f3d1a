//! `ferrocall tools`: List the tool catalog offered to the model.

use ferrocall_config::AppConfig;
use ferrocall_core::provider::ToolDefinition;
use ferrocall_tools::{PathPolicy, default_registry};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let policy = PathPolicy::from_config(&config.tools);
    let workspace = policy.workspace_root().display().to_string();
    let registry = default_registry(policy, None);

    println!("Tools ({}), workspace {workspace}:", registry.len());
    println!();
    for def in registry.list_all() {
        println!("  {}", describe(&def));
        println!("      {}", def.description);
    }
    Ok(())
}

/// `name(required, optional?)` from a tool's parameter schema.
fn describe(def: &ToolDefinition) -> String {
    let required: Vec<&str> = def.parameters["required"]
        .as_array()
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let params: Vec<String> = def.parameters["properties"]
        .as_object()
        .map(|props| {
            props
                .keys()
                .map(|k| {
                    if required.contains(&k.as_str()) {
                        k.clone()
                    } else {
                        format!("{k}?")
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    format!("{}({})", def.name, params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn describe_marks_optional_params() {
        let def = ToolDefinition {
            name: "writeFile".into(),
            description: "Write a file".into(),
            parameters: json!({
                "type": "object",
                "properties": {"content": {"type": "string"}, "path": {"type": "string"}, "mode": {"type": "string"}},
                "required": ["path", "content"]
            }),
        };
        assert_eq!(describe(&def), "writeFile(content, mode?, path)");
    }

    #[test]
    fn describe_without_schema() {
        let def = ToolDefinition {
            name: "noop".into(),
            description: String::new(),
            parameters: json!({}),
        };
        assert_eq!(describe(&def), "noop()");
    }
}

//! Prompt construction: the free-text system preamble and the narrowed
//! prompt used by the directed retry.

use ferrocall_core::provider::ToolDefinition;

/// The system message placed at the head of every conversation.
///
/// Lists each tool with its schema and spells out the accepted call format.
pub fn system_preamble(base: &str, tools: &[ToolDefinition]) -> String {
    let mut prompt = base.trim().to_string();
    if tools.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\n## Tools\n\nYou can call these tools:\n");
    for tool in tools {
        prompt.push_str(&format!(
            "\n- `{}`: {}\n  parameters: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }

    prompt.push_str(
        "\nTo call a tool, reply with a fenced json block in exactly this form:\n\n\
         ```json\n\
         {\"tool_calls\": [{\"name\": \"<tool name>\", \"parameters\": {\"<arg>\": \"<value>\"}}]}\n\
         ```\n\n\
         Use double quotes. You will receive the result in a message starting with \
         \"Tool Result\" or \"Tool Error\"; continue from there. \
         If no tool is needed, answer normally without a json block.",
    );
    prompt
}

/// The system message for the directed (forced, structured) retry.
pub fn directed_prompt(tools: &[ToolDefinition]) -> String {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    let mut prompt = String::from(
        "The previous reply did not call a tool, but this request needs one. \
         Respond with a single JSON object and nothing else, of the form \
         {\"tool_calls\": [{\"name\": \"<tool name>\", \"parameters\": {...}}]}.\n",
    );
    prompt.push_str(&format!("Valid tool names: {}.\n", names.join(", ")));
    for tool in tools {
        prompt.push_str(&format!("- {} parameters: {}\n", tool.name, tool.parameters));
    }
    prompt
}

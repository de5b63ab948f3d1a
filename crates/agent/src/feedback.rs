//! The messages that carry tool activity back into the conversation.

use ferrocall_core::message::Message;
use ferrocall_core::tool::{ToolCallCandidate, ToolExecutionRecord, ToolResult};

/// Appended after truncated payloads.
pub const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// How much shorter than the limit a truncated payload is cut.
const TRUNCATION_MARGIN: usize = 10;

/// Prefix of a successful result message; the tool name goes in parens.
pub const RESULT_PREFIX: &str = "Tool Result";

pub const ERROR_PREFIX: &str = "Tool Error:";

/// The assistant's short note that it is invoking a tool.
pub fn acknowledgment(call: &ToolCallCandidate) -> Message {
    let args = serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".into());
    Message::assistant(format!("Calling tool: {} with arguments {args}", call.name))
}

/// The user-role message reporting an execution back to the model.
///
/// Success: `Tool Result (<name>): {"success":true,"data":...}`.
/// Failure: `Tool Error: <message>`.
pub fn result_message(record: &ToolExecutionRecord, limit: usize) -> Message {
    let content = match &record.result {
        ToolResult::Success { .. } => {
            let wire = record.result.to_wire().to_string();
            format!("{RESULT_PREFIX} ({}): {}", record.tool_name, truncate(&wire, limit))
        }
        ToolResult::Failure { error } => format!("{ERROR_PREFIX} {}", truncate(error, limit)),
    };
    Message::user(content)
}

/// Cut `text` to `limit - 10` chars plus [`TRUNCATION_SUFFIX`] when it is
/// longer than `limit` chars.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(TRUNCATION_MARGIN);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Shown in place of a reply when a turn could not be completed.
pub fn gateway_failure(error: &impl std::fmt::Display) -> Message {
    Message::assistant(format!(
        "Sorry, I couldn't get a response from the model ({error}). \
         Your conversation is intact; please try again."
    ))
}

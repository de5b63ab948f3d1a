//! The orchestration loop.
//!
//! One [`Orchestrator`] owns one conversation and runs one turn at a time:
//! query the model, extract tool calls from the assembled reply, execute
//! them strictly in order, feed each result back and ask for a follow-up,
//! until a reply asks for nothing more. Every failure is caught here; a
//! turn always ends back in [`LoopState::AwaitingUserInput`].

use std::collections::VecDeque;
use std::sync::Arc;

use ferrocall_config::AppConfig;
use ferrocall_core::error::ProviderError;
use ferrocall_core::event::{DomainEvent, EventBus};
use ferrocall_core::message::{Conversation, Message, Role};
use ferrocall_core::provider::{Provider, QueryOptions, ResponseFormat, ToolChoice};
use ferrocall_core::tool::{ToolCallCandidate, ToolExecutionRecord, ToolRegistry};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::extractor::Extractor;
use crate::feedback;
use crate::gateway::QueryGateway;
use crate::prompt;
use crate::stream_event::AgentStreamEvent;

/// Where the loop is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingUserInput,
    Querying,
    ExtractingCalls,
    ExecutingTool,
    AwaitingFollowUp,
    TurnFailed,
}

/// Query and budget settings for the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Temperature of the directed retry; should be below `temperature`
    pub escalation_temperature: f32,
    pub max_tool_calls_per_turn: usize,
    pub result_preview_chars: usize,
}

impl LoopSettings {
    pub fn new(model: impl Into<String>) -> Self {
        let agent = ferrocall_config::AgentSettings::default();
        Self {
            model: model.into(),
            system_prompt: agent.system_prompt,
            temperature: 0.2,
            top_p: None,
            max_tokens: None,
            escalation_temperature: agent.escalation_temperature,
            max_tool_calls_per_turn: agent.max_tool_calls_per_turn,
            result_preview_chars: agent.result_preview_chars,
        }
    }

    pub fn from_config(config: &AppConfig, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: config.agent.system_prompt.clone(),
            temperature: config.default_temperature,
            top_p: Some(config.top_p),
            max_tokens: Some(config.default_max_tokens),
            escalation_temperature: config.agent.escalation_temperature,
            max_tool_calls_per_turn: config.agent.max_tool_calls_per_turn,
            result_preview_chars: config.agent.result_preview_chars,
        }
    }
}

/// What happened during one user turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// The last assistant message appended during the turn
    pub reply: String,
    /// Every tool execution, in execution order
    pub executions: Vec<ToolExecutionRecord>,
    /// Whether the directed retry was issued
    pub escalated: bool,
    /// Whether the turn ended on a gateway failure
    pub failed: bool,
    /// Whether tool calls were left unexecuted because of the per-turn cap
    pub budget_exhausted: bool,
}

/// Drives one conversation.
pub struct Orchestrator {
    gateway: QueryGateway,
    registry: Arc<ToolRegistry>,
    extractor: Extractor,
    conversation: Conversation,
    settings: LoopSettings,
    state: LoopState,
    event_bus: Option<Arc<EventBus>>,
    stream_tx: Option<mpsc::UnboundedSender<AgentStreamEvent>>,
    completed_turns: u64,
}

impl Orchestrator {
    /// Create an orchestrator with a fresh conversation whose system
    /// message describes every tool in `registry`.
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>, settings: LoopSettings) -> Self {
        let preamble = prompt::system_preamble(&settings.system_prompt, &registry.list_all());
        Self {
            gateway: QueryGateway::new(provider),
            registry,
            extractor: Extractor::default(),
            conversation: Conversation::with_system(preamble),
            settings,
            state: LoopState::AwaitingUserInput,
            event_bus: None,
            stream_tx: None,
            completed_turns: 0,
        }
    }

    /// Publish response and error events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Forward deltas and loop activity to a renderer.
    pub fn with_stream_sender(mut self, tx: mpsc::UnboundedSender<AgentStreamEvent>) -> Self {
        self.stream_tx = Some(tx);
        self
    }

    /// Replace the default strategy pipeline.
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Number of turns that ran to completion, i.e. how many `Done` events
    /// have been emitted. Abandoned turns and blank input do not count.
    pub fn completed_turns(&self) -> u64 {
        self.completed_turns
    }

    /// Drop everything but the leading system message.
    pub fn clear(&mut self) {
        self.conversation.reset();
        info!(conversation_id = %self.conversation.id, "Conversation cleared");
    }

    /// Recover after a turn future was dropped mid-flight (user interrupt).
    pub fn abandon_turn(&mut self) {
        if self.state == LoopState::AwaitingUserInput {
            return;
        }
        warn!(state = ?self.state, "Turn abandoned before completion");
        self.conversation
            .push(Message::assistant("(turn interrupted before completion)"));
        self.transition(LoopState::AwaitingUserInput);
    }

    /// Run one user turn to completion.
    ///
    /// With `expect_tool`, a reply without any tool call triggers the single
    /// directed retry.
    pub async fn run_turn(&mut self, input: &str, expect_tool: bool) -> TurnOutcome {
        if input.trim().is_empty() {
            warn!("Ignoring blank user input");
            return TurnOutcome::default();
        }

        info!(
            conversation_id = %self.conversation.id,
            messages = self.conversation.len(),
            expect_tool,
            "Processing user turn"
        );

        self.conversation.push(Message::user(input));
        let mut outcome = TurnOutcome::default();

        self.transition(LoopState::Querying);
        let first = self
            .query(self.conversation.snapshot(), self.free_text_options(), false)
            .await;

        let candidates = match first {
            Ok(text) => {
                self.transition(LoopState::ExtractingCalls);
                let candidates = self.extractor.extract(&text);
                if !candidates.is_empty() {
                    candidates
                } else if !expect_tool {
                    return self.finish_with_text(text, outcome);
                } else {
                    info!("Expected a tool call but found none, issuing directed query");
                    match self.escalate(&mut outcome).await {
                        Ok((_, directed)) if !directed.is_empty() => directed,
                        Ok(_) => {
                            warn!("Directed query produced no tool call either");
                            return self.finish_with_text(text, outcome);
                        }
                        Err(e) => {
                            warn!(error = %e, "Directed query failed");
                            return self.finish_with_text(text, outcome);
                        }
                    }
                }
            }
            Err(first_error) => {
                warn!(error = %first_error, "Free-text query failed, issuing directed query");
                match self.escalate(&mut outcome).await {
                    Ok((_, directed)) if !directed.is_empty() => directed,
                    Ok((text, _)) if !text.trim().is_empty() => {
                        return self.finish_with_text(text, outcome);
                    }
                    Ok(_) => return self.fail_turn(&first_error, outcome),
                    Err(e) => return self.fail_turn(&e, outcome),
                }
            }
        };

        self.process_calls(candidates, outcome).await
    }

    /// Execute queued calls one at a time, re-querying after each.
    async fn process_calls(
        &mut self,
        candidates: Vec<ToolCallCandidate>,
        mut outcome: TurnOutcome,
    ) -> TurnOutcome {
        let budget = self.settings.max_tool_calls_per_turn;
        let mut queue: VecDeque<ToolCallCandidate> = candidates.into();

        while let Some(call) = queue.pop_front() {
            if outcome.executions.len() >= budget {
                warn!(
                    budget,
                    skipped = queue.len() + 1,
                    "Tool call budget for this turn exhausted"
                );
                outcome.budget_exhausted = true;
                break;
            }

            self.transition(LoopState::ExecutingTool);
            let record = self.execute(&call).await;
            outcome.executions.push(record);

            self.transition(LoopState::AwaitingFollowUp);
            self.transition(LoopState::Querying);
            match self
                .query(self.conversation.snapshot(), self.free_text_options(), false)
                .await
            {
                Ok(text) => {
                    self.transition(LoopState::ExtractingCalls);
                    let more = self.extractor.extract(&text);
                    if !more.is_empty() {
                        debug!(count = more.len(), "Follow-up requested further tool calls");
                    }
                    queue.extend(more);
                    outcome.reply = self.append_reply(text);
                }
                Err(e) => return self.fail_turn(&e, outcome),
            }
        }

        self.complete_turn(outcome)
    }

    /// Issue the single directed query for this turn.
    async fn escalate(
        &mut self,
        outcome: &mut TurnOutcome,
    ) -> Result<(String, Vec<ToolCallCandidate>), ProviderError> {
        outcome.escalated = true;
        self.transition(LoopState::Querying);

        let catalog = self.registry.list_all();
        let mut messages = vec![Message::system(prompt::directed_prompt(&catalog))];
        messages.extend(
            self.conversation
                .messages()
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );

        let mut options = self.free_text_options();
        options.temperature = self.settings.escalation_temperature;
        options.response_format = ResponseFormat::StructuredJson;
        options.tool_choice = ToolChoice::Forced;
        options.tool_catalog = catalog;

        let text = self.query(messages, options, true).await?;
        self.transition(LoopState::ExtractingCalls);
        let candidates = self.extractor.extract(&text);
        Ok((text, candidates))
    }

    async fn execute(&mut self, call: &ToolCallCandidate) -> ToolExecutionRecord {
        self.emit(AgentStreamEvent::ToolCall {
            name: call.name.clone(),
            input: serde_json::Value::Object(call.arguments.clone()),
        });
        self.conversation.push(feedback::acknowledgment(call));

        let record = self
            .registry
            .execute_recorded(&call.name, &call.arguments)
            .await;

        self.emit(AgentStreamEvent::ToolResult {
            name: record.tool_name.clone(),
            output: record.result.to_wire(),
            success: record.result.is_success(),
            duration_ms: record.duration_ms,
        });
        self.conversation.push(feedback::result_message(
            &record,
            self.settings.result_preview_chars,
        ));
        record
    }

    /// Run one query to completion, forwarding deltas as they arrive.
    async fn query(
        &self,
        messages: Vec<Message>,
        options: QueryOptions,
        directed: bool,
    ) -> Result<String, ProviderError> {
        let model = options.model.clone();
        let mut stream = match self.gateway.query(messages, options).await {
            Ok(stream) => stream,
            Err(e) => {
                self.report_error(&e, directed);
                return Err(e);
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => self.emit(AgentStreamEvent::Chunk { content: delta }),
                Err(e) => {
                    self.report_error(&e, directed);
                    return Err(e);
                }
            }
        }

        let text = stream.assembled().to_string();
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ResponseGenerated {
                conversation_id: self.conversation.id.to_string(),
                model,
                chars: text.chars().count(),
                directed,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(text)
    }

    fn free_text_options(&self) -> QueryOptions {
        QueryOptions {
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_tokens,
            response_format: ResponseFormat::FreeText,
            tool_catalog: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }

    fn append_reply(&mut self, text: String) -> String {
        let text = if text.trim().is_empty() {
            "(the model returned an empty response)".to_string()
        } else {
            text
        };
        self.conversation.push(Message::assistant(text.clone()));
        text
    }

    fn finish_with_text(&mut self, text: String, mut outcome: TurnOutcome) -> TurnOutcome {
        outcome.reply = self.append_reply(text);
        self.complete_turn(outcome)
    }

    fn fail_turn(&mut self, error: &ProviderError, mut outcome: TurnOutcome) -> TurnOutcome {
        self.transition(LoopState::TurnFailed);
        let message = feedback::gateway_failure(error);
        outcome.reply = message.content.clone();
        outcome.failed = true;
        self.conversation.push(message);
        self.complete_turn(outcome)
    }

    fn complete_turn(&mut self, outcome: TurnOutcome) -> TurnOutcome {
        self.transition(LoopState::AwaitingUserInput);
        self.completed_turns += 1;
        info!(
            conversation_id = %self.conversation.id,
            tool_calls = outcome.executions.len(),
            escalated = outcome.escalated,
            failed = outcome.failed,
            "Turn complete"
        );
        self.emit(AgentStreamEvent::Done {
            conversation_id: self.conversation.id.to_string(),
            tool_calls_made: outcome.executions.len(),
            escalated: outcome.escalated,
        });
        outcome
    }

    fn report_error(&self, error: &ProviderError, directed: bool) {
        self.emit(AgentStreamEvent::Error {
            message: error.to_string(),
        });
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ErrorOccurred {
                context: if directed { "directed query" } else { "model query" }.into(),
                error_message: error.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "Loop state transition");
        self.state = next;
        self.emit(AgentStreamEvent::State { state: next });
    }

    fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.stream_tx {
            // Renderer gone is fine
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Script, ScriptedProvider};
    use async_trait::async_trait;
    use ferrocall_core::error::ToolError;
    use ferrocall_core::tool::{Tool, ToolResult};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;

    // ── Test tools ──

    struct RecordingTool {
        name: &'static str,
        calls: Arc<Mutex<Vec<Map<String, Value>>>>,
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Records its arguments"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"path": {"type": "string"}}})
        }
        async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
            self.calls.lock().unwrap().push(arguments);
            Ok(json!({"entries": ["Cargo.toml", "src"]}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "readFile"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Map<String, Value>) -> Result<Value, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "readFile".into(),
                reason: "disk on fire".into(),
            })
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        provider: Arc<ScriptedProvider>,
        calls: Arc<Mutex<Vec<Map<String, Value>>>>,
    }

    fn harness(scripts: Vec<Script>) -> Harness {
        harness_with(scripts, LoopSettings::new("mock-model"))
    }

    fn harness_with(scripts: Vec<Script>, settings: LoopSettings) -> Harness {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(RecordingTool {
            name: "listDir",
            calls: calls.clone(),
        }));
        registry.register(Arc::new(FailingTool));

        let provider = Arc::new(ScriptedProvider::new(scripts));
        let orchestrator = Orchestrator::new(provider.clone(), Arc::new(registry), settings);
        Harness {
            orchestrator,
            provider,
            calls,
        }
    }

    const LIST_CALL: &str =
        "Let me check.\n```json\n{\"tool_calls\":[{\"name\":\"listDir\",\"parameters\":{\"path\":\".\"}}]}\n```";

    fn roles(conv: &Conversation) -> Vec<Role> {
        conv.messages().iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn simple_text_response() {
        let mut h = harness(vec![Script::reply(["Hello! ", "How can I help?"])]);

        let outcome = h.orchestrator.run_turn("Hello!", false).await;

        assert_eq!(outcome.reply, "Hello! How can I help?");
        assert!(outcome.executions.is_empty());
        assert!(!outcome.escalated);
        // System + User + Assistant = 3 messages
        assert_eq!(
            roles(h.orchestrator.conversation()),
            [Role::System, Role::User, Role::Assistant]
        );
        assert_eq!(h.orchestrator.state(), LoopState::AwaitingUserInput);
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn system_message_carries_tool_catalog() {
        let h = harness(vec![]);
        let system = &h.orchestrator.conversation().messages()[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("`listDir`"));
        assert!(system.content.contains("`readFile`"));
    }

    #[tokio::test]
    async fn tool_call_then_follow_up() {
        let mut h = harness(vec![
            Script::text(LIST_CALL),
            Script::text("The directory has Cargo.toml and src."),
        ]);

        let outcome = h.orchestrator.run_turn("what's in the current directory?", false).await;

        assert_eq!(outcome.executions.len(), 1);
        assert!(outcome.executions[0].result.is_success());
        assert_eq!(outcome.reply, "The directory has Cargo.toml and src.");
        assert_eq!(h.calls.lock().unwrap()[0]["path"], ".");

        let messages = h.orchestrator.conversation().messages();
        assert_eq!(
            roles(h.orchestrator.conversation()),
            [Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert!(messages[2].content.starts_with("Calling tool: listDir"));
        assert!(messages[3].content.starts_with("Tool Result (listDir): "));

        // The follow-up query saw the tool result
        let requests = h.provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(
            requests[1]
                .messages
                .iter()
                .any(|m| m.content.starts_with("Tool Result (listDir)"))
        );
    }

    #[tokio::test]
    async fn tool_failure_fed_back_and_model_re_queried() {
        let mut h = harness(vec![
            Script::text("```json\n{\"tool_calls\":[{\"name\":\"readFile\",\"parameters\":{\"path\":\"x\"}}]}\n```"),
            Script::text("I could not read that file."),
        ]);

        let outcome = h.orchestrator.run_turn("read x", false).await;

        assert!(!outcome.failed);
        assert!(!outcome.executions[0].result.is_success());
        let messages = h.orchestrator.conversation().messages();
        assert!(messages[3].content.starts_with("Tool Error: "));
        assert!(messages[3].content.contains("disk on fire"));
        assert_eq!(h.provider.call_count(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_reported_as_tool_error() {
        let mut h = harness(vec![
            Script::text("```json\n{\"tool_calls\":[{\"name\":\"deleteEverything\",\"parameters\":{}}]}\n```"),
            Script::text("That tool does not exist, sorry."),
        ]);

        let outcome = h.orchestrator.run_turn("clean up", false).await;

        match &outcome.executions[0].result {
            ToolResult::Failure { error } => assert!(error.contains("Tool not found")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_escalation_without_expectation() {
        let mut h = harness(vec![Script::text("I think it's fine.")]);
        let outcome = h.orchestrator.run_turn("list files", false).await;
        assert!(!outcome.escalated);
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn escalation_issues_directed_structured_query() {
        let mut h = harness(vec![
            Script::text("Sure, I can do that."),
            Script::text("{\"tool_calls\":[{\"name\":\"listDir\",\"parameters\":{\"path\":\"src\"}}]}"),
            Script::text("src contains two entries."),
        ]);

        let outcome = h.orchestrator.run_turn("list src", true).await;

        assert!(outcome.escalated);
        assert_eq!(outcome.executions.len(), 1);
        assert_eq!(h.calls.lock().unwrap()[0]["path"], "src");

        let requests = h.provider.requests();
        let free = &requests[0].options;
        let directed = &requests[1].options;
        assert_eq!(free.response_format, ResponseFormat::FreeText);
        assert_eq!(directed.response_format, ResponseFormat::StructuredJson);
        assert_eq!(directed.tool_choice, ToolChoice::Forced);
        assert_eq!(directed.tool_catalog.len(), 2);
        assert!(directed.temperature < free.temperature);

        // Narrowed prompt replaces the system message and is not persisted
        assert!(requests[1].messages[0].content.contains("single JSON object"));
        assert_eq!(
            requests[1].messages.iter().filter(|m| m.role == Role::System).count(),
            1
        );
        assert!(
            !h.orchestrator
                .conversation()
                .messages()
                .iter()
                .any(|m| m.content.contains("single JSON object"))
        );
    }

    #[tokio::test]
    async fn escalation_happens_at_most_once() {
        let mut h = harness(vec![
            Script::text("Here is my answer without tools."),
            Script::text("still no tools"),
        ]);

        let outcome = h.orchestrator.run_turn("list files", true).await;

        assert!(outcome.escalated);
        assert_eq!(h.provider.call_count(), 2);
        assert_eq!(outcome.reply, "Here is my answer without tools.");
        assert_eq!(h.orchestrator.state(), LoopState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn query_failure_escalates_then_fails_turn() {
        let mut h = harness(vec![
            Script::Fail(ProviderError::Network("connection refused".into())),
            Script::Fail(ProviderError::Network("connection refused".into())),
            Script::text("Back online."),
        ]);

        let outcome = h.orchestrator.run_turn("hello", false).await;

        assert!(outcome.failed);
        assert!(outcome.escalated);
        assert!(outcome.reply.contains("connection refused"));
        assert_eq!(
            roles(h.orchestrator.conversation()),
            [Role::System, Role::User, Role::Assistant]
        );
        assert_eq!(h.orchestrator.state(), LoopState::AwaitingUserInput);

        // Session continues
        let next = h.orchestrator.run_turn("hello again", false).await;
        assert_eq!(next.reply, "Back online.");
        assert_eq!(h.orchestrator.conversation().len(), 5);
    }

    #[tokio::test]
    async fn broken_stream_does_not_append_partial_text() {
        let mut h = harness(vec![
            Script::broken(["partial answ"], ProviderError::StreamInterrupted("reset".into())),
            Script::text("Recovered answer."),
        ]);

        let outcome = h.orchestrator.run_turn("hi", false).await;

        assert!(outcome.escalated);
        assert_eq!(outcome.reply, "Recovered answer.");
        assert!(
            !h.orchestrator
                .conversation()
                .messages()
                .iter()
                .any(|m| m.content.contains("partial answ"))
        );
    }

    #[tokio::test]
    async fn follow_up_failure_keeps_executed_results() {
        let mut h = harness(vec![
            Script::text(LIST_CALL),
            Script::Fail(ProviderError::Timeout("30s".into())),
        ]);

        let outcome = h.orchestrator.run_turn("list", false).await;

        assert!(outcome.failed);
        assert_eq!(outcome.executions.len(), 1);
        let messages = h.orchestrator.conversation().messages();
        assert!(messages[3].content.starts_with("Tool Result (listDir)"));
        assert!(messages[4].content.contains("Sorry"));
        assert_eq!(h.orchestrator.state(), LoopState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn follow_up_calls_are_queued_in_order() {
        let mut h = harness(vec![
            Script::text(LIST_CALL),
            Script::text("Now src: {\"name\": \"listDir\", \"params\": {\"path\": \"src\"}}"),
            Script::text("Done."),
        ]);

        let outcome = h.orchestrator.run_turn("explore", false).await;

        assert_eq!(outcome.executions.len(), 2);
        let calls = h.calls.lock().unwrap();
        assert_eq!(calls[0]["path"], ".");
        assert_eq!(calls[1]["path"], "src");
        assert_eq!(outcome.reply, "Done.");
    }

    #[tokio::test]
    async fn tool_budget_bounds_the_turn() {
        let mut settings = LoopSettings::new("mock-model");
        settings.max_tool_calls_per_turn = 2;
        let mut h = harness_with(
            vec![
                Script::text(LIST_CALL),
                Script::text(LIST_CALL),
                Script::text(LIST_CALL),
            ],
            settings,
        );

        let outcome = h.orchestrator.run_turn("loop forever", false).await;

        assert_eq!(outcome.executions.len(), 2);
        assert!(outcome.budget_exhausted);
        assert_eq!(h.provider.call_count(), 3);
        assert_eq!(h.orchestrator.state(), LoopState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn stream_events_follow_the_turn() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut h = harness(vec![Script::text(LIST_CALL), Script::reply(["Two ", "entries."])]);
        h.orchestrator = h.orchestrator.with_stream_sender(tx);

        h.orchestrator.run_turn("list", false).await;

        let mut states = Vec::new();
        let mut chunks = String::new();
        let mut saw_tool_result = false;
        let mut done = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentStreamEvent::State { state } => states.push(state),
                AgentStreamEvent::Chunk { content } => chunks.push_str(&content),
                AgentStreamEvent::ToolResult { success, .. } => saw_tool_result = success,
                AgentStreamEvent::Done { tool_calls_made, .. } => done = Some(tool_calls_made),
                _ => {}
            }
        }

        assert_eq!(
            states,
            [
                LoopState::Querying,
                LoopState::ExtractingCalls,
                LoopState::ExecutingTool,
                LoopState::AwaitingFollowUp,
                LoopState::Querying,
                LoopState::ExtractingCalls,
                LoopState::AwaitingUserInput,
            ]
        );
        assert!(chunks.ends_with("Two entries."));
        assert!(saw_tool_result);
        assert_eq!(done, Some(1));
    }

    #[tokio::test]
    async fn response_events_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut sub = bus.subscribe();
        let mut h = harness(vec![Script::text("hi")]);
        h.orchestrator = h.orchestrator.with_event_bus(bus);

        h.orchestrator.run_turn("hello", false).await;

        match sub.recv().await.unwrap().as_ref() {
            DomainEvent::ResponseGenerated { chars, directed, .. } => {
                assert_eq!(*chars, 2);
                assert!(!directed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_input_is_not_sent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut h = harness(vec![Script::text("hi")]);
        h.orchestrator = h.orchestrator.with_stream_sender(tx);

        for input in ["", "   ", "\n\t"] {
            let outcome = h.orchestrator.run_turn(input, true).await;
            assert!(outcome.reply.is_empty());
            assert!(outcome.executions.is_empty());
            assert!(!outcome.escalated);
        }

        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.orchestrator.conversation().len(), 1);
        assert_eq!(h.orchestrator.state(), LoopState::AwaitingUserInput);
        assert_eq!(h.orchestrator.completed_turns(), 0);
        assert!(rx.try_recv().is_err());

        // The next real turn still uses the first script
        let outcome = h.orchestrator.run_turn("hello", false).await;
        assert_eq!(outcome.reply, "hi");
    }

    #[tokio::test]
    async fn completed_turns_match_done_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut h = harness(vec![
            Script::text("one"),
            Script::Fail(ProviderError::Network("down".into())),
            Script::Fail(ProviderError::Network("down".into())),
        ]);
        h.orchestrator = h.orchestrator.with_stream_sender(tx);

        h.orchestrator.run_turn("first", false).await;
        h.orchestrator.run_turn("second", false).await;
        h.orchestrator.transition(LoopState::Querying);
        h.orchestrator.abandon_turn();

        let mut done = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AgentStreamEvent::Done { .. }) {
                done += 1;
            }
        }
        assert_eq!(h.orchestrator.completed_turns(), 2);
        assert_eq!(done, 2);
    }

    #[tokio::test]
    async fn clear_keeps_only_system_message() {
        let mut h = harness(vec![Script::text("hi")]);
        h.orchestrator.run_turn("hello", false).await;
        assert_eq!(h.orchestrator.conversation().len(), 3);

        h.orchestrator.clear();
        assert_eq!(roles(h.orchestrator.conversation()), [Role::System]);
    }

    #[test]
    fn abandon_turn_returns_to_input() {
        let mut h = harness(vec![]);
        h.orchestrator.abandon_turn();
        assert_eq!(h.orchestrator.conversation().len(), 1);

        h.orchestrator.transition(LoopState::ExecutingTool);
        h.orchestrator.abandon_turn();
        assert_eq!(h.orchestrator.state(), LoopState::AwaitingUserInput);
        assert_eq!(h.orchestrator.conversation().len(), 2);
    }

    #[test]
    fn settings_from_config() {
        let config = AppConfig::default();
        let settings = LoopSettings::from_config(&config, "llama3.1");
        assert_eq!(settings.model, "llama3.1");
        assert_eq!(settings.top_p, Some(config.top_p));
        assert_eq!(settings.result_preview_chars, 500);
        assert!(settings.escalation_temperature < settings.temperature);
    }
}

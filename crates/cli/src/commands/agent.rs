//! `ferrocall agent`: Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use ferrocall_agent::{AgentStreamEvent, LoopSettings, Orchestrator};
use ferrocall_config::AppConfig;
use ferrocall_core::event::{DomainEvent, EventBus};
use ferrocall_providers::build_from_config;
use ferrocall_tools::{PathPolicy, default_registry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace, warn};

const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit"];

pub async fn run(message: Option<String>, expect_tool: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Hosted providers need a key; local servers usually don't
    let hosted = matches!(config.default_provider.as_str(), "openai" | "openrouter");
    if hosted && !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured for '{}'!", config.default_provider);
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    FERROCALL_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;
    let model = router.model_for(router.default_provider_name()).to_string();

    let event_bus = Arc::new(EventBus::default());
    tokio::spawn(log_domain_events(event_bus.subscribe()));

    let policy = PathPolicy::from_config(&config.tools);
    let workspace = policy.workspace_root().display().to_string();
    let registry = Arc::new(default_registry(policy, Some(event_bus.clone())));
    let tool_names = registry.names().join(", ");

    let expect_tool = expect_tool || config.agent.expect_tool;
    let settings = LoopSettings::from_config(&config, model.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    let (rendered_tx, mut rendered_rx) = watch::channel(0u64);
    let renderer = tokio::spawn(render(rx, rendered_tx));

    let mut orchestrator = Orchestrator::new(provider, registry, settings)
        .with_event_bus(event_bus)
        .with_stream_sender(tx);

    if let Some(msg) = message {
        // Single message mode
        let outcome = orchestrator.run_turn(&msg, expect_tool).await;
        drop(orchestrator);
        let _ = renderer.await;
        if outcome.failed {
            return Err("The model query failed".into());
        }
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ferrocall interactive mode");
    println!();
    println!("  Provider:   {}", router.default_provider_name());
    println!("  Model:      {model}");
    println!("  Tools:      {tool_names}");
    println!("  Workspace:  {workspace}");
    if expect_tool {
        println!("  Escalation: directed JSON retry when no tool call is found");
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  '/clear' resets the conversation, 'exit' or Ctrl+C quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&input) {
            break;
        }
        if input == "/clear" {
            orchestrator.clear();
            println!("  (conversation cleared)");
            continue;
        }

        println!();
        print!("  Assistant > ");
        std::io::stdout().flush()?;

        let completed = {
            let turn = orchestrator.run_turn(input, expect_tool);
            tokio::select! {
                _ = turn => true,
                _ = tokio::signal::ctrl_c() => false,
            }
        };

        if !completed {
            orchestrator.abandon_turn();
            eprintln!();
            eprintln!("  [Interrupted] Turn abandoned.");
        }

        // Block until the renderer has printed every finished turn
        let finished = orchestrator.completed_turns();
        let _ = rendered_rx.wait_for(|rendered| *rendered >= finished).await;
        println!();
    }

    drop(orchestrator);
    let _ = renderer.await;

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Print loop activity as it happens, counting rendered turns on `rendered`.
async fn render(mut rx: mpsc::UnboundedReceiver<AgentStreamEvent>, rendered: watch::Sender<u64>) {
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                let _ = stdout.flush();
            }
            AgentStreamEvent::ToolCall { name, input } => {
                eprintln!();
                eprintln!("  [tool] {name} {input}");
            }
            AgentStreamEvent::ToolResult {
                name,
                success,
                duration_ms,
                ..
            } => {
                let status = if success { "ok" } else { "failed" };
                eprintln!("  [tool] {name} {status} ({duration_ms}ms)");
            }
            AgentStreamEvent::State { state } => trace!(?state, "Loop state"),
            AgentStreamEvent::Error { message } => {
                eprintln!();
                eprintln!("  [Error] {message}");
            }
            AgentStreamEvent::Done { .. } => {
                println!();
                rendered.send_modify(|count| *count += 1);
            }
        }
    }
}

/// Subscriber side of the domain event bus.
async fn log_domain_events(mut rx: broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.as_ref() {
                DomainEvent::ToolExecuted { record, .. } => debug!(
                    tool = %record.tool_name,
                    arguments = %serde_json::Value::Object(record.arguments.clone()),
                    success = record.result.is_success(),
                    duration_ms = record.duration_ms,
                    "Tool execution record"
                ),
                DomainEvent::ToolReplaced { name, .. } => {
                    warn!(tool = %name, "Tool definition replaced")
                }
                DomainEvent::ResponseGenerated {
                    model,
                    chars,
                    directed,
                    ..
                } => debug!(%model, chars, directed, "Response generated"),
                DomainEvent::ErrorOccurred {
                    context,
                    error_message,
                    ..
                } => debug!(%context, error = %error_message, "Error event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

//! Simple query example
//!
//! Demonstrates running a single turn against a local OpenAI-compatible
//! server and draining its event stream.

use std::time::Duration;
use turnloop_core::approval::{AutoApproveDefaults, Composite};
use turnloop_core::hooks::Hooks;
use turnloop_core::provider::openai::OpenAiProvider;
use turnloop_core::provider::CancellationToken;
use turnloop_core::{Agent, AgentConfig, Session, ToolRegistry, TurnEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::new("qwen3:8b", ".", "You are a helpful assistant");
    let config = AgentConfig::builder().build()?;
    let tools = ToolRegistry::new();
    let approval = Composite::new(vec![Box::new(AutoApproveDefaults::new(Vec::<String>::new()))]);
    let hooks = Hooks::new();
    let provider = OpenAiProvider::new("http://localhost:11434/v1", "", Duration::from_secs(60))?;

    let agent = Agent::new(
        session,
        config,
        tools,
        std::sync::Arc::new(approval),
        hooks,
        std::sync::Arc::new(provider),
    );

    println!("Sending query to model...\n");
    print!("Response: ");

    let mut stream = agent.run_turn(
        "What's the capital of France? Please be brief.",
        CancellationToken::new(),
    );

    while let Some(event) = stream.next().await {
        match event {
            TurnEvent::TextDelta { text } => {
                print!("{text}");
                std::io::Write::flush(&mut std::io::stdout())?;
            }
            TurnEvent::ToolCall { name, .. } => {
                println!("\nTool called: {name}");
            }
            TurnEvent::ToolResult { .. } => {
                // Not expected in a tool-free query
            }
            TurnEvent::Error { kind, detail } => {
                eprintln!("\nerror ({kind}): {detail}");
            }
            TurnEvent::Done => break,
        }
    }

    println!("\n\nQuery complete!");

    Ok(())
}

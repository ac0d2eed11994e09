//! Context Management Example
//!
//! Demonstrates that context compaction is automatic: the `Agent` estimates
//! token usage every turn and, once it crosses `trigger_ratio` of
//! `context_budget`, runs its compaction chain (tool-result clearing, then
//! summarization if configured, then truncation as a last resort) before
//! the next provider call. A host observes this by reading
//! `agent.conversation()` between turns; it never calls a truncation
//! function itself.

use std::sync::Arc;
use std::time::Duration;
use turnloop_core::approval::{AutoApproveDefaults, Composite};
use turnloop_core::context::estimate_conversation_tokens;
use turnloop_core::hooks::Hooks;
use turnloop_core::provider::openai::OpenAiProvider;
use turnloop_core::provider::CancellationToken;
use turnloop_core::{Agent, AgentConfig, Session, ToolRegistry, TurnEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("CONTEXT MANAGEMENT EXAMPLE");
    println!("{}", "=".repeat(70));
    println!();

    // A small budget makes compaction kick in quickly for this demo.
    let session = Session::new("qwen3:8b", ".", "You are a helpful assistant");
    let config = AgentConfig::builder()
        .context_budget(1_000)
        .trigger_ratio(0.70)
        .build()?;
    let approval = Composite::new(vec![Box::new(AutoApproveDefaults::new(Vec::<String>::new()))]);
    let provider = OpenAiProvider::new("http://localhost:11434/v1", "", Duration::from_secs(60))?;

    let agent = Agent::new(
        session,
        config,
        ToolRegistry::new(),
        Arc::new(approval),
        Hooks::new(),
        Arc::new(provider),
    );

    let prompts = [
        "What is Rust?",
        "Explain ownership",
        "What are lifetimes?",
        "How do traits work?",
        "Explain async/await",
    ];

    for (i, prompt) in prompts.iter().enumerate() {
        println!("Turn {}: {prompt}", i + 1);

        let mut stream = agent.run_turn(*prompt, CancellationToken::new());
        while let Some(event) = stream.next().await {
            match event {
                TurnEvent::Error { kind, detail } => eprintln!("  error ({kind}): {detail}"),
                TurnEvent::Done => break,
                _ => {}
            }
        }

        let conversation = agent.conversation().await;
        let tokens = estimate_conversation_tokens(&conversation);
        println!("  messages: {}, estimated tokens: {tokens}", conversation.len());
        println!();
    }

    println!("{}", "-".repeat(70));
    println!("Final turn count: {}", agent.turn_count().await);

    Ok(())
}

//! Hooks Example
//!
//! Demonstrates using before/after tool-call hooks to monitor and control
//! agent behavior: blocking a dangerous tool call, and rewriting a tool
//! result before it reaches the model.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use turnloop_core::approval::{AutoApproveDefaults, Composite};
use turnloop_core::provider::openai::OpenAiProvider;
use turnloop_core::provider::CancellationToken;
use turnloop_core::{tool, Agent, AgentConfig, HookOutcome, Hooks, Session, ToolRegistry, TurnEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("HOOKS EXAMPLE");
    println!("{}", "=".repeat(70));
    println!();

    let delete_file = tool("delete_file", "Delete a file from disk")
        .param("path", "string")
        .build(|args| async move { Ok(json!({"deleted": args["path"]})) });

    let read_file = tool("read_file", "Read a file from disk")
        .param("path", "string")
        .build(|_args| async move { Ok(json!({"content": "super-secret-token-abc123"})) });

    let mut tools = ToolRegistry::new();
    tools.register(delete_file).register(read_file);

    let hooks = Hooks::new()
        .add_before_tool_call(|event| async move {
            if event.tool_name == "delete_file" {
                println!("  hook: blocked delete_file before execution");
                return HookOutcome::cancel("destructive tool calls are blocked in this demo");
            }
            HookOutcome::default()
        })
        .add_after_tool_result(|event| async move {
            if event.content.to_string().contains("super-secret-token") {
                println!("  hook: redacted secret-looking tool output");
                return HookOutcome::replace_content(json!({"content": "[redacted]"}), "secret redaction");
            }
            HookOutcome::default()
        });

    let session = Session::new("qwen3:8b", ".", "You are a helpful assistant");
    let config = AgentConfig::builder().build()?;
    let approval = Composite::new(vec![Box::new(AutoApproveDefaults::new(["delete_file", "read_file"]))]);
    let provider = OpenAiProvider::new("http://localhost:11434/v1", "", Duration::from_secs(60))?;

    let agent = Agent::new(session, config, tools, Arc::new(approval), hooks, Arc::new(provider));

    for query in ["Delete the file secrets.txt", "Read the file secrets.txt"] {
        println!("User: {query}");
        println!("{}", "-".repeat(50));

        let mut stream = agent.run_turn(query, CancellationToken::new());
        while let Some(event) = stream.next().await {
            match event {
                TurnEvent::TextDelta { text } => print!("{text}"),
                TurnEvent::ToolCall { name, .. } => println!("\n  tool call: {name}"),
                TurnEvent::ToolResult { content, is_error, .. } => {
                    println!("  result ({}): {content}", if is_error { "error" } else { "ok" });
                }
                TurnEvent::Error { kind, detail } => eprintln!("\n  error ({kind}): {detail}"),
                TurnEvent::Done => break,
            }
        }
        println!("\n");
    }

    println!("{}", "=".repeat(70));
    println!("Hooks example complete!");
    println!("{}", "=".repeat(70));

    Ok(())
}

//! Calculator with Tools Example
//!
//! Demonstrates registering tools so the model can call them; the turn
//! loop executes approved calls automatically and feeds results back in.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use turnloop_core::approval::{AutoApproveDefaults, Composite};
use turnloop_core::hooks::Hooks;
use turnloop_core::provider::openai::OpenAiProvider;
use turnloop_core::provider::CancellationToken;
use turnloop_core::{tool, Agent, AgentConfig, Session, ToolRegistry, TurnEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let add = tool("add", "Add two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a + b}))
        });

    let subtract = tool("subtract", "Subtract two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a - b}))
        });

    let multiply = tool("multiply", "Multiply two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a * b}))
        });

    let divide = tool("divide", "Divide two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            if b == 0.0 {
                return Ok(json!({"error": "Cannot divide by zero"}));
            }
            Ok(json!({"result": a / b}))
        });

    let mut tools = ToolRegistry::new();
    tools.register(add).register(subtract).register(multiply).register(divide);

    let session = Session::new(
        "qwen3:8b",
        ".",
        "You are a helpful calculator assistant. Use the provided tools to \
         perform calculations. Always show your work and explain the result.",
    );
    let config = AgentConfig::builder().max_turns(5).build()?;
    let approval = Composite::new(vec![Box::new(AutoApproveDefaults::new([
        "add", "subtract", "multiply", "divide",
    ]))]);
    let provider = OpenAiProvider::new("http://localhost:11434/v1", "", Duration::from_secs(60))?;

    let agent = Agent::new(
        session,
        config,
        tools,
        Arc::new(approval),
        Hooks::new(),
        Arc::new(provider),
    );

    println!("{}", "=".repeat(70));
    println!("CALCULATOR TOOLS EXAMPLE");
    println!("{}", "=".repeat(70));
    println!();

    for query in ["What is 25 plus 17?", "Calculate 144 divided by 12", "What's 7 times 8, then add 5?"] {
        println!("User: {query}");
        println!("{}", "-".repeat(50));

        let mut stream = agent.run_turn(query, CancellationToken::new());
        while let Some(event) = stream.next().await {
            match event {
                TurnEvent::TextDelta { text } => print!("{text}"),
                TurnEvent::ToolCall { name, input, .. } => {
                    println!("\n  tool call: {name} {input}");
                }
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
    println!("Example complete!");

    Ok(())
}

//! Auto-Execution Mode Demo
//!
//! The turn loop always auto-executes approved tool calls and loops back
//! to the model until it produces a text-only response — there is no
//! manual mode to opt out of. This demo shows a caller consuming only
//! `TextDelta`/`Done` events while multi-step tool calls happen underneath.
//!
//! Usage:
//!   cargo run --example auto_execution_demo
//!
//! Requires:
//!   - Ollama running on localhost:11434
//!   - qwen3:8b model (or change model in code)

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use turnloop_core::approval::{AutoApproveDefaults, Composite};
use turnloop_core::hooks::Hooks;
use turnloop_core::provider::openai::OpenAiProvider;
use turnloop_core::provider::CancellationToken;
use turnloop_core::{tool, Agent, AgentConfig, Session, ToolRegistry, TurnEvent};

async fn run_query(agent: &Agent, query: &str) -> String {
    println!("Query: {query}");
    println!();

    let mut stream = agent.run_turn(query, CancellationToken::new());
    let mut response = String::new();
    let mut tool_calls = 0;

    while let Some(event) = stream.next().await {
        match event {
            TurnEvent::TextDelta { text } => response.push_str(&text),
            TurnEvent::ToolCall { .. } => tool_calls += 1,
            TurnEvent::ToolResult { .. } => {}
            TurnEvent::Error { kind, detail } => eprintln!("error ({kind}): {detail}"),
            TurnEvent::Done => break,
        }
    }

    println!("  ({tool_calls} tool call(s) executed automatically)");
    println!();
    println!("Assistant: {}", response.trim());
    response
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("AUTO-EXECUTION MODE DEMO");
    println!("{}", "=".repeat(70));
    println!();

    let add = tool("add", "Add two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a + b}))
        });

    let multiply = tool("multiply", "Multiply two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a * b}))
        });

    let subtract = tool("subtract", "Subtract two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a - b}))
        });

    let divide = tool("divide", "Divide two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            if b == 0.0 {
                return Err(turnloop_core::Error::tool("Division by zero"));
            }
            Ok(json!({"result": a / b}))
        });

    let mut tools = ToolRegistry::new();
    tools.register(add).register(multiply).register(subtract).register(divide);

    let session = Session::new(
        "qwen3:8b",
        ".",
        "You are a calculator assistant. Use the provided tools to perform \
         calculations. Show your work step by step.",
    );
    let config = AgentConfig::builder().max_turns(10).build()?;
    let approval = Composite::new(vec![Box::new(AutoApproveDefaults::new([
        "add", "multiply", "subtract", "divide",
    ]))]);
    let provider = OpenAiProvider::new("http://localhost:11434/v1", "", Duration::from_secs(60))?;

    let agent = Agent::new(session, config, tools, Arc::new(approval), Hooks::new(), Arc::new(provider));

    println!("{}", "-".repeat(70));
    println!("\nExample 1: Simple Calculation");
    println!("{}", "-".repeat(70));
    run_query(&agent, "Calculate 15 + 27").await;

    println!("\n{}", "-".repeat(70));
    println!("\nExample 2: Multi-Step Calculation");
    println!("{}", "-".repeat(70));
    run_query(&agent, "Calculate (10 + 5) * 3").await;

    println!("\n{}", "-".repeat(70));
    println!("\nExample 3: Complex Expression");
    println!("{}", "-".repeat(70));
    run_query(&agent, "Calculate (20 - 8) * 3 + 15").await;

    println!("\n{}", "=".repeat(70));
    println!("CONVERSATION HISTORY");
    println!("{}", "=".repeat(70));
    println!();
    println!("Total messages in history: {}", agent.conversation().await.len());
    println!("History includes every tool call and result the loop executed");
    println!("automatically across all three queries.");

    Ok(())
}

//! Multi-Tool Agent Example
//!
//! Demonstrates a realistic agent with multiple tools, safety/logging
//! hooks, and the automatic tool-execution loop.
//!
//! This agent can:
//! - Perform calculations
//! - Get the current date/time
//! - Convert units
//! - Search (mock)
//! - Format data
//!
//! Usage:
//!   cargo run --example multi_tool_agent
//!
//! Requires:
//!   - Ollama running on localhost:11434
//!   - qwen3:8b model (or adjust model name)

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use turnloop_core::approval::{AutoApproveDefaults, Composite};
use turnloop_core::provider::openai::OpenAiProvider;
use turnloop_core::provider::CancellationToken;
use turnloop_core::{tool, Agent, AgentConfig, HookOutcome, Hooks, Session, ToolRegistry, TurnEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("MULTI-TOOL AGENT DEMO");
    println!("Realistic agent with 5 tools, hooks, and auto-execution");
    println!("{}", "=".repeat(70));
    println!();

    let execution_log = Arc::new(Mutex::new(Vec::new()));

    let calculator = tool("calculate", "Perform arithmetic")
        .param("operation", "string")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let op = args["operation"].as_str().unwrap_or("");
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);

            let result = match op {
                "add" => a + b,
                "subtract" => a - b,
                "multiply" => a * b,
                "divide" => {
                    if b == 0.0 {
                        return Err(turnloop_core::Error::tool("Division by zero"));
                    }
                    a / b
                }
                _ => return Err(turnloop_core::Error::tool("Unknown operation")),
            };

            Ok(json!({"result": result, "operation": op}))
        });

    let datetime = tool("get_datetime", "Get current date and time")
        .param("format", "string")
        .build(|args| async move {
            let format = args["format"].as_str().unwrap_or("unix");
            let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();
            let formatted = match format {
                "unix" => now.to_string(),
                _ => format!("Unix timestamp: {now}"),
            };
            Ok(json!({"datetime": formatted, "format": format}))
        });

    let converter = tool("convert_units", "Convert between units")
        .param("value", "number")
        .param("from_unit", "string")
        .param("to_unit", "string")
        .build(|args| async move {
            let value = args["value"].as_f64().unwrap_or(0.0);
            let from = args["from_unit"].as_str().unwrap_or("");
            let to = args["to_unit"].as_str().unwrap_or("");

            let result = match (from, to) {
                ("km", "miles") => value * 0.621371,
                ("miles", "km") => value / 0.621371,
                ("kg", "lbs") => value * 2.20462,
                ("lbs", "kg") => value / 2.20462,
                ("celsius", "fahrenheit") => (value * 9.0 / 5.0) + 32.0,
                ("fahrenheit", "celsius") => (value - 32.0) * 5.0 / 9.0,
                _ => return Err(turnloop_core::Error::tool("Unsupported conversion")),
            };

            Ok(json!({"result": result, "from": from, "to": to, "original_value": value}))
        });

    let search = tool("search", "Search for information")
        .param("query", "string")
        .build(|args| async move {
            let query = args["query"].as_str().unwrap_or("");
            Ok(json!({
                "results": [
                    {"title": format!("Result for: {query}"), "relevance": 0.95},
                    {"title": "Related information", "relevance": 0.80},
                ],
                "query": query,
            }))
        });

    let formatter = tool("format_data", "Format data as table/list")
        .param("data", "object")
        .param("format", "string")
        .build(|args| async move {
            let format = args["format"].as_str().unwrap_or("list");
            Ok(json!({"formatted": format!("Data formatted as: {format}"), "format": format}))
        });

    let mut tools = ToolRegistry::new();
    tools.register(calculator).register(datetime).register(converter).register(search).register(formatter);

    let log = execution_log.clone();
    let hooks = Hooks::new()
        .add_before_tool_call(|event| async move {
            println!("before-tool-call: {}", event.tool_name);

            if event.tool_name == "delete" || event.tool_name == "modify_system" {
                println!("   BLOCKED: dangerous operation");
                return HookOutcome::cancel("safety policy violation");
            }

            if event.tool_name == "calculate" {
                let is_zero_divide = event.input.get("operation").and_then(|v| v.as_str()) == Some("divide")
                    && event.input.get("b").and_then(|v| v.as_f64()) == Some(0.0);
                if is_zero_divide {
                    println!("   BLOCKED: division by zero");
                    return HookOutcome::cancel("division by zero prevented");
                }
            }

            println!("   allowed");
            HookOutcome::default()
        })
        .add_after_tool_result(move |event| {
            let log = log.clone();
            async move {
                println!("after-tool-result: {} completed", event.tool_name);

                let timestamp =
                    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();
                log.lock().unwrap().push(format!("[{timestamp}] {} -> {}", event.tool_name, event.content));

                if let Some(result_obj) = event.content.as_object() {
                    let mut enhanced = result_obj.clone();
                    enhanced.insert("_metadata".to_string(), json!({"tool": event.tool_name, "executed_at": timestamp}));
                    return HookOutcome::replace_content(json!(enhanced), "added metadata");
                }

                HookOutcome::default()
            }
        });

    let session = Session::new(
        "qwen3:8b",
        ".",
        "You are a helpful multi-tool assistant. You have access to: \
         calculator, datetime, unit converter, search, and data formatter. \
         Use these tools to help answer questions. Always use tools for \
         calculations and conversions.",
    );
    let config = AgentConfig::builder().max_turns(10).build()?;
    let approval = Composite::new(vec![Box::new(AutoApproveDefaults::new([
        "calculate",
        "get_datetime",
        "convert_units",
        "search",
        "format_data",
    ]))]);
    let provider = OpenAiProvider::new("http://localhost:11434/v1", "", Duration::from_secs(60))?;

    let agent = Agent::new(session, config, tools, Arc::new(approval), hooks, Arc::new(provider));

    println!("Agent configured with:");
    println!("- 5 tools: calculator, datetime, converter, search, formatter");
    println!("- Before/after tool-call hooks: safety gate + logging");
    println!();
    println!("{}", "-".repeat(70));
    println!();

    let queries = [
        "What's 15 kilometers in miles?",
        "Calculate 25 divided by 5, then multiply by 3",
        "What's the current Unix timestamp?",
        "Search for information about Rust programming",
    ];

    for (i, query) in queries.iter().enumerate() {
        println!("Query {}: {query}", i + 1);
        println!();

        let mut stream = agent.run_turn(*query, CancellationToken::new());
        while let Some(event) = stream.next().await {
            match event {
                TurnEvent::TextDelta { text } => print!("{text}"),
                TurnEvent::ToolCall { .. } | TurnEvent::ToolResult { .. } => {}
                TurnEvent::Error { kind, detail } => eprintln!("error ({kind}): {detail}"),
                TurnEvent::Done => break,
            }
        }

        println!("\n");
        println!("{}", "-".repeat(70));
        println!();
    }

    println!("Execution Log:");
    println!("{}", "=".repeat(70));
    for entry in execution_log.lock().unwrap().iter() {
        println!("{entry}");
    }
    println!("{}", "=".repeat(70));
    println!();

    let messages = agent.conversation().await.messages();
    println!("Conversation History: {} messages", messages.len());
    println!();
    println!("History breakdown:");
    for (i, msg) in messages.iter().enumerate() {
        println!("  {}. {:?} - {} content blocks", i + 1, msg.role, msg.content.len());
    }
    println!();

    println!("{}", "=".repeat(70));
    println!("DEMO COMPLETE");
    println!("{}", "=".repeat(70));

    Ok(())
}

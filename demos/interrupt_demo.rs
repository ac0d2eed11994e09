//! Interrupt Capability Demo
//!
//! Demonstrates cancelling an in-progress turn with a `CancellationToken`:
//!
//! 1. Timeout-based cancellation
//! 2. Conditional cancellation (based on streamed content)
//! 3. Concurrent cancellation (simulated cancel button)
//! 4. Cancel and retry
//!
//! Note: this demo talks to Ollama. Make sure it is running at
//! http://localhost:11434 with a model loaded before running.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use turnloop_core::approval::{AutoApproveDefaults, Composite};
use turnloop_core::hooks::Hooks;
use turnloop_core::provider::openai::OpenAiProvider;
use turnloop_core::provider::{CancellationToken, Provider};
use turnloop_core::{Agent, AgentConfig, Session, ToolRegistry, TurnEvent};

fn new_agent() -> Result<Agent, Box<dyn std::error::Error>> {
    let session = Session::new("qwen3:8b", ".", "You are a helpful assistant. Be verbose.");
    let config = AgentConfig::builder().build()?;
    let approval = Composite::new(vec![Box::new(AutoApproveDefaults::new(Vec::<String>::new()))]);
    let provider: Arc<dyn Provider> =
        Arc::new(OpenAiProvider::new("http://localhost:11434/v1", "", Duration::from_secs(60))?);
    Ok(Agent::new(session, config, ToolRegistry::new(), Arc::new(approval), Hooks::new(), provider))
}

async fn timeout_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Example 1: Timeout-based Cancellation");
    println!("{}", "=".repeat(60));
    println!();

    let agent = new_agent()?;
    let cancel = CancellationToken::new();
    let mut stream = agent.run_turn("Write a detailed 1000-word essay about quantum computing", cancel.clone());

    println!("Starting to receive response (will cancel after 3 seconds)...\n");

    let mut received = 0usize;
    let result = timeout(Duration::from_secs(3), async {
        while let Some(event) = stream.next().await {
            if let TurnEvent::TextDelta { text } = event {
                print!("{text}");
                received += text.len();
            }
        }
    })
    .await;

    if result.is_err() {
        cancel.cancel();
        println!("\n\nOperation timed out and was cancelled!");
        println!("Received {received} characters before cancellation\n");
    } else {
        println!("\n\nResponse completed within timeout\n");
    }

    Ok(())
}

async fn conditional_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Example 2: Conditional Cancellation");
    println!("{}", "=".repeat(60));
    println!();

    let agent = new_agent()?;
    let cancel = CancellationToken::new();
    let mut stream = agent.run_turn("Tell me about machine learning", cancel.clone());

    println!("Receiving response (will stop if we see 'neural network')...\n");

    let mut full_text = String::new();
    while let Some(event) = stream.next().await {
        if let TurnEvent::TextDelta { text } = event {
            print!("{text}");
            full_text.push_str(&text);

            if full_text.to_lowercase().contains("neural network") {
                cancel.cancel();
                println!("\n\nFound keyword 'neural network' - cancelling!");
                break;
            }
        }
    }

    println!("\nReceived {} characters before cancellation\n", full_text.len());

    Ok(())
}

async fn concurrent_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Example 3: Concurrent Cancellation (Simulated Cancel Button)");
    println!("{}", "=".repeat(60));
    println!();

    let agent = new_agent()?;
    let cancel = CancellationToken::new();
    let mut stream = agent.run_turn("Explain artificial intelligence in detail", cancel.clone());

    println!("Receiving response...\n");

    let cancel_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            println!("\n\nUser clicked cancel button!");
            cancel.cancel();
        })
    };

    let mut full_text = String::new();
    while let Some(event) = stream.next().await {
        if let TurnEvent::TextDelta { text } = event {
            print!("{text}");
            full_text.push_str(&text);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    let _ = cancel_handle.await;

    println!("\n\nReceived {} characters before cancellation\n", full_text.len());

    Ok(())
}

async fn retry_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Example 4: Cancel and Retry");
    println!("{}", "=".repeat(60));
    println!();

    let agent = new_agent()?;

    println!("First query (will be cancelled)...\n");
    let cancel = CancellationToken::new();
    let mut stream = agent.run_turn("Tell me everything about the history of computing", cancel.clone());

    let mut count = 0;
    while let Some(event) = stream.next().await {
        if let TurnEvent::TextDelta { .. } = event {
            count += 1;
            if count == 3 {
                println!("\nOops, that was too broad. Cancelling...\n");
                cancel.cancel();
                break;
            }
        }
    }

    println!("Retrying with a more specific query...\n");
    let mut stream = agent.run_turn("Tell me about Alan Turing in 2 sentences", CancellationToken::new());
    while let Some(event) = stream.next().await {
        if let TurnEvent::TextDelta { text } = event {
            print!("{text}");
        }
    }

    println!("\n\nSuccess! Query completed after retry.\n");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n{}", "=".repeat(60));
    println!("INTERRUPT CAPABILITY DEMO");
    println!("{}", "=".repeat(60));
    println!();

    println!("This demo requires Ollama running at http://localhost:11434");
    println!("with a model loaded (e.g., qwen3:8b)\n");

    if let Err(e) = timeout_example().await {
        eprintln!("Timeout example error: {e}");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Err(e) = conditional_example().await {
        eprintln!("Conditional example error: {e}");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Err(e) = concurrent_example().await {
        eprintln!("Concurrent example error: {e}");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Err(e) = retry_example().await {
        eprintln!("Retry example error: {e}");
    }

    println!("{}", "=".repeat(60));
    println!("All examples completed!");
    println!("{}", "=".repeat(60));

    Ok(())
}

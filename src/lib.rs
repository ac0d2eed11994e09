//! # turnloop-core
//!
//! The turn-by-turn core of an interactive coding agent: an orchestrator
//! that drives one conversational turn from user input to assistant
//! response (including any tool calls along the way), a context manager
//! that keeps the conversation inside a token budget, an approval engine
//! for gating tool execution, and the persistence/prompt-assembly
//! contracts a host embeds this core behind.
//!
//! ## What this crate does not do
//!
//! There is no bundled provider beyond a streaming OpenAI-compatible HTTP
//! client (`provider::openai`) and a scripted test double
//! (`provider::testing`). There is no terminal UI, no tool implementations
//! beyond the registry that holds them, and no opinion on how a host
//! stores sessions beyond the `Persistence` trait — `PersistenceStore` is
//! a reference sled-backed implementation, not a requirement.
//!
//! ## Minimal usage
//!
//! ```rust,no_run
//! use turnloop_core::{Agent, AgentConfig, Session, ToolRegistry};
//! use turnloop_core::approval::{AutoApproveDefaults, Composite};
//! use turnloop_core::hooks::Hooks;
//! use turnloop_core::provider::CancellationToken;
//! use turnloop_core::provider::openai::OpenAiProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> turnloop_core::Result<()> {
//! let session = Session::new("qwen2.5-32b-instruct", "/repo", "You are a helpful assistant");
//! let config = AgentConfig::builder().build()?;
//! let tools = ToolRegistry::new();
//! let approval: Arc<dyn turnloop_core::approval::ApprovalChecker> =
//!     Arc::new(Composite::new(vec![Box::new(AutoApproveDefaults::new(Vec::<String>::new()))]));
//! let hooks = Hooks::new();
//! let provider: Arc<dyn turnloop_core::provider::Provider> = Arc::new(OpenAiProvider::new(
//!     "http://localhost:1234/v1",
//!     "",
//!     std::time::Duration::from_secs(60),
//! )?);
//!
//! let agent = Agent::new(session, config, tools, approval, hooks, provider);
//!
//! let mut stream = agent.run_turn("What's 2+2?", CancellationToken::new());
//! while let Some(event) = stream.next().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//!
//! - **orchestrator**: the turn loop — `Agent`, `TurnEvent`, `TurnStream`.
//! - **context**: token estimation and the compaction strategy chain.
//! - **approval**: trust rules, session memory, and auto-approve defaults
//!   for gating tool calls.
//! - **hooks**: before/after tool-call hooks and skill prompt fragments.
//! - **persistence**: the storage contract a host implements, plus a
//!   reference implementation.
//! - **prompt**: assembles a turn's system prompt from ordered sections.
//! - **provider**: the streaming completion contract, an OpenAI-compatible
//!   implementation, and a scripted test double.
//! - **tools**: tool definitions with automatic JSON schema generation.
//! - **types**: messages, content blocks, conversations, and sessions.
//! - **config**: `AgentConfig`, the turn-loop and compaction/approval knobs.
//! - **error**: `Error`, `Result`, and the turn-terminal `TurnError`.
//! - **retry**: exponential backoff for host-side provider calls.

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Trust rules, session-scoped memory, and auto-approve defaults for
/// deciding whether a tool call may run without a human in the loop.
pub mod approval;

/// Agent configuration: turn-loop, compaction, and approval knobs.
mod config;

/// Context window management: token estimation and the compaction
/// strategy chain (tool-result clearing, summarization, truncation).
pub mod context;

/// Error types and conversions used throughout the crate.
mod error;

/// Lifecycle hooks around tool calls, plus the skill prompt-fragment
/// contract.
pub mod hooks;

/// The turn loop: `Agent`, `TurnEvent`, `TurnStream`.
mod orchestrator;

/// The storage contract a host implements for sessions, messages, blobs,
/// and cross-session memories, plus a reference implementation.
pub mod persistence;

/// Assembles a turn's system prompt from ordered sections.
pub mod prompt;

/// The streaming completion contract a model provider implements.
pub mod provider;

/// Scratchpad: the agent's working-memory note surface.
mod scratchpad;

/// Tool definition and execution, with automatic JSON schema generation.
pub mod tools;

/// Core type definitions: messages, content blocks, conversations,
/// sessions, and trust rules.
pub mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities with exponential backoff and jitter, for host code
/// wrapping its own provider calls.
pub mod retry;

// --- Error Handling ---

pub use error::{Error, Result, TurnError};

// --- Turn Orchestrator ---

pub use orchestrator::{Agent, TurnEvent, TurnStream};

// --- Configuration ---

pub use config::{AgentConfig, AgentConfigBuilder};

// --- Lifecycle Hooks ---

pub use hooks::{HookOutcome, Hooks, OnAfterToolResult, OnBeforeToolCall, PromptFragmentProvider};

// --- Tool System ---

pub use tools::{Tool, ToolBuilder, ToolRegistry, tool};

// --- Scratchpad ---

pub use scratchpad::Scratchpad;

// --- Core Types ---

pub use types::{
    ContentBlock, Conversation, ConversationSignals, Message, MessageRole, Session, TextBlock,
    ThinkingBlock, ToolResultBlock, ToolUseBlock, TrustAction, TrustRule,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types.
/// Import with `use turnloop_core::prelude::*;` for typical host-embedding
/// usage: constructing an `Agent`, running a turn, and matching on its
/// events.
pub mod prelude {
    pub use crate::{
        Agent, AgentConfig, ContentBlock, Conversation, Error, Message, MessageRole, Result,
        Session, Tool, ToolRegistry, ToolUseBlock, TurnError, TurnEvent, TurnStream, tool,
    };
    pub use crate::approval::{ApprovalChecker, Composite};
    pub use crate::hooks::Hooks;
    pub use crate::persistence::Persistence;
    pub use crate::provider::{CancellationToken, Provider};
}

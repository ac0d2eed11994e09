//! Error types for the crate.
//!
//! Two layers: [`Error`] is the low-level taxonomy used by tool execution,
//! config validation, and the concrete provider implementations. [`TurnError`]
//! is the orchestrator-facing taxonomy (§7 of the design) — it wraps `Error`
//! at the seam where a failure needs to be classified into one of the turn
//! loop's recovery policies (synthesize a tool_result, terminate the turn, or
//! just log).

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Low-level error type shared by tools, config, and provider implementations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error from the model server
    #[error("API error: {0}")]
    Api(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }
}

/// The orchestrator-facing error taxonomy (§7).
///
/// Every variant maps to one of three propagation policies, enforced by
/// [`crate::orchestrator`]: terminal (emit `error` then `done`), recoverable
/// (synthesize an error `tool_result` and continue), or non-fatal-logged
/// (never surfaced on the event stream at all).
#[derive(Error, Debug)]
pub enum TurnError {
    /// Cooperative cancellation observed by the orchestrator. Terminal.
    #[error("turn cancelled")]
    Cancelled,

    /// The initial request to the provider failed. Terminal.
    #[error("failed to open provider stream: {source}")]
    ProviderStreamOpen { source: Error },

    /// An error event arrived mid-stream. Non-terminal: draining continues.
    #[error("provider stream error: {detail}")]
    ProviderStreamEvent { detail: String },

    /// The model named a tool not present in the registry. Recoverable.
    #[error("tool not found: {tool_name}")]
    ToolNotFound { tool_name: String },

    /// The tool itself returned an error. Recoverable.
    #[error("tool '{tool_name}' failed: {source}")]
    ToolExecution { tool_name: String, source: Error },

    /// The approval callback itself errored. Recoverable.
    #[error("approval callback failed for '{tool_name}': {detail}")]
    Approval { tool_name: String, detail: String },

    /// A skill hook errored. Recoverable.
    #[error("hook failed for '{tool_name}': {detail}")]
    HookError { tool_name: String, detail: String },

    /// Summarization rejected its own output as larger than the input.
    /// Non-fatal-logged: the context manager just moves to the next strategy.
    #[error("summarization inflated the conversation instead of shrinking it")]
    CompactionInflated,

    /// The Summarizer itself failed. Non-fatal-logged.
    #[error("summarizer failed: {0}")]
    CompactionFailed(String),

    /// The turn loop exceeded `max_turns`. Terminal.
    #[error("exceeded max turns ({max_turns})")]
    MaxTurnsExceeded { max_turns: u32 },

    /// A persistence operation failed. Never surfaced as a turn error — only
    /// ever handed to the logging sink.
    #[error("persistence error: {0}")]
    Persistence(Error),
}

impl TurnError {
    /// Stable short identifier used as `TurnEvent::Error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::Cancelled => "cancelled",
            TurnError::ProviderStreamOpen { .. } => "provider_stream_open",
            TurnError::ProviderStreamEvent { .. } => "provider_stream_event",
            TurnError::ToolNotFound { .. } => "tool_not_found",
            TurnError::ToolExecution { .. } => "tool_execution",
            TurnError::Approval { .. } => "approval",
            TurnError::HookError { .. } => "hook_error",
            TurnError::CompactionInflated => "compaction_inflated",
            TurnError::CompactionFailed(_) => "compaction_failed",
            TurnError::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            TurnError::Persistence(_) => "persistence",
        }
    }

    /// Whether this error terminates the turn (emits `error` then `done`) as
    /// opposed to being folded into a synthesized `tool_result` or only
    /// logged.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnError::Cancelled
                | TurnError::ProviderStreamOpen { .. }
                | TurnError::MaxTurnsExceeded { .. }
        )
    }
}

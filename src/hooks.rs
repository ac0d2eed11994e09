//! Skill hook surface: two phases the orchestrator dispatches around tool
//! execution, plus an independent prompt-fragment registration.
//!
//! # Examples
//!
//! ```rust,no_run
//! use turnloop_core::{Hooks, OnBeforeToolCall, HookOutcome};
//!
//! async fn deny_dangerous(event: OnBeforeToolCall) -> HookOutcome {
//!     if event.tool_name == "delete_file" {
//!         return HookOutcome::cancel("dangerous operation blocked");
//!     }
//!     HookOutcome::default()
//! }
//! ```

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Fired before a tool call executes, after approval has already granted it.
#[derive(Debug, Clone)]
pub struct OnBeforeToolCall {
    pub tool_name: String,
    pub input: Value,
    pub tool_use_id: String,
}

impl OnBeforeToolCall {
    pub fn new(tool_name: impl Into<String>, input: Value, tool_use_id: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            tool_use_id: tool_use_id.into(),
        }
    }
}

/// Fired after a tool call returns, before the result is persisted/emitted.
#[derive(Debug, Clone)]
pub struct OnAfterToolResult {
    pub tool_name: String,
    pub content: Value,
    pub is_error: bool,
    pub tool_use_id: String,
}

impl OnAfterToolResult {
    pub fn new(
        tool_name: impl Into<String>,
        content: Value,
        is_error: bool,
        tool_use_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            content,
            is_error,
            tool_use_id: tool_use_id.into(),
        }
    }
}

/// A hook's verdict. The default (`cancel: false`, `modified_content: None`)
/// means "no opinion, proceed unchanged".
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    /// Before-phase only: short-circuits execution with a cancellation
    /// `tool_result`. Ignored on the after-phase.
    pub cancel: bool,
    /// After-phase only: replaces the tool result content before persistence
    /// and emission. Ignored on the before-phase.
    pub modified_content: Option<Value>,
    pub reason: Option<String>,
}

impl HookOutcome {
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            cancel: true,
            modified_content: None,
            reason: Some(reason.into()),
        }
    }

    pub fn replace_content(content: Value, reason: impl Into<String>) -> Self {
        Self {
            cancel: false,
            modified_content: Some(content),
            reason: Some(reason.into()),
        }
    }
}

pub type BeforeToolCallHandler = Arc<
    dyn Fn(OnBeforeToolCall) -> Pin<Box<dyn Future<Output = HookOutcome> + Send>> + Send + Sync,
>;

pub type AfterToolResultHandler = Arc<
    dyn Fn(OnAfterToolResult) -> Pin<Box<dyn Future<Output = HookOutcome> + Send>> + Send + Sync,
>;

/// A skill's contribution to the system prompt, independent of the hook
/// phases above: a name/body pair consumed by [`crate::prompt::PromptBuilder`].
pub trait PromptFragmentProvider: Send + Sync {
    fn fragments(&self) -> Vec<(String, String)>;
}

/// Registered hook handlers, dispatched in registration order; the first
/// handler to return a non-default outcome wins and the rest are skipped.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_tool_call: Vec<BeforeToolCallHandler>,
    pub after_tool_result: Vec<AfterToolResultHandler>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_before_tool_call<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(OnBeforeToolCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookOutcome> + Send + 'static,
    {
        self.before_tool_call
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    pub fn add_after_tool_result<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(OnAfterToolResult) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookOutcome> + Send + 'static,
    {
        self.after_tool_result
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Run every before-hook in order; the first non-default outcome wins.
    /// A nil/empty registry is a no-op, returning the default outcome.
    pub async fn run_before_tool_call(&self, event: OnBeforeToolCall) -> HookOutcome {
        for handler in &self.before_tool_call {
            let outcome = handler(event.clone()).await;
            if outcome.cancel || outcome.modified_content.is_some() {
                return outcome;
            }
        }
        HookOutcome::default()
    }

    pub async fn run_after_tool_result(&self, event: OnAfterToolResult) -> HookOutcome {
        for handler in &self.after_tool_result {
            let outcome = handler(event.clone()).await;
            if outcome.modified_content.is_some() {
                return outcome;
            }
        }
        HookOutcome::default()
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before_tool_call", &format!("{} handlers", self.before_tool_call.len()))
            .field("after_tool_result", &format!("{} handlers", self.after_tool_result.len()))
            .finish()
    }
}

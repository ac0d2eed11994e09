//! Provider Contract: the abstract streaming completion boundary concrete
//! LLM codecs implement.
//!
//! The core ships no concrete network provider — those are collaborators,
//! out of scope for this crate (see the crate-level docs). It ships the
//! trait, the request/event envelope, the cancellation primitive every
//! suspension point in the orchestrator threads through, and a
//! [`testing::ScriptedProvider`] test double used by the orchestrator's own
//! integration tests.

pub mod openai;
pub mod testing;

use crate::error::Error;
use crate::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// A request to complete a conversation turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<crate::types::Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    /// Byte offset into `system` marking the end of the cacheable prefix,
    /// as produced by [`crate::prompt::PromptBuilder`]. `None` when the
    /// built prompt had no cacheable/dynamic split to report.
    pub cache_breakpoints: Option<usize>,
}

/// A tool's name/description/JSON-schema triple, as advertised to the model.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One event in a provider's completion stream.
///
/// `tool_use` marks the start of an implicit block; every `text_delta`
/// received before the matching implicit close (the next `tool_use`,
/// `stop`, or `error`) is tool-input JSON for that call, never ordinary
/// text. Concrete providers are responsible for guaranteeing
/// non-interleaving before translating into this type.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta { text: String },
    ToolUse { id: String, name: String },
    Stop,
    Error { detail: String },
}

/// A minimal `tokio_util::sync::CancellationToken`-equivalent: an
/// `Arc<AtomicBool>` flag plus a `Notify` so awaiting cancellation doesn't
/// require polling. Generalizes the teacher's `Arc<AtomicBool>` interrupt
/// flag in `Client::interrupt()`.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already cancelled; otherwise waits for the
    /// next [`CancellationToken::cancel`] call.
    ///
    /// The `Notified` future is created before the flag re-check so a
    /// `cancel()` landing in between is never missed: `notify_waiters()`
    /// stores no permit for a future call, but it does bump a counter this
    /// future snapshots at creation, so a stale snapshot resolves the await
    /// immediately instead of blocking on a notification that already fired.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// The abstract streaming completion boundary. One method: open a stream
/// for a given request, honoring `cancel` at every suspension point inside
/// the implementation.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<Result<StreamEvent>>>;
}

/// Wraps a lower-level [`Error`] as the orchestrator's `ProviderStreamOpen`
/// failure. Kept here (rather than in `error.rs`) since only provider
/// implementations construct it.
pub fn stream_open_error(source: Error) -> crate::error::TurnError {
    crate::error::TurnError::ProviderStreamOpen { source }
}

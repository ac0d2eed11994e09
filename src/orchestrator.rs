//! Turn Orchestrator: drives one user turn through the provider stream,
//! tool execution, approval, hooks, compaction, and persistence.
//!
//! Generalizes the teacher's `Client::send`/`receive`/`auto_execute_loop`
//! trio into a single explicit state machine: `IDLE -> COMPACTED -> STREAMING
//! -> AFTER_STREAM -> (EXECUTING -> STREAMING)* -> DONE`. A turn is a lazy
//! sequence of [`TurnEvent`]s produced by a spawned task and delivered over a
//! bounded `tokio::sync::mpsc` channel, matching the teacher's `ContentStream`
//! pattern generalized onto a detached producer: the consumer can drain
//! events as they land while the producer keeps streaming.

use crate::approval::{ApprovalCallback, ApprovalChecker};
use crate::config::AgentConfig;
use crate::context::ContextManager;
use crate::error::{Error, TurnError};
use crate::hooks::{Hooks, OnAfterToolResult, OnBeforeToolCall, PromptFragmentProvider};
use crate::persistence::{offload_reference, Persistence};
use crate::prompt::PromptBuilder;
use crate::provider::{CancellationToken, CompletionRequest, Provider, StreamEvent};
use crate::scratchpad::Scratchpad;
use crate::tools::{Tool, ToolRegistry};
use crate::types::{ContentBlock, Conversation, Message, Session, ToolUseBlock};
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One event on a turn's output stream, delivered in the order things
/// actually happened: text as the provider emits it, a `tool_call`/
/// `tool_result` pair per executed call, then `done`. A terminal `error`
/// (cancellation, max-turns, a stream that never opened) is always followed
/// immediately by `done` and nothing else. A non-terminal `error` — a
/// mid-stream provider hiccup the turn recovers from — can appear on its
/// own, with the turn continuing past it.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    TextDelta { text: String },
    ToolCall { id: String, name: String, input: Value },
    ToolResult { id: String, name: String, content: String, is_error: bool },
    Error { kind: String, detail: String },
    Done,
}

/// The channel capacity every turn's producer/consumer pair uses. Small
/// enough to apply backpressure on a slow consumer, large enough that a
/// burst of tool_call/tool_result pairs doesn't stall the producer on every
/// send.
const CHANNEL_CAPACITY: usize = 64;

/// Receives [`TurnEvent`]s for one `run_turn` call. A thin wrapper over the
/// inner `mpsc::Receiver` kept so callers don't need a direct `tokio`
/// dependency to consume a turn.
pub struct TurnStream {
    rx: mpsc::Receiver<TurnEvent>,
}

impl TurnStream {
    pub async fn next(&mut self) -> Option<TurnEvent> {
        self.rx.recv().await
    }
}

/// The part of an `Agent` that a turn actually mutates: the message log,
/// its session header, the compaction chain's stateful strategies, the
/// extra prompt sections, and the turn counter. Held behind a `tokio::Mutex`
/// so the spawned producer task can hold it across the suspension points
/// inside `drive_turn` without borrowing `Agent` itself.
struct AgentState {
    conversation: Conversation,
    session: Session,
    context_manager: ContextManager,
    prompt_sections: Vec<(String, String, bool)>,
    turn_count: u32,
}

/// Everything one running agent owns: mutable turn state plus its
/// collaborators — the tool registry, approval/hook surfaces, provider, and
/// (optionally) a persistence backend. Cheaply `Clone`-able: every field is
/// an `Arc`, so a turn's spawned producer task can hold its own handle
/// without borrowing the `Agent` value that created it.
#[derive(Clone)]
pub struct Agent {
    state: Arc<Mutex<AgentState>>,
    config: Arc<AgentConfig>,
    tools: Arc<ToolRegistry>,
    approval: Arc<dyn ApprovalChecker>,
    hooks: Arc<Hooks>,
    provider: Arc<dyn Provider>,
    persistence: Option<Arc<dyn Persistence>>,
    fragment_providers: Arc<RwLock<Vec<Arc<dyn PromptFragmentProvider>>>>,
    scratchpad: Arc<Scratchpad>,
    approval_callback: Option<Arc<dyn ApprovalCallback>>,
}

impl Agent {
    pub fn new(
        session: Session,
        config: AgentConfig,
        tools: ToolRegistry,
        approval: Arc<dyn ApprovalChecker>,
        hooks: Hooks,
        provider: Arc<dyn Provider>,
    ) -> Self {
        let context_manager = ContextManager::new(crate::context::ContextManagerConfig {
            budget: config.context_budget,
            trigger_ratio: config.trigger_ratio,
            tool_clear_threshold: config.tool_clear_threshold,
            summary_message_threshold: config.summary_message_threshold,
        });

        let state = AgentState {
            conversation: Conversation::new(session.system_prompt.clone()),
            session,
            context_manager,
            prompt_sections: Vec::new(),
            turn_count: 0,
        };

        Self {
            state: Arc::new(Mutex::new(state)),
            config: Arc::new(config),
            tools: Arc::new(tools),
            approval,
            hooks: Arc::new(hooks),
            provider,
            persistence: None,
            fragment_providers: Arc::new(RwLock::new(Vec::new())),
            scratchpad: Arc::new(Scratchpad::new()),
            approval_callback: None,
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Registers the interactive seam invoked when no [`ApprovalChecker`]
    /// in the chain can decide a tool call on its own.
    pub fn with_approval_callback(mut self, callback: Arc<dyn ApprovalCallback>) -> Self {
        self.approval_callback = Some(callback);
        self
    }

    /// Attaches a [`crate::context::Summarizer`] to the compaction chain,
    /// seeded with `summary_message_threshold` from this agent's config.
    pub async fn with_summarizer(self, summarizer: Box<dyn crate::context::Summarizer>) -> Self {
        self.state.lock().await.context_manager.add_summarizer(summarizer);
        self
    }

    /// Registers an extra cacheable system-prompt section (project guidance,
    /// house style, anything beyond the base prompt) rendered before every
    /// turn's dynamic sections.
    pub async fn add_prompt_section(&self, name: impl Into<String>, content: impl Into<String>, cacheable: bool) {
        self.state.lock().await.prompt_sections.push((name.into(), content.into(), cacheable));
    }

    /// Registers a skill's [`PromptFragmentProvider`]; its fragments are
    /// collected fresh into every turn's prompt, in registration order.
    pub fn register_fragment_provider(&self, provider: Arc<dyn PromptFragmentProvider>) {
        self.fragment_providers.write().push(provider);
    }

    /// The agent's shared working-memory note board. Clone the returned
    /// `Arc` into tool closures that need to leave notes for later turns.
    pub fn scratchpad(&self) -> Arc<Scratchpad> {
        self.scratchpad.clone()
    }

    pub async fn conversation(&self) -> Conversation {
        self.state.lock().await.conversation.clone()
    }

    pub async fn turn_count(&self) -> u32 {
        self.state.lock().await.turn_count
    }

    /// Drives one user turn to completion on a spawned task, returning a
    /// [`TurnStream`] the caller can start draining immediately; the
    /// producer fills the bounded channel concurrently rather than
    /// buffering the whole turn before handing events back.
    pub fn run_turn(&self, user_text: impl Into<String>, cancel: CancellationToken) -> TurnStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let agent = self.clone();
        let user_text = user_text.into();

        tokio::spawn(async move {
            agent.drive_turn(user_text, cancel, tx).await;
        });

        TurnStream { rx }
    }

    fn log_persistence_failure(&self, err: &Error) {
        tracing::warn!(target: "orchestrator", "persistence error: {err}");
    }

    /// Appends `message` to the live conversation and, if a persistence
    /// backend is attached, durably logs it too. Persistence failures are
    /// logged and never surfaced on the turn's event stream (§7).
    async fn persist(&self, session_id: uuid::Uuid, message: &Message) {
        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.append_message(session_id, message).await {
                self.log_persistence_failure(&err);
            }
        }
    }

    /// Rebuilds the system prompt for the upcoming turn: base prompt, any
    /// registered extra sections, cross-session memories (if a persistence
    /// backend is attached), skill prompt fragments, and the scratchpad
    /// render.
    async fn build_prompt(&self, system_prompt: &str, working_dir: &str, sections: &[(String, String, bool)]) -> crate::prompt::BuiltPrompt {
        let mut builder = PromptBuilder::new();
        builder.base_prompt(system_prompt);

        for (name, content, cacheable) in sections {
            builder.add_section(name.clone(), content.clone(), *cacheable);
        }

        if let Some(persistence) = &self.persistence {
            match persistence.load_memories(working_dir).await {
                Ok(memories) => {
                    builder.memories(&memories);
                }
                Err(err) => self.log_persistence_failure(&err),
            }
        }

        let fragments: Vec<(String, String)> =
            self.fragment_providers.read().iter().flat_map(|provider| provider.fragments()).collect();
        builder.fragments(&fragments);

        builder.scratchpad(self.scratchpad.render());

        builder.build()
    }

    async fn drive_turn(&self, user_text: String, cancel: CancellationToken, tx: mpsc::Sender<TurnEvent>) {
        let (session_id, user_message) = {
            let mut state = self.state.lock().await;
            state.conversation.add_user(&user_text);
            let message = state.conversation.messages().last().cloned().expect("just pushed");
            (state.session.id, message)
        };
        self.persist(session_id, &user_message).await;

        loop {
            if cancel.is_cancelled() {
                self.emit_terminal(&tx, TurnError::Cancelled).await;
                return;
            }

            let (request, exceeded) = {
                let mut state = self.state.lock().await;

                if state.turn_count >= self.config.max_turns {
                    (None, true)
                } else {
                    state.turn_count += 1;
                    state.context_manager.compact(&mut state.conversation).await;

                    let system_prompt = state.session.system_prompt.clone();
                    let working_dir = state.session.working_dir.clone();
                    let sections = state.prompt_sections.clone();
                    let model = state.session.model.clone();
                    let messages = state.conversation.messages();
                    drop(state);

                    let built_prompt = self.build_prompt(&system_prompt, &working_dir, &sections).await;
                    (
                        Some(CompletionRequest {
                            model,
                            system: built_prompt.system,
                            messages,
                            tools: self.tools.schemas(),
                            max_tokens: self.config.context_budget,
                            temperature: None,
                            cache_breakpoints: built_prompt.cache_breakpoint,
                        }),
                        false,
                    )
                }
            };

            if exceeded {
                self.emit_terminal(&tx, TurnError::MaxTurnsExceeded { max_turns: self.config.max_turns }).await;
                return;
            }
            let request = request.expect("present when not exceeded");

            // STREAMING
            let stream_result = self.provider.stream(request, cancel.clone()).await;
            let mut stream = match stream_result {
                Ok(stream) => stream,
                Err(source) => {
                    self.emit_terminal(&tx, TurnError::ProviderStreamOpen { source }).await;
                    return;
                }
            };

            let mut text_buffer = String::new();
            let mut pending_tool_uses: Vec<ToolUseBlock> = Vec::new();
            let mut current_tool: Option<(String, String)> = None;
            let mut tool_input_buffer = String::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.emit_terminal(&tx, TurnError::Cancelled).await;
                        return;
                    }
                    next = stream.next() => {
                        match next {
                            None => break,
                            Some(Ok(StreamEvent::TextDelta { text })) => {
                                match &current_tool {
                                    Some(_) => tool_input_buffer.push_str(&text),
                                    None => {
                                        text_buffer.push_str(&text);
                                        if tx.send(TurnEvent::TextDelta { text }).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                            Some(Ok(StreamEvent::ToolUse { id, name })) => {
                                if let Some((prev_id, prev_name)) = current_tool.take() {
                                    let input = parse_tool_input(&tool_input_buffer);
                                    pending_tool_uses.push(ToolUseBlock::new(prev_id, prev_name, input));
                                    tool_input_buffer.clear();
                                }
                                current_tool = Some((id, name));
                            }
                            Some(Ok(StreamEvent::Stop)) => {
                                if let Some((id, name)) = current_tool.take() {
                                    let input = parse_tool_input(&tool_input_buffer);
                                    pending_tool_uses.push(ToolUseBlock::new(id, name, input));
                                    tool_input_buffer.clear();
                                }
                                break;
                            }
                            Some(Ok(StreamEvent::Error { detail })) => {
                                // Non-terminal: keep draining so the provider can
                                // shut its own stream down cleanly, then proceed
                                // to AFTER_STREAM with whatever was collected.
                                let turn_error = TurnError::ProviderStreamEvent { detail };
                                tracing::warn!(target: "orchestrator", "{turn_error}");
                                if tx.send(TurnEvent::Error {
                                    kind: turn_error.kind().to_string(),
                                    detail: turn_error.to_string(),
                                }).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(source)) => {
                                let turn_error = TurnError::ProviderStreamEvent { detail: source.to_string() };
                                tracing::warn!(target: "orchestrator", "{turn_error}");
                                if tx.send(TurnEvent::Error {
                                    kind: turn_error.kind().to_string(),
                                    detail: turn_error.to_string(),
                                }).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }

            // AFTER_STREAM
            let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
            if !text_buffer.is_empty() {
                assistant_blocks.push(ContentBlock::Text(crate::types::TextBlock::new(text_buffer)));
            }
            for tool_use in &pending_tool_uses {
                assistant_blocks.push(ContentBlock::ToolUse(tool_use.clone()));
            }

            if assistant_blocks.is_empty() {
                let _ = tx.send(TurnEvent::Done).await;
                return;
            }

            let assistant_message = {
                let mut state = self.state.lock().await;
                state.conversation.add_assistant(assistant_blocks);
                state.conversation.messages().last().cloned().expect("just pushed")
            };
            self.persist(session_id, &assistant_message).await;

            if pending_tool_uses.is_empty() {
                // DONE: a text-only turn.
                let _ = tx.send(TurnEvent::Done).await;
                return;
            }

            // EXECUTING: run every pending tool call in model order.
            for tool_use in pending_tool_uses {
                if cancel.is_cancelled() {
                    self.emit_terminal(&tx, TurnError::Cancelled).await;
                    return;
                }

                self.execute_one_tool_call(session_id, &tool_use, &cancel, &tx).await;
            }

            // Loop back to STREAMING for the model's reaction to the tool
            // results just appended; `turn_count` already incremented above
            // bounds this loop via `max_turns`.
        }
    }

    async fn execute_one_tool_call(
        &self,
        session_id: uuid::Uuid,
        tool_use: &ToolUseBlock,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<TurnEvent>,
    ) {
        if tx
            .send(TurnEvent::ToolCall {
                id: tool_use.id.clone(),
                name: tool_use.name.clone(),
                input: tool_use.input.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        let tool: Option<Tool> = self.tools.get(&tool_use.name).cloned();
        let Some(tool) = tool else {
            let turn_error = TurnError::ToolNotFound { tool_name: tool_use.name.clone() };
            self.finish_tool_call(session_id, tool_use, format!("{turn_error}"), true, tx).await;
            return;
        };

        let approval = self.approval.check_approval(&tool_use.name, &tool_use.input).await;
        if !approval.is_approved() {
            let user_approved = match &self.approval_callback {
                Some(callback) => callback.ask(&tool_use.name, &tool_use.input, cancel).await,
                None => false,
            };
            if !user_approved {
                self.finish_tool_call(session_id, tool_use, "tool call denied by user".to_string(), true, tx).await;
                return;
            }
        }

        let before_event = OnBeforeToolCall::new(tool_use.name.clone(), tool_use.input.clone(), tool_use.id.clone());
        let before_outcome = self.hooks.run_before_tool_call(before_event).await;
        if before_outcome.cancel {
            let reason = before_outcome.reason.unwrap_or_else(|| "cancelled by hook".to_string());
            self.finish_tool_call(session_id, tool_use, reason, true, tx).await;
            return;
        }

        if cancel.is_cancelled() {
            self.finish_tool_call(session_id, tool_use, "cancelled".to_string(), true, tx).await;
            return;
        }

        let (content, is_error) = match tool.execute(tool_use.input.clone()).await {
            Ok(value) => (value.to_string(), false),
            Err(source) => {
                let turn_error = TurnError::ToolExecution { tool_name: tool_use.name.clone(), source };
                (turn_error.to_string(), true)
            }
        };

        let after_event = OnAfterToolResult::new(
            tool_use.name.clone(),
            Value::String(content.clone()),
            is_error,
            tool_use.id.clone(),
        );
        let after_outcome = self.hooks.run_after_tool_result(after_event).await;
        let content = match after_outcome.modified_content {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => content,
        };

        self.finish_tool_call(session_id, tool_use, content, is_error, tx).await;
    }

    /// Offloads oversized results to the blob store, appends the
    /// `tool_result` to the conversation, persists it, and emits the
    /// `TurnEvent::ToolResult`.
    async fn finish_tool_call(
        &self,
        session_id: uuid::Uuid,
        tool_use: &ToolUseBlock,
        content: String,
        is_error: bool,
        tx: &mpsc::Sender<TurnEvent>,
    ) {
        let final_content = if !is_error && content.len() > self.config.tool_offload_threshold {
            if let Some(persistence) = &self.persistence {
                match persistence.save_blob(session_id, &tool_use.name, content.clone().into_bytes()).await {
                    Ok(blob_id) => offload_reference(blob_id, &tool_use.name, content.len(), &content),
                    Err(err) => {
                        self.log_persistence_failure(&err);
                        content
                    }
                }
            } else {
                content
            }
        } else {
            content
        };

        let result_message = {
            let mut state = self.state.lock().await;
            state.conversation.add_tool_result(tool_use.id.clone(), final_content.clone(), is_error);
            state.conversation.messages().last().cloned().expect("just pushed")
        };
        self.persist(session_id, &result_message).await;

        let _ = tx
            .send(TurnEvent::ToolResult {
                id: tool_use.id.clone(),
                name: tool_use.name.clone(),
                content: final_content,
                is_error,
            })
            .await;
    }

    async fn emit_terminal(&self, tx: &mpsc::Sender<TurnEvent>, error: TurnError) {
        let _ = tx.send(TurnEvent::Error { kind: error.kind().to_string(), detail: error.to_string() }).await;
        let _ = tx.send(TurnEvent::Done).await;
    }
}

fn parse_tool_input(buffer: &str) -> Value {
    if buffer.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(buffer).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{AutoApproveDefaults, Composite, SessionApprovalCache, TrustRuleChecker};
    use crate::provider::testing::ScriptedProvider;
    use crate::tools::tool;
    use serde_json::json;

    fn test_agent(provider: ScriptedProvider, tools: ToolRegistry) -> Agent {
        let session = Session::new("test-model", "/repo", "be helpful");
        let config = AgentConfig::default();
        let approval = Arc::new(Composite::canonical(
            SessionApprovalCache::new(),
            TrustRuleChecker::new(&[]),
            AutoApproveDefaults::new(Vec::<String>::new()),
        ));
        Agent::new(session, config, tools, approval, Hooks::new(), Arc::new(provider))
    }

    #[tokio::test]
    async fn test_text_only_turn_emits_delta_then_done() {
        let provider = ScriptedProvider::single(vec![
            StreamEvent::TextDelta { text: "Hello".to_string() },
            StreamEvent::Stop,
        ]);
        let agent = test_agent(provider, ToolRegistry::new());

        let mut stream = agent.run_turn("hi", CancellationToken::new());
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert!(matches!(events[0], TurnEvent::TextDelta { .. }));
        assert!(matches!(events.last().unwrap(), TurnEvent::Done));
        assert_eq!(agent.conversation().await.len(), 2);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let scripts = vec![
            vec![
                StreamEvent::ToolUse { id: "t1".to_string(), name: "echo".to_string() },
                StreamEvent::TextDelta { text: "{}".to_string() },
                StreamEvent::Stop,
            ],
            vec![StreamEvent::TextDelta { text: "done".to_string() }, StreamEvent::Stop],
        ];
        let provider = ScriptedProvider::sequence(scripts);

        let mut registry = ToolRegistry::new();
        registry.register(tool("echo", "echoes").build(|_args| async move { Ok(json!("ok")) }));

        let agent = test_agent(provider, registry);
        let mut stream = agent.run_turn("run echo", CancellationToken::new());

        let mut saw_tool_call = false;
        let mut saw_tool_result = false;
        while let Some(event) = stream.next().await {
            match event {
                TurnEvent::ToolCall { name, .. } if name == "echo" => saw_tool_call = true,
                TurnEvent::ToolResult { is_error, .. } => saw_tool_result = !is_error,
                _ => {}
            }
        }

        assert!(saw_tool_call);
        assert!(saw_tool_result);
    }

    #[tokio::test]
    async fn test_tool_denied_synthesizes_error_result() {
        let scripts = vec![vec![
            StreamEvent::ToolUse { id: "t1".to_string(), name: "shell".to_string() },
            StreamEvent::TextDelta { text: "{}".to_string() },
            StreamEvent::Stop,
        ]];
        let provider = ScriptedProvider::sequence(scripts);

        let mut registry = ToolRegistry::new();
        registry.register(tool("shell", "runs a shell command").build(|_args| async move { Ok(json!("should not run")) }));

        let session = Session::new("test-model", "/repo", "be helpful");
        let config = AgentConfig::builder().max_turns(1).build().unwrap();
        let approval = Arc::new(Composite::canonical(
            SessionApprovalCache::new(),
            TrustRuleChecker::new(&[]),
            AutoApproveDefaults::new(Vec::<String>::new()),
        ));
        let agent = Agent::new(session, config, registry, approval, Hooks::new(), Arc::new(provider));

        let mut stream = agent.run_turn("rm -rf /", CancellationToken::new());
        let mut denied_content = None;
        while let Some(event) = stream.next().await {
            if let TurnEvent::ToolResult { is_error, content, .. } = event {
                assert!(is_error);
                denied_content = Some(content);
            }
        }
        assert_eq!(denied_content.as_deref(), Some("tool call denied by user"));
    }

    struct AlwaysApprove;

    #[async_trait::async_trait]
    impl crate::approval::ApprovalCallback for AlwaysApprove {
        async fn ask(&self, _tool: &str, _input: &Value, _cancel: &CancellationToken) -> bool {
            true
        }
    }

    struct AlwaysDeny;

    #[async_trait::async_trait]
    impl crate::approval::ApprovalCallback for AlwaysDeny {
        async fn ask(&self, _tool: &str, _input: &Value, _cancel: &CancellationToken) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_approval_callback_approves_tool_requiring_approval() {
        let scripts = vec![
            vec![
                StreamEvent::ToolUse { id: "t1".to_string(), name: "shell".to_string() },
                StreamEvent::TextDelta { text: "{}".to_string() },
                StreamEvent::Stop,
            ],
            vec![StreamEvent::TextDelta { text: "done".to_string() }, StreamEvent::Stop],
        ];
        let provider = ScriptedProvider::sequence(scripts);

        let mut registry = ToolRegistry::new();
        registry.register(tool("shell", "runs a shell command").build(|_args| async move { Ok(json!("ran")) }));

        let agent = test_agent(provider, registry).with_approval_callback(Arc::new(AlwaysApprove));

        let mut stream = agent.run_turn("run something", CancellationToken::new());
        let mut saw_ok_result = false;
        while let Some(event) = stream.next().await {
            if let TurnEvent::ToolResult { is_error, .. } = event {
                assert!(!is_error);
                saw_ok_result = true;
            }
        }
        assert!(saw_ok_result);
    }

    #[tokio::test]
    async fn test_approval_callback_denial_synthesizes_denied_message() {
        let scripts = vec![vec![
            StreamEvent::ToolUse { id: "t1".to_string(), name: "shell".to_string() },
            StreamEvent::TextDelta { text: "{}".to_string() },
            StreamEvent::Stop,
        ]];
        let provider = ScriptedProvider::sequence(scripts);

        let mut registry = ToolRegistry::new();
        registry.register(tool("shell", "runs a shell command").build(|_args| async move { Ok(json!("should not run")) }));

        let agent = test_agent(provider, registry).with_approval_callback(Arc::new(AlwaysDeny));

        let mut stream = agent.run_turn("run something", CancellationToken::new());
        let mut denied_content = None;
        while let Some(event) = stream.next().await {
            if let TurnEvent::ToolResult { is_error, content, .. } = event {
                assert!(is_error);
                denied_content = Some(content);
            }
        }
        assert_eq!(denied_content.as_deref(), Some("tool call denied by user"));
    }

    #[tokio::test]
    async fn test_scratchpad_render_reaches_system_prompt() {
        struct RecordingProvider {
            seen_system: parking_lot::Mutex<Vec<String>>,
        }

        #[async_trait::async_trait]
        impl Provider for RecordingProvider {
            async fn stream(
                &self,
                request: CompletionRequest,
                _cancel: CancellationToken,
            ) -> crate::Result<crate::provider::BoxStream<crate::Result<StreamEvent>>> {
                self.seen_system.lock().push(request.system);
                let events = vec![Ok(StreamEvent::TextDelta { text: "ok".to_string() }), Ok(StreamEvent::Stop)];
                Ok(Box::pin(futures::stream::iter(events)))
            }
        }

        let provider = Arc::new(RecordingProvider { seen_system: parking_lot::Mutex::new(Vec::new()) });
        let session = Session::new("test-model", "/repo", "be helpful");
        let approval = Arc::new(Composite::canonical(
            SessionApprovalCache::new(),
            TrustRuleChecker::new(&[]),
            AutoApproveDefaults::new(Vec::<String>::new()),
        ));
        let agent = Agent::new(session, AgentConfig::default(), ToolRegistry::new(), approval, Hooks::new(), provider.clone());

        agent.scratchpad().set("plan", "investigate the bug");

        let mut stream = agent.run_turn("hi", CancellationToken::new());
        while stream.next().await.is_some() {}

        let seen = provider.seen_system.lock();
        assert!(seen[0].contains("investigate the bug"));
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_non_terminal() {
        let provider = ScriptedProvider::single(vec![
            StreamEvent::TextDelta { text: "partial".to_string() },
            StreamEvent::Error { detail: "upstream hiccup".to_string() },
            StreamEvent::TextDelta { text: " more".to_string() },
            StreamEvent::Stop,
        ]);
        let agent = test_agent(provider, ToolRegistry::new());

        let mut stream = agent.run_turn("hi", CancellationToken::new());
        let mut saw_error = false;
        let mut saw_done = false;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                TurnEvent::TextDelta { text: delta } => text.push_str(&delta),
                TurnEvent::Error { kind, .. } => {
                    assert_eq!(kind, "provider_stream_event");
                    saw_error = true;
                }
                TurnEvent::Done => saw_done = true,
                _ => {}
            }
        }

        assert!(saw_error);
        assert!(saw_done);
        assert_eq!(text, "partial more");
    }

    #[tokio::test]
    async fn test_max_turns_exceeded_is_terminal() {
        let provider = ScriptedProvider::single(vec![
            StreamEvent::ToolUse { id: "t1".to_string(), name: "echo".to_string() },
            StreamEvent::TextDelta { text: "{}".to_string() },
            StreamEvent::Stop,
        ]);
        let mut registry = ToolRegistry::new();
        registry.register(tool("echo", "echoes").build(|_args| async move { Ok(json!("ok")) }));

        let session = Session::new("test-model", "/repo", "be helpful");
        let config = AgentConfig::builder().max_turns(1).build().unwrap();
        let approval = Arc::new(Composite::canonical(
            SessionApprovalCache::new(),
            TrustRuleChecker::new(&[]),
            AutoApproveDefaults::new(["echo"]),
        ));
        let agent = Agent::new(session, config, registry, approval, Hooks::new(), Arc::new(provider));

        let mut stream = agent.run_turn("loop forever", CancellationToken::new());
        let mut saw_max_turns_error = false;
        while let Some(event) = stream.next().await {
            if let TurnEvent::Error { kind, .. } = event {
                saw_max_turns_error = kind == "max_turns_exceeded";
            }
        }
        assert!(saw_max_turns_error);
    }

    #[tokio::test]
    async fn test_cancellation_before_turn_emits_cancelled() {
        let provider = ScriptedProvider::single(vec![StreamEvent::Stop]);
        let agent = test_agent(provider, ToolRegistry::new());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut stream = agent.run_turn("hi", cancel);
        let mut saw_cancelled = false;
        while let Some(event) = stream.next().await {
            if let TurnEvent::Error { kind, .. } = event {
                saw_cancelled = kind == "cancelled";
            }
        }
        assert!(saw_cancelled);
    }
}

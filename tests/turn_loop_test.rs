//! Integration tests for the turn loop: exercises `Agent` end to end
//! against `ScriptedProvider`, covering the text-only path, tool
//! round-trips, approval denial, hook cancellation, cancellation before a
//! turn starts, the max-turns guard, and prompt-fragment assembly.

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde_json::json;
use std::sync::Arc;
use turnloop_core::approval::{AutoApproveDefaults, Composite, SessionApprovalCache, TrustRuleChecker};
use turnloop_core::hooks::{HookOutcome, Hooks, PromptFragmentProvider};
use turnloop_core::provider::testing::ScriptedProvider;
use turnloop_core::provider::{BoxStream, CancellationToken, CompletionRequest, Provider, StreamEvent};
use turnloop_core::types::{TrustAction, TrustRule};
use turnloop_core::{tool, Agent, AgentConfig, Session, ToolRegistry, TurnEvent};

fn session() -> Session {
    Session::new("test-model", "/repo", "You are a helpful assistant")
}

fn no_tools_allowed() -> Arc<Composite> {
    Arc::new(Composite::new(vec![Box::new(TrustRuleChecker::new(&[]))]))
}

#[tokio::test]
async fn text_only_turn_streams_delta_then_done() {
    let provider = Arc::new(ScriptedProvider::single(vec![
        StreamEvent::TextDelta { text: "Hello, ".to_string() },
        StreamEvent::TextDelta { text: "world.".to_string() },
        StreamEvent::Stop,
    ]));

    let agent = Agent::new(
        session(),
        AgentConfig::builder().build().unwrap(),
        ToolRegistry::new(),
        no_tools_allowed(),
        Hooks::new(),
        provider,
    );

    let mut stream = agent.run_turn("hi", CancellationToken::new());

    let mut text = String::new();
    let mut saw_done = false;
    while let Some(event) = stream.next().await {
        match event {
            TurnEvent::TextDelta { text: delta } => text.push_str(&delta),
            TurnEvent::Done => {
                saw_done = true;
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert_eq!(text, "Hello, world.");
    assert!(saw_done);
    assert_eq!(agent.conversation().await.len(), 2);
}

#[tokio::test]
async fn tool_call_executes_and_feeds_result_back() {
    let provider = Arc::new(ScriptedProvider::sequence(vec![
        vec![
            StreamEvent::ToolUse { id: "call-1".to_string(), name: "echo".to_string() },
            StreamEvent::TextDelta { text: r#"{"message":"hi"}"#.to_string() },
            StreamEvent::Stop,
        ],
        vec![StreamEvent::TextDelta { text: "done".to_string() }, StreamEvent::Stop],
    ]));

    let mut tools = ToolRegistry::new();
    tools.register(tool("echo", "echoes its input").param("message", "string").build(|args| async move {
        Ok(json!({"echoed": args["message"]}))
    }));

    let approval = Arc::new(Composite::new(vec![Box::new(AutoApproveDefaults::new(["echo"]))]));

    let agent = Agent::new(session(), AgentConfig::builder().build().unwrap(), tools, approval, Hooks::new(), provider);

    let mut stream = agent.run_turn("please echo hi", CancellationToken::new());

    let mut saw_tool_call = false;
    let mut saw_ok_result = false;
    while let Some(event) = stream.next().await {
        match event {
            TurnEvent::ToolCall { name, .. } => {
                assert_eq!(name, "echo");
                saw_tool_call = true;
            }
            TurnEvent::ToolResult { is_error, .. } => {
                assert!(!is_error);
                saw_ok_result = true;
            }
            TurnEvent::Done => break,
            _ => {}
        }
    }

    assert!(saw_tool_call);
    assert!(saw_ok_result);
}

#[tokio::test]
async fn tool_call_denied_by_approval_synthesizes_error_result() {
    let provider = Arc::new(ScriptedProvider::single(vec![
        StreamEvent::ToolUse { id: "call-1".to_string(), name: "shell".to_string() },
        StreamEvent::TextDelta { text: "{}".to_string() },
        StreamEvent::Stop,
    ]));

    let mut tools = ToolRegistry::new();
    tools.register(tool("shell", "runs a shell command").build(|_args| async move { Ok(json!("ran")) }));

    let agent = Agent::new(
        session(),
        AgentConfig::builder().build().unwrap(),
        tools,
        no_tools_allowed(),
        Hooks::new(),
        provider,
    );

    let mut stream = agent.run_turn("run rm -rf /", CancellationToken::new());

    let mut denied = false;
    while let Some(event) = stream.next().await {
        if let TurnEvent::ToolResult { is_error, .. } = event {
            assert!(is_error);
            denied = true;
        }
    }

    assert!(denied);
}

#[tokio::test]
async fn before_tool_call_hook_cancels_execution() {
    let provider = Arc::new(ScriptedProvider::single(vec![
        StreamEvent::ToolUse { id: "call-1".to_string(), name: "delete_file".to_string() },
        StreamEvent::TextDelta { text: "{}".to_string() },
        StreamEvent::Stop,
    ]));

    let mut tools = ToolRegistry::new();
    tools.register(tool("delete_file", "deletes a file").build(|_args| async move { Ok(json!("deleted")) }));

    let approval = Arc::new(Composite::new(vec![Box::new(AutoApproveDefaults::new(["delete_file"]))]));
    let hooks = Hooks::new().add_before_tool_call(|event| async move {
        if event.tool_name == "delete_file" {
            return HookOutcome::cancel("destructive tool blocked in test");
        }
        HookOutcome::default()
    });

    let agent = Agent::new(session(), AgentConfig::builder().build().unwrap(), tools, approval, hooks, provider);

    let mut stream = agent.run_turn("delete the file", CancellationToken::new());

    let mut blocked = false;
    while let Some(event) = stream.next().await {
        if let TurnEvent::ToolResult { is_error, content, .. } = event {
            assert!(is_error);
            assert!(content.contains("blocked"));
            blocked = true;
        }
    }

    assert!(blocked);
}

#[tokio::test]
async fn pre_cancelled_token_emits_cancelled_error() {
    let provider = Arc::new(ScriptedProvider::single(vec![StreamEvent::Stop]));
    let agent = Agent::new(
        session(),
        AgentConfig::builder().build().unwrap(),
        ToolRegistry::new(),
        no_tools_allowed(),
        Hooks::new(),
        provider,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut stream = agent.run_turn("hi", cancel);

    let mut saw_cancelled = false;
    while let Some(event) = stream.next().await {
        if let TurnEvent::Error { kind, .. } = event {
            assert_eq!(kind, "cancelled");
            saw_cancelled = true;
        }
    }

    assert!(saw_cancelled);
}

#[tokio::test]
async fn exceeding_max_turns_is_terminal() {
    // The model keeps calling a tool forever; with max_turns(1) the second
    // iteration of the loop must terminate instead of looping forever.
    let provider = Arc::new(ScriptedProvider::single(vec![
        StreamEvent::ToolUse { id: "call".to_string(), name: "noop".to_string() },
        StreamEvent::TextDelta { text: "{}".to_string() },
        StreamEvent::Stop,
    ]));

    let mut tools = ToolRegistry::new();
    tools.register(tool("noop", "does nothing").build(|_args| async move { Ok(json!("ok")) }));

    let approval = Arc::new(Composite::new(vec![Box::new(AutoApproveDefaults::new(["noop"]))]));
    let config = AgentConfig::builder().max_turns(1).build().unwrap();

    let agent = Agent::new(session(), config, tools, approval, Hooks::new(), provider);

    let mut stream = agent.run_turn("loop forever", CancellationToken::new());

    let mut saw_max_turns = false;
    while let Some(event) = stream.next().await {
        if let TurnEvent::Error { kind, .. } = event {
            if kind == "max_turns_exceeded" {
                saw_max_turns = true;
            }
        }
    }

    assert!(saw_max_turns);
}

#[tokio::test]
async fn trust_rule_approves_matching_tool_without_auto_approve_default() {
    let provider = Arc::new(ScriptedProvider::single(vec![
        StreamEvent::ToolUse { id: "call".to_string(), name: "git".to_string() },
        StreamEvent::TextDelta { text: r#"{"command":"status"}"#.to_string() },
        StreamEvent::Stop,
    ]));

    let mut tools = ToolRegistry::new();
    tools.register(tool("git", "runs git").param("command", "string").build(|args| async move { Ok(args) }));

    let rule = TrustRule::new("git", "status", TrustAction::Allow);
    let approval = Arc::new(Composite::new(vec![
        Box::new(SessionApprovalCache::new()),
        Box::new(TrustRuleChecker::new(&[rule])),
    ]));

    let agent =
        Agent::new(session(), AgentConfig::builder().build().unwrap(), tools, approval, Hooks::new(), provider);

    let mut stream = agent.run_turn("check git status", CancellationToken::new());

    let mut approved = false;
    while let Some(event) = stream.next().await {
        if let TurnEvent::ToolResult { is_error, .. } = event {
            assert!(!is_error);
            approved = true;
        }
    }

    assert!(approved);
}

/// Captures the `system` string of every request it receives, then replies
/// with a fixed script. Used to check that registered prompt fragments
/// actually reach the provider.
struct RecordingProvider {
    script: Vec<StreamEvent>,
    seen_system: Arc<SyncMutex<Vec<String>>>,
}

#[async_trait]
impl Provider for RecordingProvider {
    async fn stream(
        &self,
        request: CompletionRequest,
        _cancel: CancellationToken,
    ) -> turnloop_core::Result<BoxStream<turnloop_core::Result<StreamEvent>>> {
        self.seen_system.lock().push(request.system);
        let events: Vec<turnloop_core::Result<StreamEvent>> = self.script.clone().into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

struct StaticFragments(Vec<(String, String)>);

impl PromptFragmentProvider for StaticFragments {
    fn fragments(&self) -> Vec<(String, String)> {
        self.0.clone()
    }
}

#[tokio::test]
async fn registered_fragment_providers_reach_the_system_prompt() {
    let seen_system = Arc::new(SyncMutex::new(Vec::new()));
    let provider = Arc::new(RecordingProvider {
        script: vec![StreamEvent::TextDelta { text: "ok".to_string() }, StreamEvent::Stop],
        seen_system: seen_system.clone(),
    });

    let agent = Agent::new(
        session(),
        AgentConfig::builder().build().unwrap(),
        ToolRegistry::new(),
        no_tools_allowed(),
        Hooks::new(),
        provider,
    );

    agent.register_fragment_provider(Arc::new(StaticFragments(vec![(
        "style-guide".to_string(),
        "prefer tabs".to_string(),
    )])));

    let mut stream = agent.run_turn("hi", CancellationToken::new());
    while stream.next().await.is_some() {}

    let systems = seen_system.lock();
    assert_eq!(systems.len(), 1);
    assert!(systems[0].contains("style-guide"));
    assert!(systems[0].contains("prefer tabs"));
}

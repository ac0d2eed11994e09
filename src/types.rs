//! Core data model: content blocks, messages, conversations, sessions, and trust rules.
//!
//! This module holds the types every other module in the crate builds on. The
//! conversation-facing types (`ContentBlock`, `Message`, `Conversation`,
//! `ConversationSignals`) are the log the Turn Orchestrator mutates; `Session`
//! and `TrustRule` are the persisted/config-facing counterparts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

// ============================================================================
// CONTENT BLOCKS
// ============================================================================

/// The tagged-variant atom of a message.
///
/// A conversation's content model has exactly four cases. `Thinking` is
/// reserved: its body round-trips unchanged and is never interpreted by the
/// core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    Thinking(ThinkingBlock),
}

impl ContentBlock {
    /// Byte length contribution used by the token estimator (`context::estimate_tokens`).
    pub fn estimator_bytes(&self) -> usize {
        match self {
            ContentBlock::Text(t) => t.text.len(),
            ContentBlock::ToolUse(t) => t.id.len() + t.name.len() + t.input.to_string().len(),
            ContentBlock::ToolResult(r) => r.tool_use_id.len() + r.text.len(),
            ContentBlock::Thinking(t) => t.body.to_string().len(),
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse(_))
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult(_))
    }

    pub fn is_error_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult(r) if r.is_error)
    }

    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultBlock> {
        match self {
            ContentBlock::ToolResult(r) => Some(r),
            _ => None,
        }
    }
}

/// Plain assistant- or user-authored text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A request, from the model, to invoke a tool.
///
/// `input` is kept as a structured `Value` rather than an opaque byte string
/// because the core needs structural access to it: the approval engine
/// recursively extracts string leaves from it, and the token estimator needs
/// its serialized length. The wire boundary (the concrete provider
/// implementations in [`crate::provider`]) is responsible for the
/// string-encoded-JSON quirk some APIs use on the way in and out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The outcome of executing a tool call, always paired with the `tool_use.id`
/// it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub text: String,
    pub is_error: bool,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, text: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            text: text.into(),
            is_error,
        }
    }
}

/// Reserved block kind. Passes through unchanged; the core never inspects
/// `body`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub body: Value,
}

// ============================================================================
// MESSAGES & CONVERSATION
// ============================================================================

/// Who authored a message. `system` is never stored in the log — it rides
/// out-of-band on the request as `Conversation::system_prompt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn's worth of content from a single author.
///
/// `content` must be a non-empty ordered sequence; callers are responsible
/// for the invariant (the constructors here never produce an empty one from
/// a non-empty input, but `Conversation` does not itself re-validate it on
/// every mutation — see its module docs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::Text(TextBlock::new(text))],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    pub fn user_with_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content,
        }
    }

    /// A user-role message carrying a single tool result, the shape the
    /// orchestrator appends after executing a tool call.
    pub fn tool_result(tool_use_id: impl Into<String>, text: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::ToolResult(ToolResultBlock::new(
                tool_use_id,
                text,
                is_error,
            ))],
        }
    }

    /// Every `tool_use.id` present in this message's content, in order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| b.as_tool_use())
            .map(|t| t.id.as_str())
            .collect()
    }

    /// Whether this message's content is solely a single tool result with no
    /// accompanying blocks (the "bare tool_result" shape forbidden as the
    /// first message of a conversation after compaction).
    pub fn is_bare_tool_result(&self) -> bool {
        self.content.len() == 1 && self.content[0].is_tool_result()
    }

    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(ContentBlock::is_tool_use)
    }

    pub fn has_tool_result(&self) -> bool {
        self.content.iter().any(ContentBlock::is_tool_result)
    }

    pub fn has_error_tool_result(&self) -> bool {
        self.content.iter().any(ContentBlock::is_error_tool_result)
    }
}

/// Derived view over a conversation's recent shape, used to tune compaction
/// aggressiveness (see [`crate::context`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversationSignals {
    pub error_density: f32,
    pub tool_call_density: f32,
    pub message_count: usize,
}

impl ConversationSignals {
    pub fn compute(messages: &[Message]) -> Self {
        let message_count = messages.len();
        if message_count == 0 {
            return Self {
                error_density: 0.0,
                tool_call_density: 0.0,
                message_count: 0,
            };
        }

        let error_count = messages.iter().filter(|m| m.has_error_tool_result()).count();
        let tool_count = messages
            .iter()
            .filter(|m| m.has_tool_use() || m.has_tool_result())
            .count();

        Self {
            error_density: error_count as f32 / message_count as f32,
            tool_call_density: tool_count as f32 / message_count as f32,
            message_count,
        }
    }
}

/// The append-only (until compacted) message log for one agent session.
///
/// Owned exclusively by its `Agent`; every mutation goes through the methods
/// below so invariants (non-empty content, `tool_use`/`tool_result` pairing)
/// stay enforceable at one seam. `messages()` hands back a defensive copy —
/// callers can't mutate the log by holding a reference into it.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub system_prompt: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
        }
    }

    pub fn add_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn add_assistant(&mut self, blocks: Vec<ContentBlock>) {
        if blocks.is_empty() {
            return;
        }
        self.messages.push(Message::assistant(blocks));
    }

    pub fn add_tool_result(&mut self, tool_use_id: impl Into<String>, text: impl Into<String>, is_error: bool) {
        self.messages
            .push(Message::tool_result(tool_use_id, text, is_error));
    }

    pub fn load_from_messages(&mut self, msgs: Vec<Message>) {
        self.messages = msgs;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// A defensive copy of the message log.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn signals(&self) -> ConversationSignals {
        ConversationSignals::compute(&self.messages)
    }

    /// Replace the whole message list. Used internally by the context
    /// manager's compaction strategies, which operate on an owned `Vec` and
    /// write the result back in one shot.
    pub(crate) fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }
}

// ============================================================================
// SESSION (PERSISTENCE-FACING HEADER)
// ============================================================================

/// The persisted header for one conversation, independent of the message log
/// itself (see [`crate::persistence`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: uuid::Uuid,
    pub model: String,
    pub working_dir: String,
    pub system_prompt: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub token_count: usize,
    pub title: String,
}

impl Session {
    pub fn new(model: impl Into<String>, working_dir: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            model: model.into(),
            working_dir: working_dir.into(),
            system_prompt: system_prompt.into(),
            created_at: now,
            updated_at: now,
            token_count: 0,
            title: String::new(),
        }
    }
}

// ============================================================================
// TRUST RULES
// ============================================================================

/// A single pattern-based approval rule.
///
/// `tool` is either a literal tool name or `"*"` (matches any tool). The
/// pattern is stored as a string here — it's compiled once by the approval
/// engine (see [`crate::approval::TrustRuleChecker`]) since `regex::Regex`
/// doesn't round-trip through `Deserialize` the way this plain struct needs
/// to for config loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRule {
    pub tool: String,
    pub pattern: String,
    pub action: TrustAction,
}

impl TrustRule {
    pub fn new(tool: impl Into<String>, pattern: impl Into<String>, action: TrustAction) -> Self {
        Self {
            tool: tool.into(),
            pattern: pattern.into(),
            action,
        }
    }

    pub fn matches_tool(&self, tool: &str) -> bool {
        self.tool == "*" || self.tool == tool
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustAction {
    Allow,
    Deny,
}

/// Recursively extract every string leaf from a tool-call input JSON value.
///
/// `string -> [s]`; `object -> union over values`; `array -> union over
/// elements`; anything else contributes nothing. Used by the approval
/// engine's pattern matching (§4.3) — factored out here since it's a pure
/// function over the data model, not approval-specific policy.
pub fn extract_string_leaves(value: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    collect_string_leaves(value, &mut out);
    out
}

fn collect_string_leaves<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s.as_str()),
        Value::Object(map) => {
            for v in map.values() {
                collect_string_leaves(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_string_leaves(v, out);
            }
        }
        _ => {}
    }
}

/// Distinct tool names referenced anywhere in a rule set — used by config
/// validation to report unknown-tool typos without hard-failing rule
/// compilation.
pub fn trust_rule_tool_names(rules: &[TrustRule]) -> HashSet<&str> {
    rules.iter().map(|r| r.tool.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversation_basic_flow() {
        let mut convo = Conversation::new("system prompt");
        convo.add_user("hello");
        convo.add_assistant(vec![ContentBlock::Text(TextBlock::new("hi"))]);
        assert_eq!(convo.len(), 2);
        assert_eq!(convo.messages()[0].role, MessageRole::User);
    }

    #[test]
    fn test_add_assistant_empty_is_noop() {
        let mut convo = Conversation::new("");
        convo.add_assistant(vec![]);
        assert_eq!(convo.len(), 0);
    }

    #[test]
    fn test_signals_empty() {
        let convo = Conversation::new("");
        let sig = convo.signals();
        assert_eq!(sig.message_count, 0);
        assert_eq!(sig.error_density, 0.0);
    }

    #[test]
    fn test_signals_error_and_tool_density() {
        let mut convo = Conversation::new("");
        convo.add_user("x");
        convo.add_assistant(vec![ContentBlock::ToolUse(ToolUseBlock::new(
            "t1", "shell", json!({}),
        ))]);
        convo.add_tool_result("t1", "boom", true);

        let sig = convo.signals();
        assert_eq!(sig.message_count, 3);
        assert!(sig.error_density > 0.0);
        assert!(sig.tool_call_density > 0.0);
    }

    #[test]
    fn test_is_bare_tool_result() {
        let msg = Message::tool_result("t1", "ok", false);
        assert!(msg.is_bare_tool_result());

        let msg2 = Message::user("hi");
        assert!(!msg2.is_bare_tool_result());
    }

    #[test]
    fn test_extract_string_leaves_nested() {
        let value = json!({
            "command": "rm -rf /",
            "flags": ["-f", "-r"],
            "nested": {"note": "danger"},
            "count": 3,
        });
        let mut leaves = extract_string_leaves(&value);
        leaves.sort();
        assert_eq!(leaves, vec!["-f", "-r", "danger", "rm -rf /"]);
    }

    #[test]
    fn test_trust_rule_matches_tool() {
        let wildcard = TrustRule::new("*", ".*", TrustAction::Deny);
        assert!(wildcard.matches_tool("shell"));

        let specific = TrustRule::new("shell", ".*", TrustAction::Deny);
        assert!(specific.matches_tool("shell"));
        assert!(!specific.matches_tool("file"));
    }
}

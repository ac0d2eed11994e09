//! Context Manager: token estimation and the multi-strategy compaction chain.
//!
//! `Compact` mutates a [`Conversation`] in place so its estimated token count
//! fits a budget, running strategies lightest-first and stopping as soon as
//! the estimate is within budget. The default chain is
//! [`ToolResultClearing`] → [`Summarization`] (only if a summarizer is
//! configured) → [`Truncation`] (mandatory last resort).

use crate::types::{ContentBlock, Conversation, ConversationSignals, Message};
use async_trait::async_trait;

/// `chars / 4 + 10` per block, `len(system_prompt)/4 + 10` for the header.
/// Pure and deterministic by construction — no wall-clock, no randomness.
pub fn estimate_tokens(system_prompt: &str, messages: &[Message]) -> usize {
    let mut total = system_prompt.len() / 4 + 10;
    for message in messages {
        for block in &message.content {
            total += block.estimator_bytes() / 4 + 10;
        }
    }
    total
}

pub fn estimate_conversation_tokens(conversation: &Conversation) -> usize {
    let messages = conversation.messages();
    estimate_tokens(&conversation.system_prompt, &messages)
}

/// Whether compaction should run: hard budget breach, or proactively over
/// `trigger_ratio * budget`.
pub fn should_compact(estimated: usize, budget: usize, trigger_ratio: f32) -> bool {
    if estimated > budget {
        return true;
    }
    let threshold = (budget as f32 * trigger_ratio) as usize;
    estimated > threshold
}

/// A single compaction strategy: a pure-ish function over
/// `(messages, budget) -> messages`, with an optional opt-in signal feed.
#[async_trait]
pub trait CompactionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once per `Compact` invocation before `apply`, with the signals
    /// computed over the conversation as it stood at the start of
    /// compaction. Strategies that don't need signals can ignore this (the
    /// default is a no-op).
    fn set_signals(&mut self, _signals: ConversationSignals) {}

    async fn apply(&mut self, system_prompt: &str, messages: Vec<Message>, budget: usize) -> Vec<Message>;
}

// ============================================================================
// STRATEGY 1: TOOL RESULT CLEARING
// ============================================================================

pub struct ToolResultClearing {
    /// Default 1024 bytes; shrunk 3/4 in tool-heavy sessions.
    pub size_threshold: usize,
    signals: ConversationSignals,
}

impl Default for ToolResultClearing {
    fn default() -> Self {
        Self {
            size_threshold: 1024,
            signals: ConversationSignals {
                error_density: 0.0,
                tool_call_density: 0.0,
                message_count: 0,
            },
        }
    }
}

impl ToolResultClearing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(size_threshold: usize) -> Self {
        Self { size_threshold, ..Self::default() }
    }

    /// The oldest-portion cutoff, as a fraction of message count, and the
    /// effective size threshold, both derived from the last signals seen.
    fn oldest_fraction_and_threshold(&self) -> (f32, usize) {
        if self.signals.error_density > 0.30 {
            (0.35, self.size_threshold)
        } else if self.signals.tool_call_density > 0.60 {
            (0.65, self.size_threshold * 3 / 4)
        } else {
            (0.50, self.size_threshold)
        }
    }
}

#[async_trait]
impl CompactionStrategy for ToolResultClearing {
    fn name(&self) -> &'static str {
        "tool_result_clearing"
    }

    fn set_signals(&mut self, signals: ConversationSignals) {
        self.signals = signals;
    }

    async fn apply(&mut self, _system_prompt: &str, mut messages: Vec<Message>, _budget: usize) -> Vec<Message> {
        if messages.is_empty() {
            return messages;
        }

        let (fraction, threshold) = self.oldest_fraction_and_threshold();
        let cutoff = ((messages.len() as f32) * fraction).round() as usize;

        for message in messages.iter_mut().take(cutoff) {
            for block in message.content.iter_mut() {
                if let ContentBlock::ToolResult(result) = block {
                    if result.text.len() >= threshold {
                        let original_len = result.text.len();
                        result.text = format!("[Tool result cleared — was {original_len} bytes]");
                    }
                }
            }
        }

        messages
    }
}

// ============================================================================
// STRATEGY 2: SUMMARIZATION (OPTIONAL)
// ============================================================================

/// A single round-trip summarization call. No concrete (LLM-backed)
/// implementation ships with the core — only this trait and the
/// deterministic [`FixedSummarizer`] test double below.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> crate::Result<String>;
}

/// Test/reference summarizer that returns a fixed string regardless of
/// input, useful for exercising the inflation-rejection path deterministically.
pub struct FixedSummarizer {
    pub summary: String,
}

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, _messages: &[Message]) -> crate::Result<String> {
        Ok(self.summary.clone())
    }
}

pub struct Summarization {
    summarizer: Box<dyn Summarizer>,
    /// Default 20 messages.
    pub message_threshold: usize,
    /// Message count of the last failed/inflated attempt; a repeat call with
    /// an identical count short-circuits to a no-op, per §4.2.
    last_failed_count: Option<usize>,
}

impl Summarization {
    pub fn new(summarizer: Box<dyn Summarizer>) -> Self {
        Self {
            summarizer,
            message_threshold: 20,
            last_failed_count: None,
        }
    }

    /// Find the split index: target 60% of message count, then scan
    /// backward past any tool_use/tool_result boundary so a pair never
    /// crosses the split; clamp to >= 2.
    fn find_split_index(messages: &[Message]) -> usize {
        let target = ((messages.len() as f32) * 0.60).round() as usize;
        let mut split = target.max(2).min(messages.len());

        while split > 2 {
            let boundary_is_safe = match messages.get(split) {
                None => true,
                Some(next) => {
                    let prev_has_tool_use = messages[split - 1].has_tool_use();
                    let next_is_bare_tool_result = next.is_bare_tool_result();
                    !(prev_has_tool_use && next_is_bare_tool_result) && !next_is_bare_tool_result
                }
            };
            if boundary_is_safe {
                break;
            }
            split -= 1;
        }

        split.max(2).min(messages.len())
    }
}

#[async_trait]
impl CompactionStrategy for Summarization {
    fn name(&self) -> &'static str {
        "summarization"
    }

    async fn apply(&mut self, _system_prompt: &str, messages: Vec<Message>, _budget: usize) -> Vec<Message> {
        let message_count = messages.len();

        if message_count < self.message_threshold {
            return messages;
        }

        if self.last_failed_count == Some(message_count) {
            // Identical failing shape seen before; short-circuit to a no-op.
            return messages;
        }

        if message_count < 2 {
            return messages;
        }

        let split = Self::find_split_index(&messages);
        let (prefix, suffix) = messages.split_at(split);

        let pre_estimate = estimate_tokens("", &messages);

        let summary_text = match self.summarizer.summarize(prefix).await {
            Ok(text) => text,
            Err(_) => {
                self.last_failed_count = Some(message_count);
                return prefix.iter().chain(suffix.iter()).cloned().collect();
            }
        };

        let summary_message = Message::user(format!(
            "[Summary of {} earlier messages]\n{}",
            prefix.len(),
            summary_text
        ));

        let mut replaced: Vec<Message> = vec![summary_message];
        replaced.extend_from_slice(suffix);

        let post_estimate = estimate_tokens("", &replaced);

        if post_estimate >= pre_estimate {
            self.last_failed_count = Some(message_count);
            let mut original = prefix.to_vec();
            original.extend_from_slice(suffix);
            return original;
        }

        self.last_failed_count = None;
        replaced
    }
}

// ============================================================================
// STRATEGY 3: TRUNCATION (MANDATORY LAST RESORT)
// ============================================================================

#[derive(Default)]
pub struct Truncation;

impl Truncation {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompactionStrategy for Truncation {
    fn name(&self) -> &'static str {
        "truncation"
    }

    async fn apply(&mut self, system_prompt: &str, mut messages: Vec<Message>, budget: usize) -> Vec<Message> {
        loop {
            if messages.len() <= 2 {
                return messages;
            }

            let estimated = estimate_tokens(system_prompt, &messages);
            if estimated <= budget {
                return messages;
            }

            // If the current first message is a bare tool_result, advance
            // past it before choosing the drop window so it's never left
            // orphaned.
            let mut drop_count = 2;
            if messages[0].is_bare_tool_result() {
                drop_count = 3;
            }

            if messages.len().saturating_sub(drop_count) < 2 {
                return messages;
            }

            messages.drain(0..drop_count.min(messages.len()));
        }
    }
}

// ============================================================================
// CONTEXT MANAGER: THE CHAIN
// ============================================================================

pub struct ContextManagerConfig {
    pub budget: usize,
    pub trigger_ratio: f32,
    /// Seeds `ToolResultClearing::size_threshold` (§6 `tool_clear_threshold`).
    pub tool_clear_threshold: usize,
    /// Seeds `Summarization::message_threshold` (§6 `summary_message_threshold`)
    /// once a summarizer is attached via [`ContextManager::add_summarizer`].
    pub summary_message_threshold: usize,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            budget: 32_000,
            trigger_ratio: 0.70,
            tool_clear_threshold: 1024,
            summary_message_threshold: 20,
        }
    }
}

/// Drives the ordered strategy chain against a conversation. Owns the
/// strategy instances so stateful ones (notably [`Summarization`]'s
/// failure-memoization) persist across calls.
pub struct ContextManager {
    config: ContextManagerConfig,
    strategies: Vec<Box<dyn CompactionStrategy>>,
    /// Injected sink for non-fatal compaction failures (§7: CompactionInflated
    /// / CompactionFailed are logged, never surfaced as turn errors).
    log_sink: Box<dyn Fn(&str) + Send + Sync>,
}

impl ContextManager {
    /// The default chain: ToolResultClearing, then Truncation. Summarization
    /// is opt-in — call [`ContextManager::with_summarizer`] to add it.
    pub fn new(config: ContextManagerConfig) -> Self {
        let tool_result_clearing = ToolResultClearing::with_threshold(config.tool_clear_threshold);
        Self {
            config,
            strategies: vec![Box::new(tool_result_clearing), Box::new(Truncation::new())],
            log_sink: Box::new(|msg| tracing::warn!(target: "context_manager", "{msg}")),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.add_summarizer(summarizer);
        self
    }

    /// Same as [`ContextManager::with_summarizer`], but by `&mut self` so it
    /// can be called on an already-constructed (and possibly shared) manager.
    pub fn add_summarizer(&mut self, summarizer: Box<dyn Summarizer>) {
        let mut summarization = Summarization::new(summarizer);
        summarization.message_threshold = self.config.summary_message_threshold;
        // Insert between ToolResultClearing (index 0) and Truncation.
        self.strategies.insert(1, Box::new(summarization));
    }

    pub fn with_log_sink(mut self, sink: Box<dyn Fn(&str) + Send + Sync>) -> Self {
        self.log_sink = sink;
        self
    }

    /// Mutates `conversation` in place so its estimated tokens are within
    /// budget, or leaves it at the two-message floor if that's impossible.
    pub async fn compact(&mut self, conversation: &mut Conversation) {
        let estimated = estimate_conversation_tokens(conversation);
        if !should_compact(estimated, self.config.budget, self.config.trigger_ratio) {
            return;
        }

        let signals = conversation.signals();
        let mut messages = conversation.messages();
        let system_prompt = conversation.system_prompt.clone();

        for strategy in self.strategies.iter_mut() {
            strategy.set_signals(signals);

            let before_len = messages.len();
            let before_estimate = estimate_tokens(&system_prompt, &messages);

            messages = strategy.apply(&system_prompt, messages, self.config.budget).await;

            let after_estimate = estimate_tokens(&system_prompt, &messages);
            if after_estimate >= before_estimate && messages.len() == before_len {
                (self.log_sink)(&format!(
                    "strategy '{}' made no progress ({} -> {} est. tokens)",
                    strategy.name(),
                    before_estimate,
                    after_estimate
                ));
            }

            if after_estimate <= self.config.budget {
                break;
            }
        }

        conversation.set_messages(messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageRole, TextBlock, ToolUseBlock};
    use serde_json::json;

    fn big_tool_result(bytes: usize) -> Message {
        Message::tool_result("t1", "x".repeat(bytes), false)
    }

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens("", &[]), 0 / 4 + 10);
    }

    #[test]
    fn test_estimate_tokens_deterministic() {
        let messages = vec![Message::user("hello world")];
        let a = estimate_tokens("sys", &messages);
        let b = estimate_tokens("sys", &messages);
        assert_eq!(a, b);
    }

    #[test]
    fn test_should_compact_hard_budget() {
        assert!(should_compact(100, 50, 0.70));
    }

    #[test]
    fn test_should_compact_proactive_trigger() {
        assert!(should_compact(80, 100, 0.70));
        assert!(!should_compact(50, 100, 0.70));
    }

    #[tokio::test]
    async fn test_tool_result_clearing_replaces_large_old_results() {
        let mut strategy = ToolResultClearing::new();
        let messages = vec![
            big_tool_result(2000),
            Message::assistant(vec![ContentBlock::Text(TextBlock::new("ok"))]),
            Message::user("next"),
            Message::assistant(vec![ContentBlock::Text(TextBlock::new("response"))]),
        ];

        let cleared = strategy.apply("", messages, 80).await;
        let first_text = match &cleared[0].content[0] {
            ContentBlock::ToolResult(r) => r.text.clone(),
            _ => panic!("expected tool result"),
        };
        assert!(first_text.starts_with("[Tool result cleared"));
    }

    #[tokio::test]
    async fn test_tool_result_clearing_respects_error_density_signal() {
        let mut strategy = ToolResultClearing::new();
        strategy.set_signals(ConversationSignals {
            error_density: 0.5,
            tool_call_density: 0.0,
            message_count: 10,
        });
        let (fraction, _) = strategy.oldest_fraction_and_threshold();
        assert_eq!(fraction, 0.35);
    }

    #[tokio::test]
    async fn test_summarization_rejects_inflation() {
        let inflated_summary = "x".repeat(6000);
        let summarizer = FixedSummarizer { summary: inflated_summary };
        let mut strategy = Summarization::new(Box::new(summarizer));
        strategy.message_threshold = 3;

        let messages = vec![
            Message::user("a"),
            Message::assistant(vec![ContentBlock::Text(TextBlock::new("b"))]),
            Message::user("c"),
        ];
        let before = messages.clone();

        let result = strategy.apply("", messages, 10).await;
        assert_eq!(result.len(), before.len());
    }

    #[tokio::test]
    async fn test_summarization_split_avoids_orphaning_tool_result() {
        let mut messages = Vec::new();
        for i in 0..10 {
            if i == 5 {
                messages.push(Message::assistant(vec![ContentBlock::ToolUse(ToolUseBlock::new(
                    "t1", "shell", json!({}),
                ))]));
            } else if i == 6 {
                messages.push(Message::tool_result("t1", "done", false));
            } else {
                messages.push(Message::user(format!("msg{i}")));
            }
        }

        let split = Summarization::find_split_index(&messages);
        // The message at `split` must not be a bare tool_result.
        assert!(!messages[split].is_bare_tool_result());
    }

    #[tokio::test]
    async fn test_truncation_keeps_minimum_two_messages() {
        let mut strategy = Truncation::new();
        let messages = vec![Message::user("a"), Message::user("b")];
        let result = strategy.apply("", messages, 0).await;
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn test_truncation_advances_past_orphan_tool_result() {
        let mut strategy = Truncation::new();
        let messages = vec![
            Message::assistant(vec![ContentBlock::ToolUse(ToolUseBlock::new(
                "t1", "shell", json!({}),
            ))]),
            Message::tool_result("t1", "done", false),
            Message::user("big ".repeat(10000)),
            Message::assistant(vec![ContentBlock::Text(TextBlock::new("reply"))]),
        ];

        let result = strategy.apply("", messages, 10).await;
        if !result.is_empty() {
            assert!(!result[0].is_bare_tool_result());
        }
    }

    #[tokio::test]
    async fn test_context_manager_full_chain_scenario_4() {
        let mut manager = ContextManager::new(ContextManagerConfig {
            budget: 80,
            trigger_ratio: 0.70,
            ..Default::default()
        });

        let mut convo = Conversation::new("");
        convo.load_from_messages(vec![
            big_tool_result(2000),
            Message::assistant(vec![ContentBlock::Text(TextBlock::new("ok"))]),
            Message::user("next"),
            Message::assistant(vec![ContentBlock::Text(TextBlock::new("response"))]),
        ]);

        manager.compact(&mut convo).await;

        let messages = convo.messages();
        let first_text = match &messages[0].content[0] {
            ContentBlock::ToolResult(r) => r.text.clone(),
            other => panic!("expected tool result, got {other:?}"),
        };
        assert!(first_text.starts_with("[Tool result cleared"));
        assert!(estimate_conversation_tokens(&convo) <= 80 || messages.len() == 2);
    }

    #[tokio::test]
    async fn test_compact_never_drops_below_two_messages() {
        let mut manager = ContextManager::new(ContextManagerConfig {
            budget: 1,
            trigger_ratio: 0.70,
            ..Default::default()
        });

        let mut convo = Conversation::new("");
        convo.load_from_messages(vec![Message::user("a"), Message::user("b")]);

        manager.compact(&mut convo).await;
        assert_eq!(convo.len(), 2);
    }

    #[test]
    fn test_message_role_roundtrips_through_conversation() {
        let mut convo = Conversation::new("");
        convo.add_user("hi");
        assert_eq!(convo.messages()[0].role, MessageRole::User);
    }
}

//! Agent configuration: the knobs recognized by the context manager, the
//! approval engine, and the persistence offload path, assembled into one
//! validated `AgentConfig`.
//!
//! Reading these from an on-disk file is out of scope for this crate — a
//! host assembles `AgentConfig` however it likes (env vars, a TOML file of
//! its own, hardcoded) and hands it to the `Agent` constructor.

use crate::types::TrustRule;
use crate::{Error, Result};

/// Turn-loop and compaction/approval tuning, all defaulted.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_turns: u32,
    pub context_budget: usize,
    pub trigger_ratio: f32,
    pub tool_clear_threshold: usize,
    pub summary_message_threshold: usize,
    pub tool_offload_threshold: usize,
    pub trust_rules: Vec<TrustRule>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 25,
            context_budget: 32_000,
            trigger_ratio: 0.70,
            tool_clear_threshold: 1024,
            summary_message_threshold: 20,
            tool_offload_threshold: 8192,
            trust_rules: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }
}

/// Validating builder, following the teacher's options-builder pattern:
/// fields are set incrementally and `build()` rejects out-of-range values
/// instead of silently clamping them.
#[derive(Debug, Clone)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl Default for AgentConfigBuilder {
    fn default() -> Self {
        Self { config: AgentConfig::default() }
    }
}

impl AgentConfigBuilder {
    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.config.max_turns = max_turns;
        self
    }

    pub fn context_budget(mut self, context_budget: usize) -> Self {
        self.config.context_budget = context_budget;
        self
    }

    pub fn trigger_ratio(mut self, trigger_ratio: f32) -> Self {
        self.config.trigger_ratio = trigger_ratio;
        self
    }

    pub fn tool_clear_threshold(mut self, tool_clear_threshold: usize) -> Self {
        self.config.tool_clear_threshold = tool_clear_threshold;
        self
    }

    pub fn summary_message_threshold(mut self, summary_message_threshold: usize) -> Self {
        self.config.summary_message_threshold = summary_message_threshold;
        self
    }

    pub fn tool_offload_threshold(mut self, tool_offload_threshold: usize) -> Self {
        self.config.tool_offload_threshold = tool_offload_threshold;
        self
    }

    pub fn trust_rules(mut self, trust_rules: Vec<TrustRule>) -> Self {
        self.config.trust_rules = trust_rules;
        self
    }

    pub fn trust_rule(mut self, rule: TrustRule) -> Self {
        self.config.trust_rules.push(rule);
        self
    }

    pub fn build(self) -> Result<AgentConfig> {
        if self.config.max_turns == 0 {
            return Err(Error::config("max_turns must be greater than 0"));
        }
        if !(self.config.trigger_ratio > 0.0 && self.config.trigger_ratio <= 1.0) {
            return Err(Error::config("trigger_ratio must be in (0.0, 1.0]"));
        }
        if self.config.context_budget == 0 {
            return Err(Error::config("context_budget must be greater than 0"));
        }

        for (tool, err) in crate::approval::TrustRuleChecker::validate(&self.config.trust_rules) {
            return Err(Error::config(format!("trust rule for '{tool}' is invalid: {err}")));
        }

        Ok(self.config)
    }
}

//! Approval engine: a composable, input-sensitive trust-rule evaluator.
//!
//! Three checkers compose into the canonical order `[session_cache,
//! trust_rules, auto_approve_defaults]` — a user's in-session "always
//! allow" decision intentionally outranks static config rules, and static
//! config outranks the integrator's hardcoded safe-list.

use crate::error::Error;
use crate::types::{extract_string_leaves, TrustAction, TrustRule};
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

/// Informational strength, not authority — `Composite` picks the first
/// non-`ApprovalRequired` answer regardless of which variant it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApprovalResult {
    ApprovalRequired,
    AutoApproved,
    TrustRuleApproved,
}

impl ApprovalResult {
    pub fn is_approved(self) -> bool {
        !matches!(self, ApprovalResult::ApprovalRequired)
    }
}

#[async_trait]
pub trait ApprovalChecker: Send + Sync {
    async fn check_approval(&self, tool: &str, input: &Value) -> ApprovalResult;
}

/// The interactive seam invoked when every [`ApprovalChecker`] returns
/// `ApprovalRequired`: a host wires this to its own UI (a terminal prompt, a
/// dialog) to ask the user whether a tool call may proceed.
///
/// Takes the turn's [`crate::provider::CancellationToken`] so a host can
/// race its own prompt against cancellation rather than block the turn
/// forever on an abandoned prompt.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn ask(&self, tool: &str, input: &Value, cancel: &crate::provider::CancellationToken) -> bool;
}

// ============================================================================
// TRUST RULE CHECKER
// ============================================================================

struct CompiledRule {
    tool: String,
    regex: Regex,
    action: TrustAction,
}

/// Compiles each [`TrustRule`]'s pattern once at construction. Rules whose
/// pattern fails to compile are silently skipped here; call
/// [`TrustRuleChecker::validate`] separately to surface those as errors.
pub struct TrustRuleChecker {
    rules: Vec<CompiledRule>,
}

impl TrustRuleChecker {
    pub fn new(rules: &[TrustRule]) -> Self {
        let compiled = rules
            .iter()
            .filter_map(|rule| {
                Regex::new(&rule.pattern).ok().map(|regex| CompiledRule {
                    tool: rule.tool.clone(),
                    regex,
                    action: rule.action,
                })
            })
            .collect();
        Self { rules: compiled }
    }

    /// Surfaces every rule whose pattern fails to compile, paired with the
    /// tool name it was registered for, rather than silently dropping it.
    pub fn validate(rules: &[TrustRule]) -> Vec<(String, Error)> {
        rules
            .iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(_) => None,
                Err(e) => Some((rule.tool.clone(), Error::config(format!("invalid trust rule pattern: {e}")))),
            })
            .collect()
    }

    fn matches_any(rule: &CompiledRule, tool: &str, leaves: &[&str]) -> bool {
        (rule.tool == "*" || rule.tool == tool) && leaves.iter().any(|leaf| rule.regex.is_match(leaf))
    }
}

#[async_trait]
impl ApprovalChecker for TrustRuleChecker {
    async fn check_approval(&self, tool: &str, input: &Value) -> ApprovalResult {
        let leaves = extract_string_leaves(input);

        // Deny takes precedence: a matching deny rule always wins first pass.
        for rule in self.rules.iter().filter(|r| r.action == TrustAction::Deny) {
            if Self::matches_any(rule, tool, &leaves) {
                return ApprovalResult::ApprovalRequired;
            }
        }

        for rule in self.rules.iter().filter(|r| r.action == TrustAction::Allow) {
            if Self::matches_any(rule, tool, &leaves) {
                return ApprovalResult::TrustRuleApproved;
            }
        }

        ApprovalResult::ApprovalRequired
    }
}

// ============================================================================
// SESSION APPROVAL CACHE
// ============================================================================

/// Records a user's "always allow this tool" decision for the lifetime of
/// the `Agent`. In-process only — deliberately not persisted across restarts,
/// unlike the Persistence Contract.
#[derive(Default)]
pub struct SessionApprovalCache {
    remembered: RwLock<HashSet<String>>,
}

impl SessionApprovalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, tool: impl Into<String>) {
        self.remembered.write().insert(tool.into());
    }

    pub fn forget(&self, tool: &str) {
        self.remembered.write().remove(tool);
    }
}

#[async_trait]
impl ApprovalChecker for SessionApprovalCache {
    async fn check_approval(&self, tool: &str, _input: &Value) -> ApprovalResult {
        if self.remembered.read().contains(tool) {
            ApprovalResult::AutoApproved
        } else {
            ApprovalResult::ApprovalRequired
        }
    }
}

// ============================================================================
// AUTO-APPROVE DEFAULTS
// ============================================================================

/// A static allow-list checker over tool names an integrator judges
/// always-safe (e.g. read-only tools). Never asks for input-sensitive
/// matching — membership in the list is the whole decision.
pub struct AutoApproveDefaults {
    tools: HashSet<String>,
}

impl AutoApproveDefaults {
    pub fn new(tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ApprovalChecker for AutoApproveDefaults {
    async fn check_approval(&self, tool: &str, _input: &Value) -> ApprovalResult {
        if self.tools.contains(tool) {
            ApprovalResult::AutoApproved
        } else {
            ApprovalResult::ApprovalRequired
        }
    }
}

// ============================================================================
// COMPOSITE
// ============================================================================

/// Evaluates an ordered list of checkers; the first non-`ApprovalRequired`
/// result wins. Construct via [`Composite::canonical`] for the spec's
/// `[session_cache, trust_rules, auto_approve_defaults]` ordering, or
/// [`Composite::new`] for a custom order.
pub struct Composite {
    checkers: Vec<Box<dyn ApprovalChecker>>,
}

impl Composite {
    pub fn new(checkers: Vec<Box<dyn ApprovalChecker>>) -> Self {
        Self { checkers }
    }

    pub fn canonical(
        session_cache: SessionApprovalCache,
        trust_rules: TrustRuleChecker,
        auto_approve_defaults: AutoApproveDefaults,
    ) -> Self {
        Self::new(vec![
            Box::new(session_cache),
            Box::new(trust_rules),
            Box::new(auto_approve_defaults),
        ])
    }
}

#[async_trait]
impl ApprovalChecker for Composite {
    async fn check_approval(&self, tool: &str, input: &Value) -> ApprovalResult {
        for checker in &self.checkers {
            let result = checker.check_approval(tool, input).await;
            if result.is_approved() {
                return result;
            }
        }
        ApprovalResult::ApprovalRequired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_trust_rule_precedence_scenario_7() {
        let rules = vec![
            TrustRule::new("shell", ".*", TrustAction::Allow),
            TrustRule::new("shell", r"^rm\s", TrustAction::Deny),
        ];
        let checker = TrustRuleChecker::new(&rules);

        let approved = checker
            .check_approval("shell", &json!({"command": "go test ./..."}))
            .await;
        assert_eq!(approved, ApprovalResult::TrustRuleApproved);

        let denied = checker.check_approval("shell", &json!({"command": "rm -rf /"})).await;
        assert_eq!(denied, ApprovalResult::ApprovalRequired);
    }

    #[tokio::test]
    async fn test_wildcard_tool_matches_any() {
        let rules = vec![TrustRule::new("*", "secret", TrustAction::Deny)];
        let checker = TrustRuleChecker::new(&rules);
        let result = checker.check_approval("any_tool", &json!({"x": "secret"})).await;
        assert_eq!(result, ApprovalResult::ApprovalRequired);
    }

    #[tokio::test]
    async fn test_uncompilable_pattern_is_skipped_not_fatal() {
        let rules = vec![TrustRule::new("shell", "(unclosed", TrustAction::Allow)];
        let checker = TrustRuleChecker::new(&rules);
        assert_eq!(checker.rules.len(), 0);

        let errors = TrustRuleChecker::validate(&rules);
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_session_cache_remember_then_approve() {
        let cache = SessionApprovalCache::new();
        assert_eq!(
            cache.check_approval("shell", &json!({})).await,
            ApprovalResult::ApprovalRequired
        );
        cache.remember("shell");
        assert_eq!(
            cache.check_approval("shell", &json!({})).await,
            ApprovalResult::AutoApproved
        );
    }

    #[tokio::test]
    async fn test_auto_approve_defaults() {
        let defaults = AutoApproveDefaults::new(["read_file", "list_dir"]);
        assert_eq!(
            defaults.check_approval("read_file", &json!({})).await,
            ApprovalResult::AutoApproved
        );
        assert_eq!(
            defaults.check_approval("shell", &json!({})).await,
            ApprovalResult::ApprovalRequired
        );
    }

    #[tokio::test]
    async fn test_composite_first_non_required_wins() {
        let session_cache = SessionApprovalCache::new();
        session_cache.remember("shell");
        let trust_rules = TrustRuleChecker::new(&[TrustRule::new("shell", r"^rm\s", TrustAction::Deny)]);
        let auto_approve = AutoApproveDefaults::new(Vec::<String>::new());

        let composite = Composite::canonical(session_cache, trust_rules, auto_approve);
        // session cache already approved "shell" regardless of the deny rule.
        let result = composite.check_approval("shell", &json!({"command": "rm -rf /"})).await;
        assert_eq!(result, ApprovalResult::AutoApproved);
    }

    #[tokio::test]
    async fn test_composite_falls_through_to_auto_approve_defaults() {
        let session_cache = SessionApprovalCache::new();
        let trust_rules = TrustRuleChecker::new(&[]);
        let auto_approve = AutoApproveDefaults::new(["read_file"]);

        let composite = Composite::canonical(session_cache, trust_rules, auto_approve);
        let result = composite.check_approval("read_file", &json!({})).await;
        assert_eq!(result, ApprovalResult::AutoApproved);
    }
}

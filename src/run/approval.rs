//! Approval policies for pending tool calls.
//!
//! The poller only sees the [`ToolApprovalResolver`] trait, so a stricter
//! policy can replace the permissive default without touching the run loop.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::agent::types::{ActionDecision, ActionKind, PendingAction};
use crate::config::{AllowedKind, AllowedTool, ApprovalConfig, ApprovalPolicy};

/// Decides whether pending tool calls may proceed.
pub trait ToolApprovalResolver: Send + Sync {
    /// Short policy name for logs.
    fn name(&self) -> &'static str;

    /// Return one decision per action, in the same order.
    fn resolve(&self, actions: &[PendingAction]) -> Vec<ActionDecision>;
}

/// Approves every action.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoApproveResolver;

impl ToolApprovalResolver for AutoApproveResolver {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn resolve(&self, actions: &[PendingAction]) -> Vec<ActionDecision> {
        actions
            .iter()
            .inspect(|action| debug!(action_id = %action.action_id, tool = %action.name, "Auto-approving tool call"))
            .map(ActionDecision::approve)
            .collect()
    }
}

/// Approves only listed tools whose arguments carry the required keys.
#[derive(Clone, Debug, Default)]
pub struct AllowListResolver {
    rules: HashMap<(AllowedKind, String), Vec<String>>,
}

impl AllowListResolver {
    /// Build a resolver from allow-list rules.
    #[must_use]
    pub fn new(tools: &[AllowedTool]) -> Self {
        let rules = tools
            .iter()
            .map(|tool| ((tool.kind, tool.name.clone()), tool.required_args.clone()))
            .collect();
        Self { rules }
    }

    fn check(&self, action: &PendingAction) -> Result<(), String> {
        let kind = match &action.kind {
            ActionKind::ExternalToolCall { .. } => AllowedKind::External,
            ActionKind::FunctionCall => AllowedKind::Function,
        };
        let required = self
            .rules
            .get(&(kind, action.name.clone()))
            .ok_or_else(|| format!("tool {} is not allowed", action.name))?;

        let arguments = action
            .arguments_json()
            .map_err(|err| format!("arguments are not valid JSON: {err}"))?;
        let object = arguments
            .as_object()
            .ok_or_else(|| "arguments must be a JSON object".to_string())?;

        match required.iter().find(|key| !object.contains_key(key.as_str())) {
            Some(missing) => Err(format!("missing required argument {missing}")),
            None => Ok(()),
        }
    }
}

impl ToolApprovalResolver for AllowListResolver {
    fn name(&self) -> &'static str {
        "allow_list"
    }

    fn resolve(&self, actions: &[PendingAction]) -> Vec<ActionDecision> {
        actions
            .iter()
            .map(|action| match self.check(action) {
                Ok(()) => ActionDecision::approve(action),
                Err(reason) => {
                    warn!(
                        action_id = %action.action_id,
                        tool = %action.name,
                        kind = action.kind.label(),
                        %reason,
                        "Rejected tool call"
                    );
                    ActionDecision::reject(action, reason)
                }
            })
            .collect()
    }
}

/// Build the resolver selected by configuration.
#[must_use]
pub fn resolver_from_config(config: &ApprovalConfig) -> Arc<dyn ToolApprovalResolver> {
    match config.policy {
        ApprovalPolicy::Auto => Arc::new(AutoApproveResolver),
        ApprovalPolicy::AllowList => Arc::new(AllowListResolver::new(&config.allowed_tools)),
    }
}

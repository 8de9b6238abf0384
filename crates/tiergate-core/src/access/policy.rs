//! ============================================================================
//! Access Policy - Tier vs tool decisions
//! ============================================================================
//! Pure decision logic over an already-resolved tier. This is also the one
//! place that turns a lookup error into a user-facing denial.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, warn};

use super::tiers::{TierDefinition, TierTable};
use crate::types::{format_threshold, AccessDecision, DenialKind, GateError};

/// Decides whether a tier may invoke a tool
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    table: Arc<TierTable>,
}

impl AccessPolicy {
    pub fn new(table: Arc<TierTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }

    /// Evaluate a tool request for a resolved tier
    pub fn evaluate(&self, tier: &TierDefinition, tool: &str) -> AccessDecision {
        match self.require(tier, tool) {
            Ok(()) => AccessDecision::allow(&tier.id),
            Err(e) => self.deny_for_error(tool, &e).with_tier(&tier.id),
        }
    }

    /// Allow, or the error naming why not
    pub fn require(&self, tier: &TierDefinition, tool: &str) -> Result<(), GateError> {
        if tier.allows_tool(tool) {
            return Ok(());
        }
        match self.table.lowest_granting(tool) {
            Some(required) => Err(GateError::AccessDenied {
                tool: tool.to_string(),
                current_tier: tier.id.clone(),
                required_tier: required.id.clone(),
            }),
            None => Err(GateError::ToolNotFound(tool.to_string())),
        }
    }

    /// Translate an error into a structured denial
    pub fn deny_for_error(&self, tool: &str, err: &GateError) -> AccessDecision {
        if err.is_upstream() {
            warn!("Access check for '{}' failed: {}", tool, err);
        } else {
            debug!("Access to '{}' refused: {}", tool, err);
        }

        match err {
            GateError::InvalidAddress(msg) => AccessDecision::deny(DenialKind::InvalidAddress, msg.clone()),
            GateError::Network(_)
            | GateError::Contract(_)
            | GateError::Endpoint(_)
            | GateError::InvalidBalance(_) => AccessDecision::deny(
                DenialKind::BalanceUnavailable,
                format!("Could not verify token balance: {}", err),
            ),
            GateError::ToolNotFound(_) => AccessDecision::deny(
                DenialKind::ToolNotFound,
                format!("Tool '{}' does not exist in any tier", tool),
            ),
            GateError::AccessDenied {
                current_tier,
                required_tier,
                ..
            } => AccessDecision::deny(
                DenialKind::InsufficientTier,
                self.upgrade_reason(tool, current_tier, required_tier),
            )
            .with_tier(current_tier)
            .with_suggestion(required_tier),
            GateError::QuotaExceeded { tier, .. } => {
                AccessDecision::deny(DenialKind::QuotaExceeded, err.to_string()).with_tier(tier)
            }
        }
    }

    fn upgrade_reason(&self, tool: &str, current: &str, required: &str) -> String {
        match (self.table.get(current), self.table.get(required)) {
            (Some(current), Some(required)) => format!(
                "Access denied. {} requires {} tier ({}+ tokens). Current tier: {}.",
                tool,
                required.name,
                format_threshold(required.min_tokens),
                current.name
            ),
            _ => format!(
                "Access denied. {} requires {} tier. Current tier: {}.",
                tool, required, current
            ),
        }
    }
}

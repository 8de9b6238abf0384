//! ============================================================================
//! Types - Errors, decisions and status values shared across the gate
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Error types for tier resolution and access gating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum GateError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Invalid balance: {0}")]
    InvalidBalance(f64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Token contract error: {0}")]
    Contract(String),

    /// The RPC endpoint refused the request outright (bad key, wrong URL)
    #[error("RPC endpoint error: {0}")]
    Endpoint(String),

    #[error("Tool '{0}' is not available in any tier")]
    ToolNotFound(String),

    #[error("Access denied: '{tool}' requires {required_tier} tier (current tier: {current_tier})")]
    AccessDenied {
        tool: String,
        current_tier: String,
        required_tier: String,
    },

    #[error("Daily request quota of {limit} exhausted for {tier} tier")]
    QuotaExceeded { tier: String, limit: u64 },
}

impl GateError {
    /// Whether the error means "we could not learn the balance" rather than
    /// a decision about the caller
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            GateError::Network(_)
                | GateError::Contract(_)
                | GateError::Endpoint(_)
                | GateError::InvalidBalance(_)
        )
    }
}

/// Why an access check was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// A higher tier grants the tool
    InsufficientTier,
    /// No tier grants the tool
    ToolNotFound,
    /// The wallet address was malformed
    InvalidAddress,
    /// The balance could not be determined (RPC or contract failure)
    BalanceUnavailable,
    /// The tier's daily request quota is used up
    QuotaExceeded,
}

/// Result of a single access check. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    /// Tier the decision was made for, if one was resolved
    pub tier: Option<String>,
    pub reason: Option<String>,
    /// Lowest tier that would grant the tool
    pub suggested_tier: Option<String>,
    pub denial: Option<DenialKind>,
}

impl AccessDecision {
    pub fn allow(tier: &str) -> Self {
        Self {
            allowed: true,
            tier: Some(tier.to_string()),
            reason: None,
            suggested_tier: None,
            denial: None,
        }
    }

    pub fn deny(kind: DenialKind, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            tier: None,
            reason: Some(reason.into()),
            suggested_tier: None,
            denial: Some(kind),
        }
    }

    pub fn with_tier(mut self, tier: &str) -> Self {
        self.tier = Some(tier.to_string());
        self
    }

    pub fn with_suggestion(mut self, tier: &str) -> Self {
        self.suggested_tier = Some(tier.to_string());
        self
    }
}

/// What it takes to reach the next tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextTierUnlock {
    pub next_tier_id: String,
    pub next_tier_name: String,
    pub amount_needed: f64,
    pub threshold_total: f64,
}

/// Where a tier lookup's data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    /// Fresh cached record
    Cache,
    /// Fetched from the chain for this lookup (or a concurrent one)
    Network,
    /// Refresh failed, last-known record served (fail-open only)
    StaleFallback,
    /// First fetch failed, lowest tier assumed (fail-open only)
    FailOpenDefault,
}

impl LookupSource {
    /// Whether the balance behind this lookup is known to be current
    pub fn is_degraded(&self) -> bool {
        matches!(self, LookupSource::StaleFallback | LookupSource::FailOpenDefault)
    }
}

/// Tier introspection for a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStatus {
    pub wallet: String,
    pub tier_id: String,
    pub tier_name: String,
    pub balance: f64,
    pub balance_formatted: String,
    pub next_tier_unlock: Option<NextTierUnlock>,
    /// `None` means unlimited
    pub max_api_keys: Option<u32>,
    /// `None` means unlimited
    pub max_requests_per_day: Option<u64>,
    pub source: LookupSource,
}

/// Format amount with K/M/B suffixes
pub fn format_balance(amount: f64) -> String {
    if amount >= 1_000_000_000.0 {
        format!("{:.2}B", amount / 1_000_000_000.0)
    } else if amount >= 1_000_000.0 {
        format!("{:.2}M", amount / 1_000_000.0)
    } else if amount >= 1_000.0 {
        format!("{:.2}K", amount / 1_000.0)
    } else {
        format!("{:.2}", amount)
    }
}

/// Format a threshold with K/M suffix for denial messages
pub fn format_threshold(amount: f64) -> String {
    if amount >= 1_000_000.0 {
        format!("{:.0}M", amount / 1_000_000.0)
    } else if amount >= 1_000.0 {
        format!("{:.0}K", amount / 1_000.0)
    } else {
        format!("{:.0}", amount)
    }
}

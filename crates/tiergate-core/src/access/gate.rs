//! ============================================================================
//! Token Gate - Cached tier checks with tool gating
//! ============================================================================
//! The surface tool modules call before they run. Raw wallet strings come
//! in; decisions and tier status go out. Tool modules never see the cache.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::address::WalletAddress;
use super::cache::{CacheConfig, CacheStats, TierCache, TierLookup};
use super::checker::{ChainReader, EvmChainReader};
use super::policy::AccessPolicy;
use super::quota::{QuotaStatus, QuotaTracker};
use super::tiers::{TierDefinition, TierTable};
use crate::config::GateConfig;
use crate::types::{format_balance, AccessDecision, GateError, TierStatus};

/// Token-gated access checks for tool modules
pub struct TokenGate {
    cache: TierCache,
    policy: AccessPolicy,
    quota: QuotaTracker,
    min_holding: f64,
}

impl TokenGate {
    /// Create a gate over any chain reader
    pub fn new(reader: Arc<dyn ChainReader>, table: TierTable, cache_config: CacheConfig) -> Self {
        let table = Arc::new(table);
        Self {
            cache: TierCache::new(reader, Arc::clone(&table), cache_config),
            policy: AccessPolicy::new(table),
            quota: QuotaTracker::new(),
            min_holding: crate::config::DEFAULT_MIN_HOLDING,
        }
    }

    /// Set the legacy single-threshold minimum
    pub fn with_min_holding(mut self, min_holding: f64) -> Self {
        self.min_holding = min_holding;
        self
    }

    /// Build a gate reading the configured ERC-20 token over JSON-RPC
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let token = WalletAddress::parse(&config.token_address)
            .map_err(|e| anyhow!("Invalid TOKEN_ADDRESS: {}", e))?;
        if config.uses_placeholder_token() {
            warn!("TOKEN_ADDRESS is not set, using placeholder {}", token);
        }

        let reader = EvmChainReader::new(
            &config.rpc_url,
            token,
            per_request_timeout(&config.cache, config.retry.max_attempts),
            config.retry.clone(),
        )?
        .with_decimals(config.token_decimals);

        let table = config.tier_table()?;
        info!(
            "Token gate ready: {} tiers, RPC {}, failure policy {:?}",
            table.tiers().len(),
            config.rpc_url,
            config.cache.failure_policy
        );

        Ok(Self::new(Arc::new(reader), table, config.cache.clone()).with_min_holding(config.min_holding))
    }

    /// Decide whether a wallet may invoke a tool. Never errors.
    pub async fn can_access(&self, wallet: &str, tool: &str) -> AccessDecision {
        match self.resolve(wallet).await {
            Ok((_, _, tier)) => self.decide(tier, tool),
            Err(e) => self.policy.deny_for_error(tool, &e),
        }
    }

    /// `can_access` plus one unit of the tier's daily request quota
    pub async fn authorize(&self, wallet: &str, tool: &str) -> AccessDecision {
        let (address, _, tier) = match self.resolve(wallet).await {
            Ok(resolved) => resolved,
            Err(e) => return self.policy.deny_for_error(tool, &e),
        };

        let decision = self.decide(tier, tool);
        if !decision.allowed {
            return decision;
        }

        match self.quota.record_request(&address, tier) {
            Ok(_) => decision,
            Err(e) => self.policy.deny_for_error(tool, &e),
        }
    }

    /// Gate a tool - returns the tier status if allowed, an error if not
    pub async fn gate_tool(&self, wallet: &str, tool: &str) -> Result<TierStatus, GateError> {
        let (address, lookup, tier) = self.resolve(wallet).await?;

        if let Err(e) = self.policy.require(tier, tool) {
            warn!("Access denied for '{}': wallet {} has {} tier: {}", tool, address, tier.id, e);
            return Err(e);
        }

        self.status(&lookup, tier)
    }

    /// Tier introspection for a wallet
    pub async fn get_tier(&self, wallet: &str) -> Result<TierStatus, GateError> {
        let (_, lookup, tier) = self.resolve(wallet).await?;
        self.status(&lookup, tier)
    }

    /// Legacy check against the single MIN_HOLDING threshold
    pub async fn meets_min_holding(&self, wallet: &str) -> Result<bool, GateError> {
        let (_, lookup, _) = self.resolve(wallet).await?;
        Ok(lookup.record.balance >= self.min_holding)
    }

    /// Requests used today by the wallet
    pub async fn quota_usage(&self, wallet: &str) -> Result<QuotaStatus, GateError> {
        let (address, _, tier) = self.resolve(wallet).await?;
        Ok(self.quota.usage(&address, tier))
    }

    /// Invalidate cache for a wallet (e.g., after token transfer)
    pub fn invalidate(&self, wallet: &str) -> Result<bool, GateError> {
        let address = WalletAddress::parse(wallet)?;
        Ok(self.cache.invalidate(&address))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn table(&self) -> &TierTable {
        self.policy.table()
    }

    pub fn min_holding(&self) -> f64 {
        self.min_holding
    }

    /// Validate, look up, and resolve the wallet's tier definition
    async fn resolve(&self, wallet: &str) -> Result<(WalletAddress, TierLookup, &TierDefinition), GateError> {
        let address = WalletAddress::parse(wallet)?;
        let lookup = self.cache.lookup(&address).await?;
        let tier = self.table().resolve(lookup.record.balance)?;

        if lookup.source.is_degraded() {
            warn!(
                "Using degraded tier data for {} ({:?}): {} tier",
                address, lookup.source, tier.id
            );
        }

        Ok((address, lookup, tier))
    }

    fn decide(&self, tier: &TierDefinition, tool: &str) -> AccessDecision {
        let decision = self.policy.evaluate(tier, tool);
        if !decision.allowed {
            warn!(
                "Access denied for '{}' at {} tier: {}",
                tool,
                tier.id,
                decision.reason.as_deref().unwrap_or("no reason")
            );
        }
        decision
    }

    fn status(&self, lookup: &TierLookup, tier: &TierDefinition) -> Result<TierStatus, GateError> {
        let balance = lookup.record.balance;
        Ok(TierStatus {
            wallet: lookup.record.wallet.to_string(),
            tier_id: tier.id.clone(),
            tier_name: tier.name.clone(),
            balance,
            balance_formatted: format_balance(balance),
            next_tier_unlock: self.table().next_tier_unlock(balance)?,
            max_api_keys: tier.max_api_keys,
            max_requests_per_day: tier.max_requests_per_day,
            source: lookup.source,
        })
    }
}

/// Split the overall fetch budget across retry attempts
fn per_request_timeout(cache: &CacheConfig, attempts: u32) -> Duration {
    let attempts = attempts.max(1);
    (cache.fetch_timeout / attempts).max(Duration::from_millis(100))
}

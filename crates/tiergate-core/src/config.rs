//! ============================================================================
//! Gate Configuration - Environment-driven settings
//! ============================================================================
//! Recognized variables: RPC_URL, TOKEN_ADDRESS, TOKEN_DECIMALS, MIN_HOLDING,
//! TIER_CACHE_SECS, TIER_EVICT_SECS, TIER_CACHE_MAX, RPC_TIMEOUT_MS,
//! RPC_MAX_RETRIES, TIER_FAILURE_POLICY, TIER_TABLE_PATH.
//! ============================================================================

use anyhow::{anyhow, bail, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::access::{CacheConfig, FailurePolicy, TierTable};
use crate::rpc_retry::RetryConfig;

/// Default JSON-RPC endpoint
pub const DEFAULT_RPC_URL: &str = "https://eth.llamarpc.com";

/// Placeholder token contract; real deployments must set TOKEN_ADDRESS
pub const DEFAULT_TOKEN_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Legacy single-threshold minimum holding
pub const DEFAULT_MIN_HOLDING: f64 = 1_000.0;

/// Everything needed to build a `TokenGate`
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub rpc_url: String,
    pub token_address: String,
    /// Fixed token decimals, skipping the `decimals()` call
    pub token_decimals: Option<u8>,
    /// Kept for callers that predate the tier table
    pub min_holding: f64,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub tier_table_path: Option<PathBuf>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            token_address: DEFAULT_TOKEN_ADDRESS.to_string(),
            token_decimals: None,
            min_holding: DEFAULT_MIN_HOLDING,
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            tier_table_path: None,
        }
    }
}

impl GateConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("RPC_URL") {
            config.rpc_url = url;
        }
        if let Some(token) = get("TOKEN_ADDRESS") {
            config.token_address = token;
        }
        config.token_decimals = parse_var(&get, "TOKEN_DECIMALS")?;
        if let Some(min) = parse_var::<f64, _>(&get, "MIN_HOLDING")? {
            if !min.is_finite() || min < 0.0 {
                bail!("MIN_HOLDING must be a non-negative number, got {}", min);
            }
            config.min_holding = min;
        }

        if let Some(secs) = parse_var::<u64, _>(&get, "TIER_CACHE_SECS")? {
            config.cache.freshness = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&get, "TIER_EVICT_SECS")? {
            config.cache.eviction_horizon = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<usize, _>(&get, "TIER_CACHE_MAX")? {
            if max == 0 {
                bail!("TIER_CACHE_MAX must be at least 1");
            }
            config.cache.max_entries = max;
        }
        if let Some(ms) = parse_var::<u64, _>(&get, "RPC_TIMEOUT_MS")? {
            if ms == 0 {
                bail!("RPC_TIMEOUT_MS must be at least 1");
            }
            config.cache.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = parse_var::<FailurePolicy, _>(&get, "TIER_FAILURE_POLICY")? {
            config.cache.failure_policy = policy;
        }
        if let Some(attempts) = parse_var::<u32, _>(&get, "RPC_MAX_RETRIES")? {
            config.retry.max_attempts = attempts.max(1);
        }
        config.tier_table_path = get("TIER_TABLE_PATH").map(PathBuf::from);

        if config.cache.eviction_horizon < config.cache.freshness {
            bail!(
                "TIER_EVICT_SECS ({:?}) must not be shorter than TIER_CACHE_SECS ({:?})",
                config.cache.eviction_horizon,
                config.cache.freshness
            );
        }

        Ok(config)
    }

    /// The configured tier table, or the built-in one
    pub fn tier_table(&self) -> Result<TierTable> {
        match &self.tier_table_path {
            Some(path) => TierTable::from_json_file(path),
            None => Ok(TierTable::default()),
        }
    }

    pub fn uses_placeholder_token(&self) -> bool {
        self.token_address.eq_ignore_ascii_case(DEFAULT_TOKEN_ADDRESS)
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| anyhow!("Invalid {} '{}': {}", key, raw, e))
        })
        .transpose()
}

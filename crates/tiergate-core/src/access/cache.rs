//! ============================================================================
//! Tier Cache - Single-flight memoization of wallet -> tier lookups
//! ============================================================================
//! Avoids hitting RPC on every access check:
//! - Records younger than the freshness window are served from memory
//! - Concurrent lookups for one wallet share a single in-flight fetch
//! - Lookups for different wallets never wait on each other's fetches
//! - Records older than the eviction horizon are dropped
//!
//! Per-wallet lifecycle: Absent -> Fresh -> Stale -> (refetch) -> Fresh.
//! A failed first fetch leaves the wallet Absent. What a failed refresh
//! returns is decided by the cache's single `FailurePolicy`.
//! ============================================================================

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::address::WalletAddress;
use super::checker::ChainReader;
use super::tiers::TierTable;
use crate::types::{format_balance, GateError, LookupSource};

/// Default freshness window in seconds (5 minutes)
pub const DEFAULT_FRESHNESS_SECS: u64 = 300;

/// Default eviction horizon in seconds (1 hour)
pub const DEFAULT_EVICTION_SECS: u64 = 3600;

/// Default bound on a single balance fetch, retries included
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Maximum number of entries in the tier cache to prevent unbounded growth
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// What a lookup returns when the chain cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Surface the network error; nothing is assumed
    #[default]
    FailClosed,
    /// Serve the last-known record, or the lowest tier for unknown wallets
    FailOpen,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail-closed" | "fail_closed" | "closed" => Ok(FailurePolicy::FailClosed),
            "fail-open" | "fail_open" | "open" => Ok(FailurePolicy::FailOpen),
            other => anyhow::bail!(
                "Unknown failure policy '{}'. Valid values: fail-closed, fail-open",
                other
            ),
        }
    }
}

/// Tier cache tuning
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub freshness: Duration,
    pub eviction_horizon: Duration,
    pub fetch_timeout: Duration,
    pub max_entries: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(DEFAULT_FRESHNESS_SECS),
            eviction_horizon: Duration::from_secs(DEFAULT_EVICTION_SECS),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            max_entries: DEFAULT_MAX_ENTRIES,
            failure_policy: FailurePolicy::FailClosed,
        }
    }
}

/// Last-known tier resolution for one wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletTierRecord {
    pub wallet: WalletAddress,
    pub balance: f64,
    /// Resolved tier id
    pub tier: String,
    pub resolved_at: DateTime<Utc>,
    #[serde(skip)]
    fetched_at: Instant,
}

impl WalletTierRecord {
    /// Time since the balance was read
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// A record plus where it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierLookup {
    pub record: WalletTierRecord,
    pub source: LookupSource,
}

/// Cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: usize,
    pub fresh: usize,
    pub in_flight: usize,
}

type Flight = Shared<BoxFuture<'static, Result<WalletTierRecord, GateError>>>;

struct InFlight {
    id: u64,
    flight: Flight,
}

/// Shard-locked maps shared with in-flight fetches. `in_flight` is always
/// locked before `records`, and no guard is held across an await.
struct CacheState {
    records: DashMap<WalletAddress, WalletTierRecord>,
    in_flight: DashMap<WalletAddress, InFlight>,
    next_flight_id: AtomicU64,
    max_entries: usize,
}

impl CacheState {
    fn new(max_entries: usize) -> Self {
        Self {
            records: DashMap::new(),
            in_flight: DashMap::new(),
            next_flight_id: AtomicU64::new(0),
            max_entries,
        }
    }

    fn fresh_record(&self, wallet: &WalletAddress, freshness: Duration) -> Option<WalletTierRecord> {
        self.records
            .get(wallet)
            .filter(|r| r.age() < freshness)
            .map(|r| r.value().clone())
    }

    fn evict_expired(&self, horizon: Duration) {
        let before = self.records.len();
        self.records.retain(|_, r| r.age() < horizon);
        let evicted = before.saturating_sub(self.records.len());
        if evicted > 0 {
            debug!("Evicted {} expired tier entries", evicted);
        }
    }

    fn insert(&self, record: WalletTierRecord) {
        // Evict oldest entry if cache is at capacity
        if !self.records.contains_key(&record.wallet) && self.records.len() >= self.max_entries {
            let oldest = self
                .records
                .iter()
                .min_by_key(|r| r.fetched_at)
                .map(|r| r.key().clone());
            if let Some(oldest) = oldest {
                self.records.remove(&oldest);
            }
        }
        self.records.insert(record.wallet.clone(), record);
    }
}

/// Wallet -> tier cache in front of a chain reader
pub struct TierCache {
    reader: Arc<dyn ChainReader>,
    table: Arc<TierTable>,
    config: CacheConfig,
    state: Arc<CacheState>,
}

impl TierCache {
    pub fn new(reader: Arc<dyn ChainReader>, table: Arc<TierTable>, config: CacheConfig) -> Self {
        let state = Arc::new(CacheState::new(config.max_entries));
        Self {
            reader,
            table,
            config,
            state,
        }
    }

    /// Return a fresh record for the wallet, fetching from the chain if needed
    pub async fn lookup(&self, wallet: &WalletAddress) -> Result<TierLookup, GateError> {
        if let Some(record) = self.cached(wallet) {
            return Ok(record);
        }

        self.state.evict_expired(self.config.eviction_horizon);
        let last_known = self.state.records.get(wallet).map(|r| r.value().clone());

        let flight = match self.state.in_flight.entry(wallet.clone()) {
            Entry::Occupied(existing) => {
                debug!("Joining in-flight fetch for wallet {}", wallet);
                existing.get().flight.clone()
            }
            Entry::Vacant(slot) => {
                // A fetch may have landed since the first check
                if let Some(record) = self.cached(wallet) {
                    return Ok(record);
                }
                let id = self.state.next_flight_id.fetch_add(1, Ordering::Relaxed);
                let flight = self.start_fetch(wallet.clone(), id);
                slot.insert(InFlight {
                    id,
                    flight: flight.clone(),
                });
                flight
            }
        };

        match flight.await {
            Ok(record) => Ok(TierLookup {
                record,
                source: LookupSource::Network,
            }),
            Err(err) => self.apply_failure_policy(wallet, last_known, err),
        }
    }

    /// Drop the wallet's record and detach any fetch in flight for it
    pub fn invalidate(&self, wallet: &WalletAddress) -> bool {
        let detached = self.state.in_flight.remove(wallet).is_some();
        let removed = self.state.records.remove(wallet).is_some();
        if removed || detached {
            info!("Invalidated cache for wallet {}", wallet);
        }
        removed || detached
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        let count = self.state.records.len();
        self.state.in_flight.clear();
        self.state.records.clear();
        info!("Cleared {} cached tier entries", count);
    }

    /// Cached record regardless of age, without fetching
    pub fn peek(&self, wallet: &WalletAddress) -> Option<WalletTierRecord> {
        self.state.records.get(wallet).map(|r| r.value().clone())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total: self.state.records.len(),
            fresh: self
                .state
                .records
                .iter()
                .filter(|r| r.age() < self.config.freshness)
                .count(),
            in_flight: self.state.in_flight.len(),
        }
    }

    fn cached(&self, wallet: &WalletAddress) -> Option<TierLookup> {
        let record = self.state.fresh_record(wallet, self.config.freshness)?;
        debug!(
            "Cache hit for wallet {}: {} (age: {:?})",
            wallet,
            record.tier,
            record.age()
        );
        Some(TierLookup {
            record,
            source: LookupSource::Cache,
        })
    }

    /// Build the shared fetch for one wallet. The first caller to poll it
    /// drives it; the write-back only lands if the flight was not detached.
    fn start_fetch(&self, wallet: WalletAddress, id: u64) -> Flight {
        let reader = Arc::clone(&self.reader);
        let table = Arc::clone(&self.table);
        let state = Arc::clone(&self.state);
        let timeout = self.config.fetch_timeout;

        async move {
            let result = fetch_record(reader.as_ref(), &table, &wallet, timeout).await;

            match state.in_flight.entry(wallet.clone()) {
                Entry::Occupied(current) if current.get().id == id => {
                    if let Ok(record) = &result {
                        state.insert(record.clone());
                    }
                    current.remove();
                }
                _ => debug!("Fetch for wallet {} was detached, not caching", wallet),
            }

            result
        }
        .boxed()
        .shared()
    }

    fn apply_failure_policy(
        &self,
        wallet: &WalletAddress,
        last_known: Option<WalletTierRecord>,
        err: GateError,
    ) -> Result<TierLookup, GateError> {
        // Only "could not reach the chain" is eligible for fail-open
        if self.config.failure_policy == FailurePolicy::FailClosed
            || !matches!(err, GateError::Network(_))
        {
            return Err(err);
        }

        match last_known {
            Some(record) => {
                warn!(
                    "Tier refresh for {} failed ({}), serving last-known {} tier (age: {:?})",
                    wallet,
                    err,
                    record.tier,
                    record.age()
                );
                Ok(TierLookup {
                    record,
                    source: LookupSource::StaleFallback,
                })
            }
            None => {
                let lowest = self.table.lowest();
                warn!(
                    "Tier lookup for {} failed ({}), failing open to {} tier",
                    wallet, err, lowest.id
                );
                Ok(TierLookup {
                    record: WalletTierRecord {
                        wallet: wallet.clone(),
                        balance: 0.0,
                        tier: lowest.id.clone(),
                        resolved_at: Utc::now(),
                        fetched_at: Instant::now(),
                    },
                    source: LookupSource::FailOpenDefault,
                })
            }
        }
    }
}

/// Chain read -> tier resolution, bounded by `timeout`
async fn fetch_record(
    reader: &dyn ChainReader,
    table: &TierTable,
    wallet: &WalletAddress,
    timeout: Duration,
) -> Result<WalletTierRecord, GateError> {
    debug!("Cache miss for wallet {}, fetching from RPC", wallet);

    let balance = match tokio::time::timeout(timeout, reader.token_balance(wallet)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(GateError::Network(format!(
                "Balance lookup for {} timed out after {:?}",
                wallet, timeout
            )))
        }
    };

    let tier = table.resolve(balance.amount)?;
    info!(
        "Access tier for {}: {} ({} tokens)",
        wallet,
        tier.id,
        format_balance(balance.amount)
    );

    Ok(WalletTierRecord {
        wallet: wallet.clone(),
        balance: balance.amount,
        tier: tier.id.clone(),
        resolved_at: Utc::now(),
        fetched_at: Instant::now(),
    })
}

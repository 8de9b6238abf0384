//! ============================================================================
//! Quota Tracker - Per-wallet daily request counting
//! ============================================================================
//! Counts requests per wallet per UTC day against the tier's
//! `max_requests_per_day`. Counters live only in memory and roll over at
//! midnight UTC.
//! ============================================================================

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::address::WalletAddress;
use super::tiers::TierDefinition;
use crate::types::GateError;

/// Requests used today and what remains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub used: u64,
    /// `None` when the tier is unlimited
    pub remaining: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct DailyUsage {
    day: NaiveDate,
    count: u64,
}

/// In-memory daily request counters
#[derive(Debug, Default)]
pub struct QuotaTracker {
    usage: Mutex<HashMap<WalletAddress, DailyUsage>>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for today, failing if the tier's quota is used up
    pub fn record_request(
        &self,
        wallet: &WalletAddress,
        tier: &TierDefinition,
    ) -> Result<QuotaStatus, GateError> {
        self.record_request_on(wallet, tier, Utc::now().date_naive())
    }

    /// Requests used today without counting a new one
    pub fn usage(&self, wallet: &WalletAddress, tier: &TierDefinition) -> QuotaStatus {
        self.usage_on(wallet, tier, Utc::now().date_naive())
    }

    fn record_request_on(
        &self,
        wallet: &WalletAddress,
        tier: &TierDefinition,
        today: NaiveDate,
    ) -> Result<QuotaStatus, GateError> {
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());

        // Yesterday's counters are dead weight
        usage.retain(|_, u| u.day == today);

        let entry = usage
            .entry(wallet.clone())
            .or_insert(DailyUsage { day: today, count: 0 });

        if let Some(limit) = tier.max_requests_per_day {
            if entry.count >= limit {
                warn!(
                    "Quota exhausted for {}: {}/{} requests ({} tier)",
                    wallet, entry.count, limit, tier.id
                );
                return Err(GateError::QuotaExceeded {
                    tier: tier.id.clone(),
                    limit,
                });
            }
        }

        entry.count += 1;
        debug!("Request {} today for {} ({} tier)", entry.count, wallet, tier.id);

        Ok(QuotaStatus {
            used: entry.count,
            remaining: tier.max_requests_per_day.map(|limit| limit - entry.count),
        })
    }

    fn usage_on(&self, wallet: &WalletAddress, tier: &TierDefinition, today: NaiveDate) -> QuotaStatus {
        let usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let used = usage
            .get(wallet)
            .filter(|u| u.day == today)
            .map_or(0, |u| u.count);

        QuotaStatus {
            used,
            remaining: tier
                .max_requests_per_day
                .map(|limit| limit.saturating_sub(used)),
        }
    }
}

//! ============================================================================
//! Access Module - Token-gated access control for tool modules
//! ============================================================================
//! Maps a wallet's on-chain token balance to a tier, and a tier to the tools
//! it may invoke.
//!
//! ## Flow
//! wallet -> `WalletAddress` (EIP-55) -> `TierCache` (single-flight) ->
//! `ChainReader` (balanceOf/decimals) -> `TierTable` -> `AccessPolicy`
//!
//! ## Default Tiers
//! - **Visitor**: 0+ tokens - converters, generators
//! - **Holder**: 1K+ tokens - gas monitor, media and log tools
//! - **Whale**: 10K+ tokens - every tool
//!
//! ## Usage
//! ```rust,ignore
//! use tiergate_core::{GateConfig, TokenGate};
//!
//! let gate = TokenGate::from_config(&GateConfig::from_env()?)?;
//! let decision = gate.can_access("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed", "gas-monitor").await;
//! ```
//! ============================================================================

mod address;
mod cache;
mod checker;
mod gate;
mod policy;
mod quota;
mod tiers;

#[cfg(test)]
pub(crate) mod testing;

// Re-export public types
pub use address::WalletAddress;
pub use cache::{
    CacheConfig, CacheStats, FailurePolicy, TierCache, TierLookup, WalletTierRecord,
    DEFAULT_EVICTION_SECS, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_FRESHNESS_SECS, DEFAULT_MAX_ENTRIES,
};
pub use checker::{ChainReader, EvmChainReader, TokenBalance};
pub use gate::TokenGate;
pub use policy::AccessPolicy;
pub use quota::{QuotaStatus, QuotaTracker};
pub use tiers::{TierDefinition, TierTable, ToolAccess, TIER_HOLDER_THRESHOLD, TIER_WHALE_THRESHOLD};

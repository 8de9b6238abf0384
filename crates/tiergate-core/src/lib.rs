//! ============================================================================
//! TIERGATE-CORE: Token-gated tool access
//! ============================================================================
//! This crate decides which tools a wallet may use:
//! - ERC-20 balance reads over JSON-RPC with bounded retries
//! - Balance -> tier resolution over a validated threshold table
//! - Single-flight tier cache with an explicit failure policy
//! - Allow-list decisions and daily request quotas
//! ============================================================================

pub mod access;
pub mod config;
pub mod rpc_retry;
pub mod types;

// Re-export main types for convenience
pub use access::{AccessPolicy, ChainReader, TierTable, TokenGate, WalletAddress};
pub use config::GateConfig;
pub use types::*;

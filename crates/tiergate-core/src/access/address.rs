//! ============================================================================
//! Wallet Address - EIP-55 validation and canonical form
//! ============================================================================
//! Every wallet is reduced to its checksummed form before it is used as a
//! cache key or sent to the chain. Mixed-case input must already carry a
//! valid checksum; single-case input is checksummed on the way in.
//! ============================================================================

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::GateError;

/// Number of hex digits in a 20-byte address
const ADDRESS_HEX_LEN: usize = 40;

/// A validated EVM account address, keyed and displayed in checksummed form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(Address);

impl WalletAddress {
    /// Validate and canonicalize a raw address string
    pub fn parse(raw: &str) -> Result<Self, GateError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| GateError::InvalidAddress(format!("'{}' is missing the 0x prefix", raw)))?;

        if body.len() != ADDRESS_HEX_LEN || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GateError::InvalidAddress(format!(
                "'{}' is not 0x followed by {} hex digits",
                raw, ADDRESS_HEX_LEN
            )));
        }

        let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = body.chars().any(|c| c.is_ascii_uppercase());

        // Mixed case is a checksum claim; single case carries none
        let address = if has_lower && has_upper {
            Address::parse_checksummed(format!("0x{}", body), None).map_err(|e| {
                GateError::InvalidAddress(format!("'{}' has an invalid EIP-55 checksum: {}", raw, e))
            })?
        } else {
            Address::from_str(body)
                .map_err(|e| GateError::InvalidAddress(format!("'{}': {}", raw, e)))?
        };

        Ok(Self(address))
    }

    /// Checksummed form, `0x`-prefixed
    pub fn checksummed(&self) -> String {
        self.0.to_checksum(None)
    }

    pub fn address(&self) -> Address {
        self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.checksummed())
    }
}

impl FromStr for WalletAddress {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = GateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.checksummed()
    }
}

//! ============================================================================
//! Tier Table - Balance thresholds, quotas and tool allow-lists
//! ============================================================================
//! A tier owns the half-open balance interval [min_tokens, max_tokens).
//! The table is validated once at construction so that every non-negative
//! balance falls into exactly one tier.
//! ============================================================================

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::types::{GateError, NextTierUnlock};

/// Default threshold for the Holder tier (human-readable token amount)
pub const TIER_HOLDER_THRESHOLD: f64 = 1_000.0;

/// Default threshold for the Whale tier
pub const TIER_WHALE_THRESHOLD: f64 = 10_000.0;

/// Tools open to every wallet, including empty ones
const VISITOR_TOOLS: &[&str] = &[
    "unit-converter",
    "password-generator",
    "hash-generator",
    "qr-generator",
];

/// Tools unlocked by holding tokens
const HOLDER_TOOLS: &[&str] = &[
    "gas-monitor",
    "image-resizer",
    "pdf-watermark",
    "log-analyzer",
    "network-diagnostics",
    "file-shredder",
];

/// Which tools a tier may invoke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    /// Every tool, including ones not listed anywhere
    All,
    /// Only the named tools
    Only(BTreeSet<String>),
}

impl ToolAccess {
    pub fn only<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolAccess::Only(tools.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, tool: &str) -> bool {
        match self {
            ToolAccess::All => true,
            ToolAccess::Only(tools) => tools.contains(tool),
        }
    }
}

/// One row of the tier table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    pub id: String,
    pub name: String,
    pub min_tokens: f64,
    /// Exclusive upper bound, `None` for the top tier
    #[serde(default)]
    pub max_tokens: Option<f64>,
    /// `None` means unlimited
    #[serde(default)]
    pub max_api_keys: Option<u32>,
    /// `None` means unlimited
    #[serde(default)]
    pub max_requests_per_day: Option<u64>,
    pub tools_allowed: ToolAccess,
}

impl TierDefinition {
    /// Whether the balance falls inside [min_tokens, max_tokens)
    pub fn contains(&self, balance: f64) -> bool {
        balance >= self.min_tokens && self.max_tokens.map_or(true, |max| balance < max)
    }

    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools_allowed.allows(tool)
    }
}

/// Validated, ascending tier table
#[derive(Debug, Clone)]
pub struct TierTable {
    tiers: Vec<TierDefinition>,
}

impl TierTable {
    /// Build a table, rejecting gaps, overlaps and an unbounded middle tier
    pub fn new(mut tiers: Vec<TierDefinition>) -> Result<Self> {
        if tiers.is_empty() {
            bail!("Tier table is empty");
        }

        tiers.sort_by(|a, b| a.min_tokens.total_cmp(&b.min_tokens));

        let mut seen = HashSet::new();
        for tier in &tiers {
            if !seen.insert(tier.id.as_str()) {
                bail!("Duplicate tier id '{}'", tier.id);
            }
            if !tier.min_tokens.is_finite() {
                bail!("Tier '{}' has a non-finite min_tokens", tier.id);
            }
            if let Some(max) = tier.max_tokens {
                if !(max > tier.min_tokens) {
                    bail!(
                        "Tier '{}' has max_tokens {} not above min_tokens {}",
                        tier.id,
                        max,
                        tier.min_tokens
                    );
                }
            }
        }

        if tiers[0].min_tokens != 0.0 {
            bail!(
                "Lowest tier '{}' must start at 0, starts at {}",
                tiers[0].id,
                tiers[0].min_tokens
            );
        }

        for pair in tiers.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            match lower.max_tokens {
                Some(max) if max == upper.min_tokens => {}
                Some(max) => bail!(
                    "Tiers '{}' and '{}' are not contiguous ({} vs {})",
                    lower.id,
                    upper.id,
                    max,
                    upper.min_tokens
                ),
                None => bail!(
                    "Tier '{}' is unbounded but '{}' sits above it",
                    lower.id,
                    upper.id
                ),
            }
        }

        let top = &tiers[tiers.len() - 1];
        if top.max_tokens.is_some() {
            bail!("Top tier '{}' must have no max_tokens", top.id);
        }

        Ok(Self { tiers })
    }

    /// Load a table from a JSON file (an array of tier definitions)
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tier table {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid tier table {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let tiers: Vec<TierDefinition> =
            serde_json::from_str(raw).map_err(|e| anyhow!("Failed to parse tier table: {}", e))?;
        Self::new(tiers)
    }

    /// Tiers in ascending threshold order
    pub fn tiers(&self) -> &[TierDefinition] {
        &self.tiers
    }

    pub fn lowest(&self) -> &TierDefinition {
        &self.tiers[0]
    }

    pub fn get(&self, id: &str) -> Option<&TierDefinition> {
        self.tiers.iter().find(|t| t.id == id)
    }

    /// Find the unique tier whose interval contains the balance
    pub fn resolve(&self, balance: f64) -> Result<&TierDefinition, GateError> {
        let index = self.index_of(balance)?;
        Ok(&self.tiers[index])
    }

    /// What the balance needs to reach the next tier, `None` at the top
    pub fn next_tier_unlock(&self, balance: f64) -> Result<Option<NextTierUnlock>, GateError> {
        let index = self.index_of(balance)?;
        Ok(self.tiers.get(index + 1).map(|next| NextTierUnlock {
            next_tier_id: next.id.clone(),
            next_tier_name: next.name.clone(),
            amount_needed: next.min_tokens - balance,
            threshold_total: next.min_tokens,
        }))
    }

    /// Lowest tier that grants the tool, if any does
    pub fn lowest_granting(&self, tool: &str) -> Option<&TierDefinition> {
        self.tiers.iter().find(|t| t.allows_tool(tool))
    }

    fn index_of(&self, balance: f64) -> Result<usize, GateError> {
        if balance.is_nan() || balance < 0.0 {
            return Err(GateError::InvalidBalance(balance));
        }
        // Validation guarantees totality, so a miss means a broken table
        self.tiers
            .iter()
            .position(|t| t.contains(balance))
            .ok_or(GateError::InvalidBalance(balance))
    }
}

impl Default for TierTable {
    fn default() -> Self {
        let visitor_tools: Vec<&str> = VISITOR_TOOLS.to_vec();
        let holder_tools: Vec<&str> = VISITOR_TOOLS.iter().chain(HOLDER_TOOLS).copied().collect();

        Self {
            tiers: vec![
                TierDefinition {
                    id: "visitor".into(),
                    name: "Visitor".into(),
                    min_tokens: 0.0,
                    max_tokens: Some(TIER_HOLDER_THRESHOLD),
                    max_api_keys: Some(0),
                    max_requests_per_day: Some(25),
                    tools_allowed: ToolAccess::only(visitor_tools),
                },
                TierDefinition {
                    id: "holder".into(),
                    name: "Holder".into(),
                    min_tokens: TIER_HOLDER_THRESHOLD,
                    max_tokens: Some(TIER_WHALE_THRESHOLD),
                    max_api_keys: Some(3),
                    max_requests_per_day: Some(1_000),
                    tools_allowed: ToolAccess::only(holder_tools),
                },
                TierDefinition {
                    id: "whale".into(),
                    name: "Whale".into(),
                    min_tokens: TIER_WHALE_THRESHOLD,
                    max_tokens: None,
                    max_api_keys: None,
                    max_requests_per_day: None,
                    tools_allowed: ToolAccess::All,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(id: &str, min: f64, max: Option<f64>, tools: ToolAccess) -> TierDefinition {
        TierDefinition {
            id: id.into(),
            name: id.to_uppercase(),
            min_tokens: min,
            max_tokens: max,
            max_api_keys: None,
            max_requests_per_day: None,
            tools_allowed: tools,
        }
    }

    #[test]
    fn test_default_table_is_valid() {
        let table = TierTable::default();
        assert!(TierTable::new(table.tiers().to_vec()).is_ok());
    }

    #[test]
    fn test_tier_from_balance() {
        let table = TierTable::default();
        assert_eq!(table.resolve(0.0).unwrap().id, "visitor");
        assert_eq!(table.resolve(500.0).unwrap().id, "visitor");
        assert_eq!(table.resolve(999.99).unwrap().id, "visitor");
        assert_eq!(table.resolve(1_000.0).unwrap().id, "holder");
        assert_eq!(table.resolve(9_999.999).unwrap().id, "holder");
        assert_eq!(table.resolve(10_000.0).unwrap().id, "whale");
        assert_eq!(table.resolve(1e30).unwrap().id, "whale");
    }

    #[test]
    fn test_exactly_one_tier_per_balance() {
        let table = TierTable::default();
        let mut balance = 0.0;
        while balance < 20_000.0 {
            let matching = table.tiers().iter().filter(|t| t.contains(balance)).count();
            assert_eq!(matching, 1, "balance {} matched {} tiers", balance, matching);
            balance += 0.25;
        }
        for edge in [999.999_999, 1_000.0, 9_999.999_999, 10_000.0, f64::MAX] {
            let matching = table.tiers().iter().filter(|t| t.contains(edge)).count();
            assert_eq!(matching, 1, "balance {} matched {} tiers", edge, matching);
        }
    }

    #[test]
    fn test_boundary_belongs_to_upper_tier() {
        let table = TierTable::default();
        for t in table.tiers() {
            assert_eq!(table.resolve(t.min_tokens).unwrap().id, t.id);
        }
    }

    #[test]
    fn test_negative_balance_rejected() {
        let table = TierTable::default();
        assert_eq!(table.resolve(-1.0), Err(GateError::InvalidBalance(-1.0)));
        assert!(matches!(table.resolve(f64::NAN), Err(GateError::InvalidBalance(_))));
        assert!(table.next_tier_unlock(-0.5).is_err());
    }

    #[test]
    fn test_next_tier_unlock() {
        let table = TierTable::default();

        let unlock = table.next_tier_unlock(250.0).unwrap().unwrap();
        assert_eq!(unlock.next_tier_id, "holder");
        assert_eq!(unlock.next_tier_name, "Holder");
        assert_eq!(unlock.amount_needed, 750.0);
        assert_eq!(unlock.threshold_total, 1_000.0);

        let unlock = table.next_tier_unlock(1_000.0).unwrap().unwrap();
        assert_eq!(unlock.next_tier_id, "whale");
        assert_eq!(unlock.amount_needed, 9_000.0);

        assert!(table.next_tier_unlock(10_000.0).unwrap().is_none());
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let table = TierTable::new(vec![
            tier("c", 100.0, None, ToolAccess::All),
            tier("a", 0.0, Some(10.0), ToolAccess::only(["x"])),
            tier("b", 10.0, Some(100.0), ToolAccess::only(["x", "y"])),
        ])
        .unwrap();
        let ids: Vec<_> = table.tiers().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_invalid_tables_rejected() {
        // Gap between 10 and 20
        assert!(TierTable::new(vec![
            tier("a", 0.0, Some(10.0), ToolAccess::All),
            tier("b", 20.0, None, ToolAccess::All),
        ])
        .is_err());

        // Overlap
        assert!(TierTable::new(vec![
            tier("a", 0.0, Some(30.0), ToolAccess::All),
            tier("b", 20.0, None, ToolAccess::All),
        ])
        .is_err());

        // Does not start at zero
        assert!(TierTable::new(vec![tier("a", 5.0, None, ToolAccess::All)]).is_err());

        // Bounded top tier
        assert!(TierTable::new(vec![tier("a", 0.0, Some(10.0), ToolAccess::All)]).is_err());

        // Duplicate ids
        assert!(TierTable::new(vec![
            tier("a", 0.0, Some(10.0), ToolAccess::All),
            tier("a", 10.0, None, ToolAccess::All),
        ])
        .is_err());

        // Empty
        assert!(TierTable::new(vec![]).is_err());
    }

    #[test]
    fn test_tool_access() {
        let table = TierTable::default();
        assert!(table.get("visitor").unwrap().allows_tool("hash-generator"));
        assert!(!table.get("visitor").unwrap().allows_tool("gas-monitor"));
        assert!(table.get("holder").unwrap().allows_tool("gas-monitor"));
        assert!(table.get("whale").unwrap().allows_tool("anything-at-all"));
    }

    #[test]
    fn test_lowest_granting() {
        let table = TierTable::default();
        assert_eq!(table.lowest_granting("hash-generator").unwrap().id, "visitor");
        assert_eq!(table.lowest_granting("gas-monitor").unwrap().id, "holder");
        // Only the all-tools sentinel grants unlisted tools
        assert_eq!(table.lowest_granting("brand-new-tool").unwrap().id, "whale");
    }

    #[test]
    fn test_table_from_json() {
        let table = TierTable::from_json(
            r#"[
                {"id": "visitor", "name": "Visitor", "min_tokens": 0, "max_tokens": 1000,
                 "max_api_keys": 0, "max_requests_per_day": 10,
                 "tools_allowed": {"only": ["hash-generator"]}},
                {"id": "holder", "name": "Holder", "min_tokens": 1000, "max_tokens": 10000,
                 "tools_allowed": {"only": ["hash-generator", "gas-monitor"]}},
                {"id": "whale", "name": "Whale", "min_tokens": 10000,
                 "tools_allowed": "all"}
            ]"#,
        )
        .unwrap();

        assert_eq!(table.tiers().len(), 3);
        assert_eq!(table.resolve(999.99).unwrap().id, "visitor");
        assert_eq!(table.get("visitor").unwrap().max_requests_per_day, Some(10));
        assert_eq!(table.get("holder").unwrap().max_api_keys, None);
        assert_eq!(table.get("whale").unwrap().tools_allowed, ToolAccess::All);
    }

    #[test]
    fn test_example_table_matches_default() {
        let example = TierTable::from_json(include_str!("../../../../tiers.example.json")).unwrap();
        assert_eq!(example.tiers(), TierTable::default().tiers());
    }
}

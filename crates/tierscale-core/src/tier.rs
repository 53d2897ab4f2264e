//! Tier ladder: the ordered catalog of capacity tiers.
//!
//! Index 0 is the lowest tier. The ladder is the scaling axis: scaling up
//! moves one step towards the end, scaling down one step towards the start.
//! Ladders hold a handful of tiers, so lookups are plain linear scans.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A named capacity level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tier {
    /// Unique tier name (e.g. "free", "enterprise").
    pub name: String,
    /// Token budget for the tier.
    pub max_tokens: u64,
    /// Maximum number of teams allowed on the tier.
    pub max_teams: u32,
    /// Monthly cost. Informational only; the ladder order is authoritative.
    #[serde(default)]
    pub monthly_cost: f64,
    /// Capabilities unlocked by the tier.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl Tier {
    pub fn new(name: &str, max_tokens: u64, max_teams: u32, monthly_cost: f64) -> Self {
        Self {
            name: name.to_string(),
            max_tokens,
            max_teams,
            monthly_cost,
            capabilities: BTreeSet::new(),
        }
    }

    /// Builder-style capability list.
    pub fn with_capabilities(mut self, caps: &[&str]) -> Self {
        self.capabilities = caps.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Ordered, immutable sequence of tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct TierLadder {
    tiers: Vec<Tier>,
}

impl TierLadder {
    /// Build a ladder, rejecting an empty list or duplicate names.
    pub fn new(tiers: Vec<Tier>) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::EmptyLadder);
        }
        let mut seen = BTreeSet::new();
        for tier in &tiers {
            if !seen.insert(tier.name.as_str()) {
                return Err(ConfigError::DuplicateTier(tier.name.clone()));
            }
        }
        Ok(Self { tiers })
    }

    /// The built-in four-step ladder.
    pub fn standard() -> Self {
        Self {
            tiers: vec![
                Tier::new("free", 100_000, 5, 0.0).with_capabilities(&["basic_teams"]),
                Tier::new("pyme", 500_000, 20, 49.0)
                    .with_capabilities(&["basic_teams", "priority_support"]),
                Tier::new("mediana", 2_000_000, 50, 199.0).with_capabilities(&[
                    "basic_teams",
                    "priority_support",
                    "advanced_analytics",
                ]),
                Tier::new("enterprise", 10_000_000, 200, 999.0).with_capabilities(&[
                    "basic_teams",
                    "priority_support",
                    "advanced_analytics",
                    "dedicated_support",
                    "custom_integrations",
                ]),
            ],
        }
    }

    /// Look up a tier by name.
    pub fn get(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Position of a tier on the ladder (0 = lowest).
    pub fn position(&self, name: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t.name == name)
    }

    /// The tier immediately above `name`, or `None` at the top or for an
    /// unknown name.
    pub fn next(&self, name: &str) -> Option<&Tier> {
        let idx = self.position(name)?;
        self.tiers.get(idx + 1)
    }

    /// The tier immediately below `name`, or `None` at the bottom or for an
    /// unknown name.
    pub fn previous(&self, name: &str) -> Option<&Tier> {
        let idx = self.position(name)?;
        idx.checked_sub(1).and_then(|i| self.tiers.get(i))
    }

    /// All tiers, lowest first.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierLadder {
    fn default() -> Self {
        Self::standard()
    }
}

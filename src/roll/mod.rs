use std::collections::BTreeMap;

use crate::{
    cards::{CardCatalog, CardDefinition, Rarity},
    error::{config_err, Res},
    ledger::Currency,
};

pub mod auto;
pub mod orchestrator;
pub mod pack;
pub mod pity;
pub mod resolver;

pub use auto::{
    AutoRollConfig, AutoRollController, AutoRollProgress, AutoRollResult, AutoRollState,
    CancelToken, StopReason,
};
pub use orchestrator::RollOrchestrator;
pub use pack::PackPolicy;
pub use pity::{PityCounter, PityRule, PityState};

/// Kinds of roll a player can buy. Each maps to a `RollProfile` in the
/// engine configuration.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RollKind {
    Standard,
    Premium,
}

/// Relative draw weight per rarity tier. Weights need not sum to anything in
/// particular; the resolver normalises them.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RarityWeightTable(BTreeMap<Rarity, f64>);

impl RarityWeightTable {
    pub fn new<I: IntoIterator<Item = (Rarity, f64)>>(weights: I) -> Self {
        Self(weights.into_iter().collect())
    }

    pub fn weight(&self, rarity: Rarity) -> f64 {
        self.0.get(&rarity).copied().unwrap_or(0.0)
    }

    /// Entries in ascending tier order.
    pub fn iter(&self) -> impl Iterator<Item = (Rarity, f64)> + '_ {
        self.0.iter().map(|(rarity, weight)| (*rarity, *weight))
    }

    /// Tiers that can actually be drawn.
    pub fn positive_tiers(&self) -> impl Iterator<Item = Rarity> + '_ {
        self.iter()
            .filter(|(_, weight)| *weight > 0.0)
            .map(|(rarity, _)| rarity)
    }

    pub fn total(&self) -> f64 {
        self.0.values().filter(|w| **w > 0.0).sum()
    }

    pub fn validate(&self) -> Res<()> {
        if let Some((rarity, weight)) = self.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
            return config_err(format!("Invalid weight {weight} for {rarity:?}."));
        }
        if self.total() <= 0.0 {
            return config_err("Weight table has no positive weights.");
        }
        Ok(())
    }
}

/// Price and odds for one `RollKind`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RollProfile {
    pub currency: Currency,
    pub base_cost: u64,
    pub weights: RarityWeightTable,
    #[serde(default)]
    pub pack: PackPolicy,
}

impl RollProfile {
    /// Check the weights are sane and every drawable tier can be served by
    /// the catalog.
    pub fn validate(&self, catalog: &CardCatalog) -> Res<()> {
        self.weights.validate()?;
        for rarity in self.weights.positive_tiers() {
            if catalog.resolve_tier(rarity).is_none() {
                return config_err(format!(
                    "{rarity:?} has a positive weight but no cards at or below it."
                ));
            }
        }
        self.pack.validate(catalog)
    }
}

/// Immutable roll configuration, loaded once and shared by every session.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    pub profiles: BTreeMap<RollKind, RollProfile>,
    #[serde(default)]
    pub pity: Vec<PityRule>,
}

impl EngineConfig {
    pub fn profile(&self, kind: RollKind) -> Res<&RollProfile> {
        match self.profiles.get(&kind) {
            Some(profile) => Ok(profile),
            None => config_err(format!("No profile configured for {kind:?} rolls.")),
        }
    }

    pub fn validate(&self, catalog: &CardCatalog) -> Res<()> {
        if catalog.is_empty() {
            return config_err("Card catalog is empty.");
        }
        for (kind, profile) in &self.profiles {
            profile.validate(catalog).map_err(|e| match e {
                crate::RollError::Configuration(message) => {
                    crate::RollError::Configuration(format!("{kind:?}: {message}"))
                }
                other => other,
            })?;
        }
        for rule in &self.pity {
            rule.validate(catalog)?;
        }
        Ok(())
    }

    /// Fresh pity state for a new player.
    pub fn new_pity_state(&self) -> PityState {
        PityState::new(&self.pity)
    }
}

/// Currency taken for a roll transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollCharge {
    pub currency: Currency,
    pub amount: u64,
}

/// Outcome of a single draw.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RollResult {
    pub card: CardDefinition,
    /// Rarity of the card actually handed out, after any catalog fallback.
    pub rarity_drawn: Rarity,
    pub pity_triggered: bool,
    /// For bundles the whole charge is attributed to the first draw and the
    /// remaining draws carry an amount of zero.
    pub cost_charged: RollCharge,
}

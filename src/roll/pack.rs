use crate::{
    cards::{CardCatalog, Rarity},
    error::{config_err, Res},
};

/// How a purchase is bundled. Resolved from configuration at load time.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackPolicy {
    /// Plain single draws at the base price.
    #[default]
    Single,
    /// Several draws bought as one unit. The final draw is raised to
    /// `guaranteed_minimum` if it came in below it.
    Bundle {
        size: u32,
        cost_multiplier: f64,
        #[serde(default)]
        guaranteed_minimum: Option<Rarity>,
    },
}

impl PackPolicy {
    pub fn bundle_size(&self) -> u32 {
        match self {
            PackPolicy::Single => 1,
            PackPolicy::Bundle { size, .. } => *size,
        }
    }

    pub fn cost_multiplier(&self) -> f64 {
        match self {
            PackPolicy::Single => 1.0,
            PackPolicy::Bundle {
                cost_multiplier, ..
            } => *cost_multiplier,
        }
    }

    pub fn guaranteed_minimum(&self) -> Option<Rarity> {
        match self {
            PackPolicy::Single => None,
            PackPolicy::Bundle {
                guaranteed_minimum, ..
            } => *guaranteed_minimum,
        }
    }

    pub fn validate(&self, catalog: &CardCatalog) -> Res<()> {
        let PackPolicy::Bundle {
            size,
            cost_multiplier,
            guaranteed_minimum,
        } = self
        else {
            return Ok(());
        };

        if *size == 0 {
            return config_err("Bundle size must be positive.");
        }
        if !cost_multiplier.is_finite() || *cost_multiplier <= 0.0 {
            return config_err(format!("Invalid bundle cost multiplier {cost_multiplier}."));
        }
        if let Some(minimum) = guaranteed_minimum {
            if catalog.cards_of(*minimum).is_empty() {
                return config_err(format!("Bundle guarantees {minimum:?} but none exist."));
            }
        }
        Ok(())
    }

    /// Rarity of draw `index` (zero based) out of `count` once the bundle
    /// bonus is applied. Only the last draw is ever changed.
    pub fn apply(&self, index: u32, count: u32, natural: Rarity) -> Rarity {
        let is_last = index + 1 == count;
        match self.guaranteed_minimum() {
            Some(minimum) if is_last && natural < minimum => minimum,
            _ => natural,
        }
    }

    /// Total price of `count` draws, charged once for the whole bundle.
    pub fn cost(&self, base_cost: u64, count: u32) -> Res<u64> {
        let amount = (base_cost as f64 * self.cost_multiplier() * count as f64).round();
        if !amount.is_finite() || amount < 0.0 || amount > u64::MAX as f64 {
            return config_err(format!("Cost of {count} draws at {base_cost} overflows."));
        }
        Ok(amount as u64)
    }
}

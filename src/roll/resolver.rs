use crate::{
    cards::Rarity,
    error::{config_err, Res},
    rng::RandomSource,
};

use super::RarityWeightTable;

/// Draw one rarity tier with probability proportional to its weight.
///
/// Tiers are walked in ascending order and the first tier whose cumulative
/// weight reaches the scaled random value wins, so a value landing exactly on
/// a boundary belongs to the lower tier. Zero weights are never drawn.
/// Consumes exactly one value from `rng`.
pub fn draw(weights: &RarityWeightTable, rng: &mut dyn RandomSource) -> Res<Rarity> {
    weights.validate()?;
    let total = weights.total();
    let target = rng.next_float() * total;

    let mut cumulative = 0.0;
    let mut last = None;
    for (rarity, weight) in weights.iter().filter(|(_, w)| *w > 0.0) {
        cumulative += weight;
        if target <= cumulative {
            return Ok(rarity);
        }
        last = Some(rarity);
    }

    // Rounding can leave `target` a hair above the final cumulative sum.
    match last {
        Some(rarity) => Ok(rarity),
        None => config_err("Weight table has no positive weights."),
    }
}

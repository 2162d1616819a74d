use std::sync::Arc;

use crate::{
    cards::CardCatalog,
    error::{config_err, Res},
    ledger::{CurrencyLedger, LedgerError, PlayerId},
    rng::RandomSource,
    RollError,
};

use super::{
    pity::PityState, resolver, EngineConfig, PackPolicy, RollCharge, RollKind, RollProfile,
    RollResult,
};

/// Performs complete roll transactions: charge, draw, pity update.
///
/// A call either succeeds in full or leaves the ledger and the pity state
/// exactly as they were. Callers must not run two transactions for the same
/// player concurrently; `engine::RollEngine` takes care of that.
pub struct RollOrchestrator<L> {
    catalog: Arc<CardCatalog>,
    config: Arc<EngineConfig>,
    ledger: Arc<L>,
}

impl<L: CurrencyLedger> RollOrchestrator<L> {
    /// Validates the configuration against the catalog up front so broken
    /// content fails here rather than on a player's roll.
    pub fn new(catalog: Arc<CardCatalog>, config: Arc<EngineConfig>, ledger: Arc<L>) -> Res<Self> {
        if let Err(e) = config.validate(&catalog) {
            tracing::warn!("Rejected roll configuration: {e}");
            return Err(e);
        }
        Ok(Self {
            catalog,
            config,
            ledger,
        })
    }

    pub fn catalog(&self) -> &CardCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// One draw at the profile's base price.
    pub async fn roll_one(
        &self,
        player: PlayerId,
        pity: &mut PityState,
        kind: RollKind,
        rng: &mut dyn RandomSource,
    ) -> Res<RollResult> {
        let profile = self.config.profile(kind)?;
        let mut results = self
            .roll(player, pity, profile, &PackPolicy::Single, 1, rng)
            .await?;
        results
            .pop()
            .ok_or_else(|| RollError::Configuration("Single roll produced no card.".to_string()))
    }

    /// `count` draws bought as one bundle under the profile's pack policy.
    pub async fn roll_bundle(
        &self,
        player: PlayerId,
        pity: &mut PityState,
        kind: RollKind,
        count: u32,
        rng: &mut dyn RandomSource,
    ) -> Res<Vec<RollResult>> {
        let profile = self.config.profile(kind)?;
        self.roll(player, pity, profile, &profile.pack, count, rng)
            .await
    }

    /// Charge once for `count` draws, then perform them in order. The bundle
    /// guarantee of `policy` applies to the draw at index `count - 1`.
    pub async fn roll(
        &self,
        player: PlayerId,
        pity: &mut PityState,
        profile: &RollProfile,
        policy: &PackPolicy,
        count: u32,
        rng: &mut dyn RandomSource,
    ) -> Res<Vec<RollResult>> {
        // Everything that can be checked without spending is checked first.
        if count == 0 {
            return config_err("Cannot roll an empty bundle.");
        }
        profile.validate(&self.catalog)?;
        policy.validate(&self.catalog)?;
        for counter in &pity.counters {
            if self.catalog.cards_of(counter.target).is_empty() {
                return config_err(format!("Pity target {:?} has no cards.", counter.target));
            }
        }
        let charge = RollCharge {
            currency: profile.currency,
            amount: policy.cost(profile.base_cost, count)?,
        };

        let (results, next) = self
            .charged(player, charge, || {
                self.draw_all(pity, profile, policy, count, charge, rng)
            })
            .await?;
        *pity = next;
        tracing::debug!(
            "Player {player} drew {} card(s) for {} {:?}.",
            results.len(),
            charge.amount,
            charge.currency
        );
        Ok(results)
    }

    /// Take `charge` from the player, then run `draw`. If `draw` fails the
    /// charge is credited back before the error is returned.
    async fn charged<T>(
        &self,
        player: PlayerId,
        charge: RollCharge,
        draw: impl FnOnce() -> Res<T>,
    ) -> Res<T> {
        if let Err(e) = self
            .ledger
            .spend(player, charge.currency, charge.amount)
            .await
        {
            let e = match e {
                LedgerError::Insufficient { available } => RollError::InsufficientCurrency {
                    currency: charge.currency,
                    required: charge.amount,
                    available,
                },
                LedgerError::Unavailable(message) => RollError::Ledger(message),
            };
            tracing::debug!("Roll for {player} rejected: {e}");
            return Err(e);
        }

        match draw() {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!("Roll for {player} failed after charging, refunding: {e}");
                if let Err(refund) = self
                    .ledger
                    .credit(player, charge.currency, charge.amount)
                    .await
                {
                    tracing::warn!(
                        "Refund of {} {:?} to {player} failed: {refund}",
                        charge.amount,
                        charge.currency
                    );
                }
                Err(e)
            }
        }
    }

    /// The draws themselves, against a scratch copy of the pity state.
    fn draw_all(
        &self,
        pity: &PityState,
        profile: &RollProfile,
        policy: &PackPolicy,
        count: u32,
        charge: RollCharge,
        rng: &mut dyn RandomSource,
    ) -> Res<(Vec<RollResult>, PityState)> {
        let mut state = pity.clone();
        let mut results = Vec::with_capacity(count as usize);

        for index in 0..count {
            let forced = state.forced_rarity();
            let natural = match forced {
                Some(rarity) => rarity,
                None => resolver::draw(&profile.weights, rng)?,
            };
            let rarity = policy.apply(index, count, natural);
            let card = self.catalog.pick_random(rarity, rng)?.clone();
            state = state.record(card.rarity);

            tracing::trace!(
                "Draw {}/{count}: natural {natural:?}, served {:?}, pity {}.",
                index + 1,
                card.rarity,
                forced.is_some()
            );
            results.push(RollResult {
                rarity_drawn: card.rarity,
                card,
                pity_triggered: forced.is_some(),
                cost_charged: RollCharge {
                    currency: charge.currency,
                    amount: if index == 0 { charge.amount } else { 0 },
                },
            });
        }

        Ok((results, state))
    }
}

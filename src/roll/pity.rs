//! Pity: a bounded streak of draws below a target tier forces the next draw
//! to reach it.
//!
//! A player carries one counter per configured rule, so e.g. "Rare every 10"
//! and "Legendary every 90" are tracked independently. All transitions here
//! are pure; the orchestrator only commits the new state once a roll has
//! fully succeeded.

use crate::{
    cards::{CardCatalog, Rarity},
    error::{config_err, Res},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PityRule {
    pub target: Rarity,
    /// Every `threshold`-th roll without a `target`-or-better card is forced.
    pub threshold: u32,
}

impl PityRule {
    pub fn new(target: Rarity, threshold: u32) -> Self {
        Self { target, threshold }
    }

    pub fn validate(&self, catalog: &CardCatalog) -> Res<()> {
        if self.threshold == 0 {
            return config_err(format!("Pity threshold for {:?} must be positive.", self.target));
        }
        // A guarantee is only meaningful if the exact tier can be handed out.
        if catalog.cards_of(self.target).is_empty() {
            return config_err(format!("Pity target {:?} has no cards.", self.target));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PityCounter {
    pub target: Rarity,
    pub consecutive_misses: u32,
    pub guaranteed_at_threshold: u32,
}

impl PityCounter {
    pub fn new(rule: &PityRule) -> Self {
        Self {
            target: rule.target,
            consecutive_misses: 0,
            guaranteed_at_threshold: rule.threshold,
        }
    }
}

/// True iff the next roll must be guaranteed.
pub fn should_force_guarantee(counter: &PityCounter) -> bool {
    counter.consecutive_misses >= counter.guaranteed_at_threshold.saturating_sub(1)
}

pub fn record_miss(counter: PityCounter) -> PityCounter {
    PityCounter {
        consecutive_misses: counter.consecutive_misses.saturating_add(1),
        ..counter
    }
}

pub fn record_hit(counter: PityCounter) -> PityCounter {
    PityCounter {
        consecutive_misses: 0,
        ..counter
    }
}

/// Per-player pity counters. Persisted by the caller between sessions.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PityState {
    pub counters: Vec<PityCounter>,
}

impl PityState {
    pub fn new(rules: &[PityRule]) -> Self {
        Self {
            counters: rules.iter().map(PityCounter::new).collect(),
        }
    }

    /// Bring a loaded state in line with the current rules. Streaks for
    /// targets that are still configured carry over, thresholds follow the
    /// rules, and counters for removed rules are dropped.
    pub fn reconcile(self, rules: &[PityRule]) -> Self {
        let counters = rules
            .iter()
            .map(|rule| {
                let misses = self
                    .counters
                    .iter()
                    .find(|c| c.target == rule.target)
                    .map(|c| c.consecutive_misses)
                    .unwrap_or(0);
                PityCounter {
                    consecutive_misses: misses,
                    ..PityCounter::new(rule)
                }
            })
            .collect();
        Self { counters }
    }

    pub fn counter(&self, target: Rarity) -> Option<&PityCounter> {
        self.counters.iter().find(|c| c.target == target)
    }

    /// Lowest rarity the next roll must be forced to, if any counter demands
    /// it. With several due at once the highest target wins.
    pub fn forced_rarity(&self) -> Option<Rarity> {
        self.counters
            .iter()
            .filter(|c| should_force_guarantee(c))
            .map(|c| c.target)
            .max()
    }

    /// State after a roll that handed out a card of rarity `drawn`.
    pub fn record(&self, drawn: Rarity) -> Self {
        let counters = self
            .counters
            .iter()
            .map(|&counter| {
                if drawn >= counter.target {
                    record_hit(counter)
                } else {
                    record_miss(counter)
                }
            })
            .collect();
        Self { counters }
    }
}

#[cfg(test)]
mod test {
    use crate::cards::Rarity;

    use super::{record_hit, record_miss, should_force_guarantee, PityCounter, PityRule, PityState};

    #[test]
    fn test_force_on_last_roll_before_threshold() {
        let mut counter = PityCounter::new(&PityRule::new(Rarity::Rare, 10));
        for _ in 0..9 {
            assert!(!should_force_guarantee(&counter));
            counter = record_miss(counter);
        }
        // Nine misses in a row: the tenth roll is the guaranteed one.
        assert_eq!(counter.consecutive_misses, 9);
        assert!(should_force_guarantee(&counter));
        assert_eq!(record_hit(counter).consecutive_misses, 0);
    }

    #[test]
    fn test_threshold_of_one_always_forces() {
        let counter = PityCounter::new(&PityRule::new(Rarity::Epic, 1));
        assert!(should_force_guarantee(&counter));
    }

    #[test]
    fn test_record_tracks_each_rule() {
        let state = PityState::new(&[
            PityRule::new(Rarity::Rare, 10),
            PityRule::new(Rarity::Legendary, 90),
        ]);

        let state = state.record(Rarity::Common).record(Rarity::Epic);
        assert_eq!(state.counter(Rarity::Rare).unwrap().consecutive_misses, 0);
        assert_eq!(
            state.counter(Rarity::Legendary).unwrap().consecutive_misses,
            2
        );
        assert_eq!(state.forced_rarity(), None);
    }

    #[test]
    fn test_highest_due_target_wins() {
        let mut state = PityState::new(&[
            PityRule::new(Rarity::Rare, 3),
            PityRule::new(Rarity::Epic, 3),
        ]);
        state = state.record(Rarity::Common).record(Rarity::Common);
        assert_eq!(state.forced_rarity(), Some(Rarity::Epic));

        // An Epic satisfies both guarantees.
        let after = state.record(Rarity::Epic);
        assert!(after.counters.iter().all(|c| c.consecutive_misses == 0));
    }

    #[test]
    fn test_reconcile_keeps_streaks() {
        let old = PityState::new(&[
            PityRule::new(Rarity::Rare, 10),
            PityRule::new(Rarity::Mythic, 200),
        ])
        .record(Rarity::Common)
        .record(Rarity::Common);

        let rules = [PityRule::new(Rarity::Rare, 5), PityRule::new(Rarity::Epic, 40)];
        let state = old.reconcile(&rules);
        assert_eq!(state.counters.len(), 2);
        assert_eq!(
            state.counter(Rarity::Rare).unwrap(),
            &PityCounter {
                target: Rarity::Rare,
                consecutive_misses: 2,
                guaranteed_at_threshold: 5,
            }
        );
        assert_eq!(state.counter(Rarity::Epic).unwrap().consecutive_misses, 0);
        assert!(state.counter(Rarity::Mythic).is_none());
    }

    #[test]
    fn test_state_survives_json() {
        let state = PityState::new(&[PityRule::new(Rarity::Rare, 10)]).record(Rarity::Common);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(serde_json::from_str::<PityState>(&json).unwrap(), state);
    }
}

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    cards::Rarity,
    error::{config_err, Res},
    ledger::{CurrencyLedger, PlayerId},
    rng::RandomSource,
    RollError,
};

use super::{pity::PityState, RollKind, RollOrchestrator, RollResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AutoRollConfig {
    pub max_rolls: u32,
    /// Stop once a card of this rarity or better is drawn.
    pub stop_on_rarity: Rarity,
    /// Rolls performed between progress checkpoints.
    pub batch_size: u32,
}

impl AutoRollConfig {
    pub fn validate(&self) -> Res<()> {
        if self.max_rolls == 0 {
            return config_err("Auto-roll needs at least one roll.");
        }
        if self.batch_size == 0 {
            return config_err("Auto-roll batch size must be positive.");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StopReason {
    MaxReached,
    RarityAchieved,
    InsufficientCurrency,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AutoRollResult {
    pub total_rolls: u32,
    pub stopped_reason: StopReason,
    pub rolls: Vec<RollResult>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AutoRollProgress {
    Rolled(RollResult),
    BatchCompleted { completed: u32 },
    Finished(AutoRollResult),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoRollState {
    Idle,
    Running,
    Completed,
    Cancelled,
    /// Aborted by an error other than running out of currency.
    Failed,
}

/// Cooperative cancellation flag shared between a running auto-roll and
/// whoever may want to stop it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives repeated single rolls until a stop condition holds.
///
/// Stop conditions are checked after every roll, in this order: roll limit,
/// target rarity, then (before the next roll) cancellation and currency.
/// Completed rolls are final; cancelling never undoes them.
#[derive(Debug)]
pub struct AutoRollController {
    config: AutoRollConfig,
    state: AutoRollState,
    cancel: CancelToken,
}

impl AutoRollController {
    pub fn new(config: AutoRollConfig) -> Res<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: AutoRollState::Idle,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &AutoRollConfig {
        &self.config
    }

    pub fn state(&self) -> AutoRollState {
        self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request a stop. Takes effect between rolls, never mid-roll.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run to a terminal state. `progress` sees every roll as it completes,
    /// a checkpoint after each batch, and the final result. Errors other
    /// than running out of currency abort the run and are returned.
    pub async fn run<L, F>(
        &mut self,
        orchestrator: &RollOrchestrator<L>,
        player: PlayerId,
        pity: &mut PityState,
        kind: RollKind,
        rng: &mut dyn RandomSource,
        mut progress: F,
    ) -> Res<AutoRollResult>
    where
        L: CurrencyLedger,
        F: FnMut(AutoRollProgress) + Send,
    {
        if self.state != AutoRollState::Idle {
            return config_err("Auto-roll has already been started.");
        }
        self.state = AutoRollState::Running;
        tracing::debug!("Starting auto-roll for {player}: {:?}", self.config);

        let mut rolls: Vec<RollResult> = Vec::new();
        let reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let result = match orchestrator.roll_one(player, pity, kind, rng).await {
                Ok(result) => result,
                Err(RollError::InsufficientCurrency { .. }) => {
                    break StopReason::InsufficientCurrency
                }
                Err(e) => {
                    tracing::warn!(
                        "Auto-roll for {player} aborted after {} rolls: {e}",
                        rolls.len()
                    );
                    self.state = AutoRollState::Failed;
                    return Err(e);
                }
            };

            let rarity = result.rarity_drawn;
            rolls.push(result.clone());
            progress(AutoRollProgress::Rolled(result));

            let completed = rolls.len() as u32;
            if completed % self.config.batch_size == 0 {
                progress(AutoRollProgress::BatchCompleted { completed });
                tokio::task::yield_now().await;
            }

            if completed >= self.config.max_rolls {
                break StopReason::MaxReached;
            }
            if rarity >= self.config.stop_on_rarity {
                break StopReason::RarityAchieved;
            }
        };

        self.state = match reason {
            StopReason::Cancelled => AutoRollState::Cancelled,
            _ => AutoRollState::Completed,
        };
        let result = AutoRollResult {
            total_rolls: rolls.len() as u32,
            stopped_reason: reason,
            rolls,
        };
        tracing::info!(
            "Auto-roll for {player} stopped after {} rolls: {:?}",
            result.total_rolls,
            result.stopped_reason
        );
        progress(AutoRollProgress::Finished(result.clone()));
        Ok(result)
    }
}

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub type PlayerId = Uuid;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Gold,
    Tickets,
    Premium,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient balance: {available} available")]
    Insufficient { available: u64 },
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Spendable balances owned outside the engine. Implementations must make
/// `spend` all-or-nothing and atomic with respect to other spends for the
/// same player.
#[async_trait]
pub trait CurrencyLedger: Send + Sync {
    async fn spend(&self, player: PlayerId, currency: Currency, amount: u64)
        -> Result<(), LedgerError>;

    async fn credit(&self, player: PlayerId, currency: Currency, amount: u64)
        -> Result<(), LedgerError>;

    async fn balance(&self, player: PlayerId, currency: Currency) -> Result<u64, LedgerError>;
}

/// Process-local ledger. Balances that were never credited read as zero.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<(PlayerId, Currency), u64>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(player: PlayerId, currency: Currency, amount: u64) -> Self {
        let ledger = Self::new();
        ledger.set(player, currency, amount);
        ledger
    }

    /// Overwrite a balance directly, bypassing spend/credit.
    pub fn set(&self, player: PlayerId, currency: Currency, amount: u64) {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert((player, currency), amount);
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(PlayerId, Currency), u64>>, LedgerError> {
        self.balances
            .lock()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl CurrencyLedger for InMemoryLedger {
    async fn spend(
        &self,
        player: PlayerId,
        currency: Currency,
        amount: u64,
    ) -> Result<(), LedgerError> {
        let mut balances = self.lock()?;
        let balance = balances.entry((player, currency)).or_insert(0);
        if *balance < amount {
            return Err(LedgerError::Insufficient {
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }

    async fn credit(
        &self,
        player: PlayerId,
        currency: Currency,
        amount: u64,
    ) -> Result<(), LedgerError> {
        let mut balances = self.lock()?;
        let balance = balances.entry((player, currency)).or_insert(0);
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    async fn balance(&self, player: PlayerId, currency: Currency) -> Result<u64, LedgerError> {
        Ok(self
            .lock()?
            .get(&(player, currency))
            .copied()
            .unwrap_or(0))
    }
}

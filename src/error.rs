use thiserror::Error;

use crate::{cards::Rarity, ledger::Currency};

pub type Res<T> = Result<T, RollError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RollError {
    #[error("insufficient {currency:?}: {required} required, {available} available")]
    InsufficientCurrency {
        currency: Currency,
        required: u64,
        available: u64,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no cards at or below {0:?} in catalog")]
    CatalogExhausted(Rarity),
    #[error("content error: {0}")]
    Content(String),
    #[error("player session closed")]
    SessionClosed,
    #[error("ledger unavailable: {0}")]
    Ledger(String),
}

impl RollError {
    /// Insufficient currency is an expected, user-facing outcome rather than
    /// a fault.
    pub fn is_insufficient_currency(&self) -> bool {
        matches!(self, RollError::InsufficientCurrency { .. })
    }
}

pub fn config_err<T, S: ToString>(message: S) -> Res<T> {
    Err(RollError::Configuration(message.to_string()))
}

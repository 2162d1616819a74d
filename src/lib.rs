pub mod cards;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod rng;
pub mod roll;

pub use engine::{AutoRollHandle, RollEngine};
pub use error::{Res, RollError};

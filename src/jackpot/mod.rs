//! Progressive jackpots: pooled tiers, contribution skim, probabilistic
//! trigger and payout.

pub mod engine;
pub mod store;
pub mod types;

pub use engine::{JackpotEngine, JackpotTuning};
pub use store::JackpotStore;
pub use types::{Jackpot, JackpotContribution, JackpotTier, JackpotWin, LastWin};

//! Progressive jackpot data types.

use crate::currency::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Jackpot tiers, smallest first. Trigger evaluation walks this order and
/// stops at the first hit, so a round wins at most one jackpot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JackpotTier {
    Mini,
    Minor,
    Major,
    Grand,
}

impl JackpotTier {
    pub const ALL: [JackpotTier; 4] = [
        JackpotTier::Mini,
        JackpotTier::Minor,
        JackpotTier::Major,
        JackpotTier::Grand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JackpotTier::Mini => "mini",
            JackpotTier::Minor => "minor",
            JackpotTier::Major => "major",
            JackpotTier::Grand => "grand",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            JackpotTier::Mini => 0,
            JackpotTier::Minor => 1,
            JackpotTier::Major => 2,
            JackpotTier::Grand => 3,
        }
    }
}

impl fmt::Display for JackpotTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pooled jackpot row. Invariant: `seed ≤ current ≤ trigger_max`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jackpot {
    pub tier: JackpotTier,
    /// Current pooled amount, USD-denominated.
    pub current: Decimal,
    /// Reset floor after a win.
    pub seed: Decimal,
    /// Percent of each contributing bet skimmed into the pool.
    pub contribution_percent: Decimal,
    /// Pool must reach this before the tier becomes triggerable.
    pub trigger_min: Decimal,
    /// Forced-win ceiling; contributions never push the pool past it.
    pub trigger_max: Decimal,
    /// Base odds: one win in `base_odds` eligible bets at zero progress.
    pub base_odds: u64,
    /// Optimistic-concurrency token.
    pub version: u64,
    pub last_win: Option<LastWin>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata about the most recent win, kept on the jackpot row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LastWin {
    pub user_id: String,
    pub amount: Decimal,
    pub won_at: DateTime<Utc>,
}

/// Immutable record of one jackpot payout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JackpotWin {
    pub id: Uuid,
    pub tier: JackpotTier,
    pub user_id: String,
    pub game_id: String,
    pub round_id: Uuid,
    pub amount: Decimal,
    pub currency: Currency,
    pub won_at: DateTime<Utc>,
}

/// One tier's share of a contribution skim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JackpotContribution {
    pub tier: JackpotTier,
    /// Amount actually added (zero when the pool sits at its ceiling).
    pub amount: Decimal,
    pub new_total: Decimal,
}

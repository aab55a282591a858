//! Contribution skim and probabilistic trigger evaluation.
//!
//! Both entry points run after a settlement unit has committed and are
//! best-effort with respect to the caller: a jackpot failure is logged, never
//! propagated into the already-durable bet/win.

use crate::currency::Currency;
use crate::errors::CashdeskResult;
use crate::jackpot::store::JackpotStore;
use crate::jackpot::types::{Jackpot, JackpotContribution, JackpotTier, JackpotWin};
use crate::ledger_store::{LedgerStore, TransactionType};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Mutex;
use uuid::Uuid;

/// Trigger tuning knobs. The curve shape is fixed (monotonic odds
/// improvement, certainty at the ceiling); the exponent and bet bonus are
/// product tuning.
#[derive(Clone, Debug)]
pub struct JackpotTuning {
    /// Bets below this USD amount neither qualify for a trigger check.
    pub min_eligible_bet_usd: Decimal,
    /// Exponent on `(1 - progress)`; higher keeps odds long until late.
    pub odds_exponent: f64,
    /// Ceiling on the bet-size odds bonus factor.
    pub bet_bonus_cap: f64,
    /// Bet size (USD) at which the bonus factor saturates.
    pub bet_bonus_reference_usd: f64,
    /// Bounded retries for pool CAS updates and the payout credit.
    pub max_update_retries: u32,
}

impl Default for JackpotTuning {
    fn default() -> Self {
        Self {
            min_eligible_bet_usd: Decimal::new(10, 2), // 0.10
            odds_exponent: 3.0,
            bet_bonus_cap: 2.0,
            bet_bonus_reference_usd: 100.0,
            max_update_retries: 5,
        }
    }
}

/// Effective 1-in-N odds for one tier given the pool's progress toward its
/// ceiling and the size of the bet.
///
/// `progress = clamp((current − trigger_min) / (trigger_max − trigger_min), 0, 1)`;
/// odds shorten as `(1 − progress)^exponent` and by the bet bonus, and floor
/// at 1 (certainty).
pub(crate) fn effective_odds(tuning: &JackpotTuning, jackpot: &Jackpot, bet_usd: Decimal) -> u64 {
    let span = jackpot.trigger_max - jackpot.trigger_min;
    let progress = if span <= Decimal::ZERO {
        1.0
    } else {
        ((jackpot.current - jackpot.trigger_min) / span)
            .to_f64()
            .unwrap_or(1.0)
            .clamp(0.0, 1.0)
    };

    let reference = tuning.bet_bonus_reference_usd.max(f64::MIN_POSITIVE);
    let bet = bet_usd.to_f64().unwrap_or(0.0).max(0.0);
    let bonus = (1.0 + bet / reference).clamp(1.0, tuning.bet_bonus_cap.max(1.0));

    let odds = (jackpot.base_odds as f64) * (1.0 - progress).powf(tuning.odds_exponent) / bonus;
    if odds.is_finite() && odds >= 1.0 {
        odds.floor() as u64
    } else {
        1
    }
}

pub struct JackpotEngine {
    store: JackpotStore,
    ledger: LedgerStore,
    tuning: JackpotTuning,
    rng: Mutex<StdRng>,
}

impl JackpotEngine {
    pub fn new(store: JackpotStore, ledger: LedgerStore, tuning: JackpotTuning) -> Self {
        Self {
            store,
            ledger,
            tuning,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic engine for tests.
    pub fn with_seeded_rng(
        store: JackpotStore,
        ledger: LedgerStore,
        tuning: JackpotTuning,
        seed: u64,
    ) -> Self {
        Self {
            store,
            ledger,
            tuning,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn store(&self) -> &JackpotStore {
        &self.store
    }

    /// Skim every tier's configured percent of the bet into its pool, in
    /// fixed tier order, capped at each tier's ceiling. Best-effort: a tier
    /// that cannot be updated is logged and skipped.
    pub fn contribute(&self, bet_usd: Decimal) -> Vec<JackpotContribution> {
        let mut contributions = Vec::with_capacity(JackpotTier::ALL.len());
        if bet_usd <= Decimal::ZERO {
            return contributions;
        }

        for tier in JackpotTier::ALL {
            match self.contribute_tier(tier, bet_usd) {
                Ok(Some(contribution)) => contributions.push(contribution),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tier = %tier, error = %e, "Jackpot contribution failed");
                }
            }
        }
        contributions
    }

    fn contribute_tier(
        &self,
        tier: JackpotTier,
        bet_usd: Decimal,
    ) -> CashdeskResult<Option<JackpotContribution>> {
        for _ in 0..self.tuning.max_update_retries.max(1) {
            let row = self.store.jackpot(tier)?;
            let skim = (row.contribution_percent * bet_usd / Decimal::ONE_HUNDRED).round_dp(8);
            if skim <= Decimal::ZERO {
                return Ok(None);
            }

            let target = (row.current + skim).min(row.trigger_max);
            match self.store.update_pool(tier, row.version, target) {
                Ok(updated) => {
                    return Ok(Some(JackpotContribution {
                        tier,
                        amount: target - row.current,
                        new_total: updated.current,
                    }));
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(crate::errors::CashdeskError::conflict(
            "jackpot",
            tier.to_string(),
        ))
    }

    /// Evaluate the trigger for one settled round. Walks tiers smallest
    /// first; the first hit claims its pool (reset + win record in one
    /// batch) and is paid out through an independent ledger credit.
    pub fn check_trigger(
        &self,
        user_id: &str,
        game_id: &str,
        round_id: Uuid,
        currency: Currency,
        bet_usd: Decimal,
    ) -> Option<JackpotWin> {
        if bet_usd < self.tuning.min_eligible_bet_usd {
            return None;
        }

        for tier in JackpotTier::ALL {
            let row = match self.store.jackpot(tier) {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(tier = %tier, error = %e, "Jackpot row unavailable for trigger check");
                    continue;
                }
            };
            if row.current < row.trigger_min {
                continue;
            }

            // A pool at its ceiling wins unconditionally; otherwise one
            // uniform draw against the effective odds decides.
            let forced = row.current >= row.trigger_max;
            let hit = forced || {
                let odds = effective_odds(&self.tuning, &row, bet_usd);
                let draw = self.rng.lock().unwrap().gen_range(1..=odds);
                draw == 1
            };
            if !hit {
                continue;
            }

            let win = JackpotWin {
                id: Uuid::new_v4(),
                tier,
                user_id: user_id.to_string(),
                game_id: game_id.to_string(),
                round_id,
                amount: row.current,
                currency,
                won_at: Utc::now(),
            };

            match self.store.record_win(row.version, &win) {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {
                    // Another round claimed this pool between our read and
                    // the reset; the remaining tiers still get their check.
                    tracing::warn!(tier = %tier, "Lost jackpot claim race");
                    continue;
                }
                Err(e) => {
                    tracing::error!(tier = %tier, error = %e, "Failed to record jackpot win");
                    continue;
                }
            }

            self.pay_out(&win);

            tracing::info!(
                tier = %tier,
                user_id = %win.user_id,
                amount = %win.amount,
                forced,
                "Jackpot won"
            );
            return Some(win);
        }
        None
    }

    /// Credit the payout under the ledger's version discipline, retrying
    /// conflicts. A persistent failure leaves the recorded win standing for
    /// operator follow-up rather than re-inflating the claimed pool.
    fn pay_out(&self, win: &JackpotWin) {
        for attempt in 1..=self.tuning.max_update_retries.max(1) {
            match self.ledger.credit(
                &win.user_id,
                win.currency,
                win.amount,
                TransactionType::JackpotWin,
                Some(win.round_id),
            ) {
                Ok(_) => return,
                Err(e) if e.is_conflict() => {
                    tracing::debug!(win_id = %win.id, attempt, "Jackpot payout conflict, retrying");
                }
                Err(e) => {
                    tracing::error!(win_id = %win.id, error = %e, "Jackpot payout credit failed");
                    return;
                }
            }
        }
        tracing::error!(win_id = %win.id, "Jackpot payout exhausted retries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JackpotTierConfig;
    use crate::storage::Storage;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn engine_fixture(tiers: &[JackpotTierConfig]) -> (tempfile::TempDir, JackpotEngine) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let ledger = LedgerStore::new(storage.clone());

        let mut initial = BTreeMap::new();
        initial.insert(Currency::USD, dec!(1000));
        ledger.create_wallet("player", initial).unwrap();

        let store = JackpotStore::new(storage);
        store.init_tiers(tiers).unwrap();

        let engine =
            JackpotEngine::with_seeded_rng(store, ledger, JackpotTuning::default(), 42);
        (dir, engine)
    }

    fn tier(
        tier: JackpotTier,
        seed: Decimal,
        percent: Decimal,
        min: Decimal,
        max: Decimal,
        odds: u64,
    ) -> JackpotTierConfig {
        JackpotTierConfig {
            tier,
            seed,
            contribution_percent: percent,
            trigger_min: min,
            trigger_max: max,
            base_odds: odds,
        }
    }

    fn fill_to(engine: &JackpotEngine, t: JackpotTier, amount: Decimal) {
        let row = engine.store().jackpot(t).unwrap();
        engine.store().update_pool(t, row.version, amount).unwrap();
    }

    #[test]
    fn test_effective_odds_shape() {
        let tuning = JackpotTuning::default();
        let mut jackpot = Jackpot {
            tier: JackpotTier::Mini,
            current: dec!(20),
            seed: dec!(10),
            contribution_percent: dec!(0.5),
            trigger_min: dec!(20),
            trigger_max: dec!(120),
            base_odds: 1000,
            version: 1,
            last_win: None,
            updated_at: Utc::now(),
        };

        // Zero progress, negligible bet: full base odds.
        assert_eq!(effective_odds(&tuning, &jackpot, dec!(0.10)), 999);

        // Full progress: certainty.
        jackpot.current = dec!(120);
        assert_eq!(effective_odds(&tuning, &jackpot, dec!(0.10)), 1);

        // Bet at the bonus reference halves the odds (cap 2x).
        jackpot.current = dec!(20);
        let small = effective_odds(&tuning, &jackpot, dec!(0.10));
        let large = effective_odds(&tuning, &jackpot, dec!(100));
        assert!(large <= small / 2 + 1);

        // A huge bet cannot shorten odds past the cap.
        let huge = effective_odds(&tuning, &jackpot, dec!(100000));
        assert_eq!(huge, 500);
    }

    #[test]
    fn test_contribution_skims_percent_in_tier_order() {
        let (_dir, engine) = engine_fixture(&[
            tier(JackpotTier::Mini, dec!(10), dec!(0.5), dec!(20), dec!(100), 1000),
            tier(JackpotTier::Minor, dec!(50), dec!(0.3), dec!(100), dec!(500), 10000),
        ]);

        let contributions = engine.contribute(dec!(200));
        assert_eq!(contributions.len(), 2);
        assert_eq!(contributions[0].tier, JackpotTier::Mini);
        assert_eq!(contributions[0].amount, dec!(1.0));
        assert_eq!(contributions[0].new_total, dec!(11.0));
        assert_eq!(contributions[1].tier, JackpotTier::Minor);
        assert_eq!(contributions[1].amount, dec!(0.6));
    }

    #[test]
    fn test_contribution_never_exceeds_ceiling() {
        let (_dir, engine) = engine_fixture(&[tier(
            JackpotTier::Mini,
            dec!(10),
            dec!(50.0),
            dec!(20),
            dec!(100),
            1000,
        )]);
        fill_to(&engine, JackpotTier::Mini, dec!(99.5));

        let contributions = engine.contribute(dec!(100));
        assert_eq!(contributions[0].amount, dec!(0.5));
        assert_eq!(contributions[0].new_total, dec!(100));

        // Already at the ceiling: zero-amount contribution, pool unchanged.
        let again = engine.contribute(dec!(100));
        assert_eq!(again[0].amount, dec!(0));
        assert_eq!(
            engine.store().jackpot(JackpotTier::Mini).unwrap().current,
            dec!(100)
        );
    }

    #[test]
    fn test_bet_below_floor_is_ineligible() {
        let (_dir, engine) = engine_fixture(&[tier(
            JackpotTier::Mini,
            dec!(10),
            dec!(0.5),
            dec!(20),
            dec!(100),
            1000,
        )]);
        fill_to(&engine, JackpotTier::Mini, dec!(100));

        let win = engine.check_trigger("player", "slots-1", Uuid::new_v4(), Currency::USD, dec!(0.05));
        assert!(win.is_none());
    }

    #[test]
    fn test_forced_trigger_at_ceiling_pays_and_resets() {
        let (_dir, engine) = engine_fixture(&[tier(
            JackpotTier::Mini,
            dec!(10),
            dec!(0.5),
            dec!(20),
            dec!(100),
            1_000_000,
        )]);
        fill_to(&engine, JackpotTier::Mini, dec!(100));

        let round_id = Uuid::new_v4();
        let win = engine
            .check_trigger("player", "slots-1", round_id, Currency::USD, dec!(1.00))
            .expect("pool at ceiling must win");

        assert_eq!(win.amount, dec!(100));
        assert_eq!(win.round_id, round_id);

        let row = engine.store().jackpot(JackpotTier::Mini).unwrap();
        assert_eq!(row.current, dec!(10));
        assert_eq!(row.last_win.as_ref().unwrap().amount, dec!(100));

        // Payout landed as an independent wallet credit.
        let wallet = engine.ledger.wallet("player").unwrap();
        assert_eq!(wallet.balance(Currency::USD), dec!(1100));

        let (wins, _) = engine.store().recent_wins(None, 10).unwrap();
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].id, win.id);
    }

    #[test]
    fn test_smallest_eligible_tier_wins_first() {
        let (_dir, engine) = engine_fixture(&[
            tier(JackpotTier::Mini, dec!(10), dec!(0.5), dec!(20), dec!(100), 1000),
            tier(JackpotTier::Minor, dec!(50), dec!(0.3), dec!(100), dec!(500), 10000),
        ]);
        fill_to(&engine, JackpotTier::Mini, dec!(100));
        fill_to(&engine, JackpotTier::Minor, dec!(500));

        let win = engine
            .check_trigger("player", "slots-1", Uuid::new_v4(), Currency::USD, dec!(1.00))
            .unwrap();
        assert_eq!(win.tier, JackpotTier::Mini);

        // The larger tier keeps its pool; one round wins at most one jackpot.
        let minor = engine.store().jackpot(JackpotTier::Minor).unwrap();
        assert_eq!(minor.current, dec!(500));
    }

    #[test]
    fn test_draw_path_with_unit_odds_always_hits() {
        // base_odds 1 makes the uniform draw a certainty without the pool
        // being at its ceiling, exercising the non-forced path.
        let (_dir, engine) = engine_fixture(&[tier(
            JackpotTier::Mini,
            dec!(10),
            dec!(0.5),
            dec!(20),
            dec!(100),
            1,
        )]);
        fill_to(&engine, JackpotTier::Mini, dec!(50));

        let win = engine
            .check_trigger("player", "slots-1", Uuid::new_v4(), Currency::USD, dec!(1.00))
            .unwrap();
        assert_eq!(win.amount, dec!(50));
    }

    #[test]
    fn test_pool_below_trigger_min_is_not_a_candidate() {
        let (_dir, engine) = engine_fixture(&[tier(
            JackpotTier::Mini,
            dec!(10),
            dec!(0.5),
            dec!(20),
            dec!(100),
            1,
        )]);
        // Pool at seed (10) sits below trigger_min (20); even unit odds
        // cannot make it a candidate.
        let win = engine.check_trigger("player", "slots-1", Uuid::new_v4(), Currency::USD, dec!(1.00));
        assert!(win.is_none());
    }
}

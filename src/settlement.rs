//! Settlement coordinator: one round from validation to result.
//!
//! The ledger unit is the only step that may fail the round. Everything after
//! its commit (jackpot contribution, trigger check, event emission) is
//! best-effort: logged on failure, never unwinding the durable bet/win.

use crate::api::monitoring::MetricsRegistry;
use crate::config::SettlementConfig;
use crate::errors::{CashdeskError, CashdeskResult};
use crate::events::{EventBus, SettlementEvent};
use crate::jackpot::engine::JackpotEngine;
use crate::jackpot::types::JackpotWin;
use crate::ledger_store::{LedgerStore, SettleRequest, SettledRound};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// One round to settle against an open session.
#[derive(Clone, Debug)]
pub struct RoundRequest {
    pub session_id: Uuid,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    pub multiplier: Option<Decimal>,
    pub result_data: Option<serde_json::Value>,
    pub provider_round_id: Option<String>,
    /// Provider idempotency serial when the round arrived via the gateway.
    pub provider_serial: Option<String>,
}

impl RoundRequest {
    pub fn new(session_id: Uuid, bet_amount: Decimal, win_amount: Decimal) -> Self {
        Self {
            session_id,
            bet_amount,
            win_amount,
            multiplier: None,
            result_data: None,
            provider_round_id: None,
            provider_serial: None,
        }
    }
}

/// The settled round as seen by callers.
#[derive(Clone, Debug, Serialize)]
pub struct RoundOutcome {
    pub round_id: Uuid,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    /// `win - bet`.
    pub net_result: Decimal,
    pub new_balance: Decimal,
    pub settled_at: chrono::DateTime<chrono::Utc>,
    pub jackpot_win: Option<JackpotWin>,
}

pub struct SettlementCoordinator {
    ledger: LedgerStore,
    jackpots: Arc<JackpotEngine>,
    events: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    config: SettlementConfig,
}

impl SettlementCoordinator {
    pub fn new(
        ledger: LedgerStore,
        jackpots: Arc<JackpotEngine>,
        events: Arc<EventBus>,
        metrics: Arc<MetricsRegistry>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            jackpots,
            events,
            metrics,
            config,
        }
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Settle one round: validate, commit the ledger unit (retrying
    /// optimistic conflicts a bounded number of times), then run the
    /// post-commit pipeline.
    pub fn record_round(&self, req: RoundRequest) -> CashdeskResult<RoundOutcome> {
        if req.bet_amount.is_sign_negative() || req.win_amount.is_sign_negative() {
            return Err(CashdeskError::validation(
                "bet_amount and win_amount must not be negative",
            ));
        }

        let session = self.ledger.session(req.session_id)?;
        let settle_req = SettleRequest {
            user_id: session.user_id.clone(),
            session_id: session.id,
            currency: session.currency,
            bet_amount: req.bet_amount,
            win_amount: req.win_amount,
            multiplier: req.multiplier,
            result_data: req.result_data,
            provider_round_id: req.provider_round_id,
            provider_serial: req.provider_serial,
        };

        let settled = self.commit_with_retry(&settle_req)?;
        MetricsRegistry::incr(&self.metrics.rounds_settled_total);

        let jackpot_win = self.post_commit(&settled);

        Ok(RoundOutcome {
            round_id: settled.round.id,
            bet_amount: settled.round.bet_amount,
            win_amount: settled.round.win_amount,
            net_result: settled.round.win_amount - settled.round.bet_amount,
            new_balance: settled.new_balance,
            settled_at: settled.round.settled_at,
            jackpot_win,
        })
    }

    fn commit_with_retry(&self, req: &SettleRequest) -> CashdeskResult<SettledRound> {
        let mut attempt = 0;
        loop {
            match self.ledger.settle(req) {
                Ok(settled) => return Ok(settled),
                Err(e) if e.is_conflict() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    MetricsRegistry::incr(&self.metrics.settlement_conflicts_total);
                    tracing::debug!(
                        user_id = %req.user_id,
                        attempt,
                        "Settlement conflict, retrying from fresh read"
                    );
                }
                Err(e) => {
                    if matches!(e, CashdeskError::InsufficientFunds { .. }) {
                        MetricsRegistry::incr(&self.metrics.insufficient_funds_total);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// The post-commit pipeline. Each step is independent; a failing step is
    /// logged under its label and the rest still run.
    fn post_commit(&self, settled: &SettledRound) -> Option<JackpotWin> {
        let round = &settled.round;
        let bet_usd = round.currency.to_usd(round.bet_amount);

        // contribute
        let contributions = self.jackpots.contribute(bet_usd);
        MetricsRegistry::add(
            &self.metrics.jackpot_contributions_total,
            contributions.len() as u64,
        );

        // trigger
        let jackpot_win = self.jackpots.check_trigger(
            &round.user_id,
            &round.game_id,
            round.id,
            round.currency,
            bet_usd,
        );
        if let Some(win) = &jackpot_win {
            MetricsRegistry::incr(&self.metrics.jackpot_wins_total);
            self.events
                .publish(SettlementEvent::JackpotWon { win: win.clone() });
        }

        // events
        self.events.publish(SettlementEvent::RoundSettled {
            user_id: round.user_id.clone(),
            game_id: round.game_id.clone(),
            round_id: round.id,
            currency: round.currency,
            bet_amount: round.bet_amount,
            win_amount: round.win_amount,
            new_balance: settled.new_balance,
            settled_at: round.settled_at,
        });
        if self.is_big_win(round.bet_amount, round.win_amount, round.currency) {
            self.events.publish(SettlementEvent::BigWin {
                user_id: round.user_id.clone(),
                game_id: round.game_id.clone(),
                round_id: round.id,
                currency: round.currency,
                win_amount: round.win_amount,
                multiplier: round.multiplier.unwrap_or(Decimal::ZERO),
            });
        }

        jackpot_win
    }

    fn is_big_win(
        &self,
        bet: Decimal,
        win: Decimal,
        currency: crate::currency::Currency,
    ) -> bool {
        bet > Decimal::ZERO
            && win >= bet * self.config.big_win_multiplier
            && currency.to_usd(win) >= self.config.big_win_min_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JackpotTierConfig, JackpotsConfig};
    use crate::currency::Currency;
    use crate::jackpot::engine::JackpotTuning;
    use crate::jackpot::store::JackpotStore;
    use crate::jackpot::types::JackpotTier;
    use crate::ledger_store::GameSession;
    use crate::storage::Storage;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn coordinator_fixture(
        tiers: &[JackpotTierConfig],
    ) -> (tempfile::TempDir, Arc<EventBus>, SettlementCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let ledger = LedgerStore::new(storage.clone());

        let jackpot_store = JackpotStore::new(storage);
        jackpot_store.init_tiers(tiers).unwrap();
        let tuning = JackpotTuning {
            min_eligible_bet_usd: JackpotsConfig::default().min_eligible_bet_usd,
            ..JackpotTuning::default()
        };
        let engine = Arc::new(JackpotEngine::with_seeded_rng(
            jackpot_store,
            ledger.clone(),
            tuning,
            7,
        ));

        let events = EventBus::new(64);
        let coordinator = SettlementCoordinator::new(
            ledger,
            engine,
            events.clone(),
            Arc::new(MetricsRegistry::new()),
            SettlementConfig::default(),
        );
        (dir, events, coordinator)
    }

    fn funded_session(coordinator: &SettlementCoordinator, user: &str, amount: Decimal) -> GameSession {
        let mut initial = BTreeMap::new();
        initial.insert(Currency::USD, amount);
        coordinator.ledger().create_wallet(user, initial).unwrap();
        coordinator
            .ledger()
            .open_session(user, "slots-1", Currency::USD)
            .unwrap()
    }

    fn mini_tier(seed: Decimal, min: Decimal, max: Decimal, odds: u64) -> JackpotTierConfig {
        JackpotTierConfig {
            tier: JackpotTier::Mini,
            seed,
            contribution_percent: dec!(0.5),
            trigger_min: min,
            trigger_max: max,
            base_odds: odds,
        }
    }

    #[test]
    fn test_round_commits_and_contributes() {
        let (_dir, _events, coordinator) =
            coordinator_fixture(&[mini_tier(dec!(10), dec!(20), dec!(100), 1_000_000)]);
        let session = funded_session(&coordinator, "alice", dec!(100.00));

        let outcome = coordinator
            .record_round(RoundRequest::new(session.id, dec!(2.00), dec!(5.00)))
            .unwrap();

        assert_eq!(outcome.net_result, dec!(3.00));
        assert_eq!(outcome.new_balance, dec!(103.00));
        assert!(outcome.jackpot_win.is_none());

        // 0.5% of the 2.00 bet landed in the pool.
        let pool = coordinator
            .jackpots
            .store()
            .jackpot(JackpotTier::Mini)
            .unwrap();
        assert_eq!(pool.current, dec!(10.01));
    }

    #[test]
    fn test_insufficient_funds_surfaces_without_side_effects() {
        let (_dir, _events, coordinator) =
            coordinator_fixture(&[mini_tier(dec!(10), dec!(20), dec!(100), 1_000_000)]);
        let session = funded_session(&coordinator, "bob", dec!(1.00));

        let err = coordinator
            .record_round(RoundRequest::new(session.id, dec!(5.00), dec!(0)))
            .unwrap_err();
        assert!(matches!(err, CashdeskError::InsufficientFunds { .. }));

        // No commit, no contribution.
        let pool = coordinator
            .jackpots
            .store()
            .jackpot(JackpotTier::Mini)
            .unwrap();
        assert_eq!(pool.current, dec!(10));
        assert_eq!(
            coordinator.ledger().wallet("bob").unwrap().balance(Currency::USD),
            dec!(1.00)
        );
    }

    #[test]
    fn test_negative_amounts_rejected_before_any_read() {
        let (_dir, _events, coordinator) =
            coordinator_fixture(&[mini_tier(dec!(10), dec!(20), dec!(100), 1_000_000)]);
        let err = coordinator
            .record_round(RoundRequest::new(Uuid::new_v4(), dec!(-1.00), dec!(0)))
            .unwrap_err();
        assert!(matches!(err, CashdeskError::Validation(_)));
    }

    #[test]
    fn test_forced_jackpot_flows_into_outcome_and_events() {
        let (_dir, events, coordinator) =
            coordinator_fixture(&[mini_tier(dec!(10), dec!(20), dec!(100), 1_000_000)]);
        let session = funded_session(&coordinator, "carol", dec!(100.00));
        let mut rx = events.subscribe();

        // Drive the pool to its ceiling so the next eligible bet must win.
        let store = coordinator.jackpots.store();
        let row = store.jackpot(JackpotTier::Mini).unwrap();
        store
            .update_pool(JackpotTier::Mini, row.version, dec!(100))
            .unwrap();

        let outcome = coordinator
            .record_round(RoundRequest::new(session.id, dec!(1.00), dec!(0)))
            .unwrap();
        let win = outcome.jackpot_win.expect("forced trigger must win");
        assert_eq!(win.amount, dec!(100));

        // Payout is an independent credit on top of the round's balance.
        let wallet = coordinator.ledger().wallet("carol").unwrap();
        assert_eq!(wallet.balance(Currency::USD), dec!(199.00));

        let mut saw_jackpot = false;
        let mut saw_round = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SettlementEvent::JackpotWon { .. } => saw_jackpot = true,
                SettlementEvent::RoundSettled { .. } => saw_round = true,
                _ => {}
            }
        }
        assert!(saw_jackpot);
        assert!(saw_round);
    }

    #[test]
    fn test_big_win_event_requires_both_thresholds() {
        let (_dir, events, coordinator) =
            coordinator_fixture(&[mini_tier(dec!(10), dec!(20), dec!(100), 1_000_000)]);
        let session = funded_session(&coordinator, "dave", dec!(500.00));
        let mut rx = events.subscribe();

        // 12x but only 24 USD: below the USD floor.
        coordinator
            .record_round(RoundRequest::new(session.id, dec!(2.00), dec!(24.00)))
            .unwrap();
        // 30x and 60 USD: qualifies.
        coordinator
            .record_round(RoundRequest::new(session.id, dec!(2.00), dec!(60.00)))
            .unwrap();

        let mut big_wins = 0;
        while let Ok(event) = rx.try_recv() {
            if let SettlementEvent::BigWin { win_amount, .. } = event {
                assert_eq!(win_amount, dec!(60.00));
                big_wins += 1;
            }
        }
        assert_eq!(big_wins, 1);
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let (_dir, _events, coordinator) =
            coordinator_fixture(&[mini_tier(dec!(10), dec!(20), dec!(100), 1_000_000)]);
        let err = coordinator
            .record_round(RoundRequest::new(Uuid::new_v4(), dec!(1.00), dec!(0)))
            .unwrap_err();
        assert!(matches!(err, CashdeskError::NotFound { .. }));
    }
}

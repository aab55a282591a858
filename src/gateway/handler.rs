//! The aggregator callback handler.
//!
//! Terminates the provider's seamless-wallet protocol. Every code path ends
//! in a well-formed envelope over HTTP 200; the provider treats anything else
//! as a delivery failure and retries indefinitely. Duplicate deliveries of
//! one serial number converge on a single externally-visible response via the
//! idempotency store, with a durable fallback on the round row after the
//! in-memory entry has expired.

use crate::api::monitoring::MetricsRegistry;
use crate::currency::Currency;
use crate::directory::{GameCatalog, IdentityStore};
use crate::errors::CashdeskError;
use crate::gateway::crypto::PayloadCipher;
use crate::gateway::protocol::{
    code, normalize_amounts, CallbackEnvelope, CallbackEvent, CallbackResponsePayload,
    ResponseEnvelope,
};
use crate::idempotency::{IdempotencyStore, Reservation};
use crate::ledger_store::GameRound;
use crate::settlement::{RoundRequest, SettlementCoordinator};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Bound on how long a duplicate delivery waits for the in-flight owner of
/// its serial. Expiry answers retryable instead of letting the transport cut
/// the connection without an envelope.
const DUPLICATE_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Gateway {
    cipher: PayloadCipher,
    idempotency: Arc<IdempotencyStore>,
    identity: IdentityStore,
    catalog: GameCatalog,
    coordinator: Arc<SettlementCoordinator>,
    metrics: Arc<MetricsRegistry>,
    agency_uid: String,
    wait_timeout: Duration,
}

impl Gateway {
    pub fn new(
        cipher: PayloadCipher,
        idempotency: Arc<IdempotencyStore>,
        identity: IdentityStore,
        catalog: GameCatalog,
        coordinator: Arc<SettlementCoordinator>,
        metrics: Arc<MetricsRegistry>,
        agency_uid: String,
    ) -> Self {
        Self {
            cipher,
            idempotency,
            identity,
            catalog,
            coordinator,
            metrics,
            agency_uid,
            wait_timeout: DUPLICATE_WAIT_TIMEOUT,
        }
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Handle one callback delivery. Never fails: every outcome is an
    /// envelope.
    pub async fn handle(&self, envelope: CallbackEnvelope) -> ResponseEnvelope {
        MetricsRegistry::incr(&self.metrics.callbacks_total);
        let response = self.process(envelope).await;
        if !response.is_ok() {
            MetricsRegistry::incr(&self.metrics.callback_errors_total);
        }
        response
    }

    async fn process(&self, envelope: CallbackEnvelope) -> ResponseEnvelope {
        if envelope.agency_uid != self.agency_uid {
            tracing::warn!(agency_uid = %envelope.agency_uid, "Callback from unknown agency");
            return ResponseEnvelope::error(code::INVALID_AGENCY, "unknown agency");
        }

        let event = match self.decode_event(&envelope.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable callback payload");
                return ResponseEnvelope::error(code::MALFORMED_PAYLOAD, "malformed payload");
            }
        };
        if event.serial_number.trim().is_empty() {
            return ResponseEnvelope::error(code::VALIDATION, "missing serial_number");
        }

        // Claim the serial. Losers of a duplicate race wait for the winner's
        // outcome; a released reservation sends them back around the loop.
        let serial = event.serial_number.clone();
        loop {
            match self.idempotency.reserve(&serial) {
                Reservation::Owner => break,
                Reservation::Replay(body) => {
                    MetricsRegistry::incr(&self.metrics.callback_replays_total);
                    return self.parse_cached(&serial, &body);
                }
                Reservation::Wait(rx) => match tokio::time::timeout(self.wait_timeout, rx).await {
                    Ok(Ok(Some(body))) => {
                        MetricsRegistry::incr(&self.metrics.callback_replays_total);
                        return self.parse_cached(&serial, &body);
                    }
                    // Owner released (or vanished); contend again.
                    Ok(_) => continue,
                    // Owner is stalled. The provider must still get an
                    // envelope; a retryable code makes it redeliver once the
                    // owner's outcome is cached.
                    Err(_) => {
                        tracing::warn!(%serial, "Timed out waiting on a concurrent delivery");
                        return ResponseEnvelope::error(
                            code::RETRYABLE_INTERNAL,
                            "concurrent delivery in flight",
                        );
                    }
                },
            }
        }

        // Durable fallback: the in-memory entry may have expired, but a round
        // settled under this serial answers the replay byte-identically (the
        // stored balance and timestamp reproduce the plaintext, and the
        // deterministic cipher reproduces the ciphertext).
        match self.coordinator.ledger().round_by_serial(&serial) {
            Ok(Some(round)) => {
                MetricsRegistry::incr(&self.metrics.callback_replays_total);
                let response = self.round_replay_response(&round);
                self.cache_or_release(&serial, &response, true);
                return response;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(%serial, error = %e, "Serial index lookup failed");
                self.idempotency.release(&serial);
                return ResponseEnvelope::error(code::RETRYABLE_INTERNAL, "internal error");
            }
        }

        let (response, cacheable) = self.settle_event(&event);
        self.cache_or_release(&serial, &response, cacheable);
        response
    }

    fn decode_event(&self, payload: &str) -> Result<CallbackEvent, CashdeskError> {
        let plaintext = self.cipher.decrypt(payload)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn parse_cached(&self, serial: &str, body: &str) -> ResponseEnvelope {
        match serde_json::from_str(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(%serial, error = %e, "Corrupted cached response");
                ResponseEnvelope::error(code::RETRYABLE_INTERNAL, "internal error")
            }
        }
    }

    fn cache_or_release(&self, serial: &str, response: &ResponseEnvelope, cacheable: bool) {
        // Only success envelopes are replayable; caching an error would
        // freeze a retryable failure.
        if cacheable {
            match serde_json::to_string(response) {
                Ok(body) => self.idempotency.fulfill(serial, body),
                Err(e) => {
                    tracing::error!(%serial, error = %e, "Failed to encode response for cache");
                    self.idempotency.release(serial);
                }
            }
        } else {
            self.idempotency.release(serial);
        }
    }

    fn round_replay_response(&self, round: &GameRound) -> ResponseEnvelope {
        self.success_response(round.balance_after, round.settled_at.timestamp_millis())
    }

    fn success_response(
        &self,
        credit_amount: rust_decimal::Decimal,
        timestamp: i64,
    ) -> ResponseEnvelope {
        let payload = CallbackResponsePayload {
            credit_amount,
            timestamp,
        };
        match serde_json::to_vec(&payload) {
            Ok(plaintext) => ResponseEnvelope::ok(self.cipher.encrypt(&plaintext)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode response payload");
                ResponseEnvelope::error(code::RETRYABLE_INTERNAL, "internal error")
            }
        }
    }

    /// Resolve, normalize, and settle one event. Returns the envelope and
    /// whether it may be cached for replay.
    fn settle_event(&self, event: &CallbackEvent) -> (ResponseEnvelope, bool) {
        let currency: Currency = match event.currency_code.parse() {
            Ok(c) => c,
            Err(_) => {
                return (
                    ResponseEnvelope::error(
                        code::VALIDATION,
                        format!("unsupported currency {}", event.currency_code),
                    ),
                    false,
                )
            }
        };

        let user_id = match self.identity.user_for_member_account(&event.member_account) {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                tracing::warn!(member_account = %event.member_account, "Unknown member account");
                return (
                    ResponseEnvelope::error(code::UNKNOWN_MEMBER, "unknown member account"),
                    false,
                );
            }
            Err(e) => {
                tracing::error!(member_account = %event.member_account, error = %e, "Member lookup failed");
                return (
                    ResponseEnvelope::error(code::RETRYABLE_INTERNAL, "internal error"),
                    false,
                );
            }
        };

        let Some(game) = self.catalog.by_uid(&event.game_uid) else {
            tracing::warn!(game_uid = %event.game_uid, "Unknown game uid");
            return (
                ResponseEnvelope::error(code::UNKNOWN_GAME, "unknown game"),
                false,
            );
        };

        let (debit, credit) = normalize_amounts(event.bet_amount, event.win_amount);

        let session = match self
            .coordinator
            .ledger()
            .find_or_open_session(&user_id, &game.id, currency)
        {
            Ok(session) => session,
            Err(CashdeskError::NotFound { .. }) => {
                tracing::warn!(%user_id, "Member has no wallet");
                return (
                    ResponseEnvelope::error(code::UNKNOWN_MEMBER, "member has no wallet"),
                    false,
                );
            }
            Err(e) => {
                tracing::error!(%user_id, error = %e, "Failed to resolve session");
                return (
                    ResponseEnvelope::error(code::RETRYABLE_INTERNAL, "internal error"),
                    false,
                );
            }
        };

        let request = RoundRequest {
            session_id: session.id,
            bet_amount: debit,
            win_amount: credit,
            multiplier: None,
            result_data: event.data.clone(),
            provider_round_id: event.game_round.clone(),
            provider_serial: Some(event.serial_number.clone()),
        };

        match self.coordinator.record_round(request) {
            Ok(outcome) => (
                self.success_response(outcome.new_balance, outcome.settled_at.timestamp_millis()),
                true,
            ),
            // The provider reads balance < bet as a rejected bet; this is a
            // success envelope with the balance unchanged, not an error.
            Err(CashdeskError::InsufficientFunds { balance, .. }) => (
                self.success_response(balance, Utc::now().timestamp_millis()),
                true,
            ),
            Err(CashdeskError::Validation(msg)) => {
                tracing::warn!(%user_id, %msg, "Callback failed validation");
                (ResponseEnvelope::error(code::VALIDATION, msg), false)
            }
            Err(e) => {
                tracing::error!(%user_id, error = %e, "Callback settlement failed");
                (
                    ResponseEnvelope::error(code::RETRYABLE_INTERNAL, "internal error"),
                    false,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JackpotTierConfig, SettlementConfig};
    use crate::directory::Game;
    use crate::events::EventBus;
    use crate::jackpot::engine::{JackpotEngine, JackpotTuning};
    use crate::jackpot::store::JackpotStore;
    use crate::jackpot::types::JackpotTier;
    use crate::ledger_store::LedgerStore;
    use crate::storage::Storage;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const KEY: &str = "0123456789abcdef0123456789abcdef";
    const AGENCY: &str = "agency-test";

    fn gateway_fixture() -> (tempfile::TempDir, Gateway) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let ledger = LedgerStore::new(storage.clone());

        let mut initial = BTreeMap::new();
        initial.insert(Currency::USD, dec!(100.00));
        ledger.create_wallet("user-1", initial).unwrap();

        let identity = IdentityStore::new(storage.clone());
        identity
            .get_or_create("user-1", || "acct-1".to_string())
            .unwrap();

        let jackpot_store = JackpotStore::new(storage);
        jackpot_store
            .init_tiers(&[JackpotTierConfig {
                tier: JackpotTier::Mini,
                seed: dec!(10),
                contribution_percent: dec!(0.5),
                trigger_min: dec!(20),
                trigger_max: dec!(100),
                base_odds: 1_000_000,
            }])
            .unwrap();
        let engine = Arc::new(JackpotEngine::with_seeded_rng(
            jackpot_store,
            ledger.clone(),
            JackpotTuning::default(),
            1,
        ));

        let coordinator = Arc::new(SettlementCoordinator::new(
            ledger,
            engine,
            EventBus::new(16),
            Arc::new(MetricsRegistry::new()),
            SettlementConfig::default(),
        ));

        let catalog = GameCatalog::new(&[Game {
            id: "slots-1".to_string(),
            game_uid: "prov-8821".to_string(),
            name: "Golden Reels".to_string(),
        }]);

        let gateway = Gateway::new(
            PayloadCipher::new(KEY).unwrap(),
            IdempotencyStore::new(Duration::from_secs(60)),
            identity,
            catalog,
            coordinator,
            Arc::new(MetricsRegistry::new()),
            AGENCY.to_string(),
        );
        (dir, gateway)
    }

    fn envelope_for(gateway: &Gateway, event: &CallbackEvent) -> CallbackEnvelope {
        CallbackEnvelope {
            agency_uid: AGENCY.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            payload: gateway
                .cipher
                .encrypt(&serde_json::to_vec(event).unwrap()),
        }
    }

    fn event(serial: &str, bet: &str, win: &str) -> CallbackEvent {
        CallbackEvent {
            serial_number: serial.to_string(),
            currency_code: "USD".to_string(),
            game_uid: "prov-8821".to_string(),
            member_account: "acct-1".to_string(),
            bet_amount: bet.parse().unwrap(),
            win_amount: win.parse().unwrap(),
            timestamp: Utc::now().timestamp_millis(),
            game_round: Some("r-1".to_string()),
            data: None,
        }
    }

    fn decrypt_payload(gateway: &Gateway, envelope: &ResponseEnvelope) -> CallbackResponsePayload {
        let plaintext = gateway.cipher.decrypt(&envelope.payload).unwrap();
        serde_json::from_slice(&plaintext).unwrap()
    }

    #[tokio::test]
    async fn test_agency_mismatch_stops_processing() {
        let (_dir, gateway) = gateway_fixture();
        let mut envelope = envelope_for(&gateway, &event("s-1", "1.00", "0"));
        envelope.agency_uid = "someone-else".to_string();

        let response = gateway.handle(envelope).await;
        assert_eq!(response.code, code::INVALID_AGENCY);
        assert!(response.payload.is_empty());
    }

    #[tokio::test]
    async fn test_undecryptable_payload_answers_error_envelope() {
        let (_dir, gateway) = gateway_fixture();
        let envelope = CallbackEnvelope {
            agency_uid: AGENCY.to_string(),
            timestamp: 0,
            payload: "!!not base64!!".to_string(),
        };
        let response = gateway.handle(envelope).await;
        assert_eq!(response.code, code::MALFORMED_PAYLOAD);
    }

    #[tokio::test]
    async fn test_unknown_member_and_game_are_structured_errors() {
        let (_dir, gateway) = gateway_fixture();

        let mut unknown_member = event("s-m", "1.00", "0");
        unknown_member.member_account = "acct-nobody".to_string();
        let response = gateway
            .handle(envelope_for(&gateway, &unknown_member))
            .await;
        assert_eq!(response.code, code::UNKNOWN_MEMBER);

        let mut unknown_game = event("s-g", "1.00", "0");
        unknown_game.game_uid = "prov-0000".to_string();
        let response = gateway.handle(envelope_for(&gateway, &unknown_game)).await;
        assert_eq!(response.code, code::UNKNOWN_GAME);
    }

    #[tokio::test]
    async fn test_settles_and_returns_encrypted_balance() {
        let (_dir, gateway) = gateway_fixture();
        let response = gateway
            .handle(envelope_for(&gateway, &event("s-2", "2.00", "5.00")))
            .await;

        assert!(response.is_ok());
        let payload = decrypt_payload(&gateway, &response);
        assert_eq!(payload.credit_amount, dec!(103.00));
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_success_with_unchanged_balance() {
        let (_dir, gateway) = gateway_fixture();
        let response = gateway
            .handle(envelope_for(&gateway, &event("s-3", "500.00", "0")))
            .await;

        assert!(response.is_ok());
        let payload = decrypt_payload(&gateway, &response);
        assert_eq!(payload.credit_amount, dec!(100.00));
    }

    #[tokio::test]
    async fn test_replay_returns_identical_envelope() {
        let (_dir, gateway) = gateway_fixture();
        let event = event("s-4", "2.00", "0");

        let first = gateway.handle(envelope_for(&gateway, &event)).await;
        let second = gateway.handle(envelope_for(&gateway, &event)).await;

        assert_eq!(first, second);
        // The wallet moved exactly once.
        let payload = decrypt_payload(&gateway, &second);
        assert_eq!(payload.credit_amount, dec!(98.00));
    }

    #[tokio::test]
    async fn test_error_responses_are_not_cached() {
        let (_dir, gateway) = gateway_fixture();

        let mut bad = event("s-5", "1.00", "0");
        bad.game_uid = "prov-0000".to_string();
        let response = gateway.handle(envelope_for(&gateway, &bad)).await;
        assert_eq!(response.code, code::UNKNOWN_GAME);

        // Same serial with a corrected event processes fresh.
        let good = event("s-5", "1.00", "0");
        let response = gateway.handle(envelope_for(&gateway, &good)).await;
        assert!(response.is_ok());
        let payload = decrypt_payload(&gateway, &response);
        assert_eq!(payload.credit_amount, dec!(99.00));
    }

    #[tokio::test]
    async fn test_stalled_duplicate_answers_retryable_envelope() {
        let (_dir, gateway) = gateway_fixture();
        let gateway = gateway.with_wait_timeout(Duration::from_millis(50));

        // Occupy the serial as a stalled in-flight delivery would.
        assert!(matches!(
            gateway.idempotency.reserve("s-stall"),
            Reservation::Owner
        ));

        let response = gateway
            .handle(envelope_for(&gateway, &event("s-stall", "1.00", "0")))
            .await;
        assert_eq!(response.code, code::RETRYABLE_INTERNAL);
        assert!(response.payload.is_empty());
    }
}

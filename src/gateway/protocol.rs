//! Wire types for the aggregator's callback and launch protocols.
//!
//! Everything here mirrors the provider contract: an outer envelope carrying
//! an encrypted JSON payload, decimal amounts as strings, epoch-millis
//! timestamps. The envelope is always returned over HTTP 200; a non-zero
//! `code` is the only error signal the provider understands.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Provider-facing result codes. The zero/non-zero split is contractual;
/// the specific non-zero values are ours (stable per deployment so the
/// provider's operators can map them).
pub mod code {
    pub const OK: i64 = 0;
    pub const INVALID_AGENCY: i64 = 1001;
    pub const MALFORMED_PAYLOAD: i64 = 1002;
    pub const UNKNOWN_MEMBER: i64 = 1003;
    pub const UNKNOWN_GAME: i64 = 1004;
    pub const VALIDATION: i64 = 1005;
    pub const RETRYABLE_INTERNAL: i64 = 1500;
}

/// Inbound callback body and outbound launch request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    pub agency_uid: String,
    /// Epoch millis at the sender.
    pub timestamp: i64,
    /// Base64 of the AES-256-ECB encrypted JSON payload.
    pub payload: String,
}

/// The response envelope for both directions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub code: i64,
    pub msg: String,
    /// Encrypted payload on success; empty on error.
    pub payload: String,
}

impl ResponseEnvelope {
    pub fn ok(payload: String) -> Self {
        Self {
            code: code::OK,
            msg: "success".to_string(),
            payload,
        }
    }

    pub fn error(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            payload: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == code::OK
    }
}

/// Decrypted inbound settlement event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackEvent {
    /// Provider-issued idempotency key.
    pub serial_number: String,
    pub currency_code: String,
    pub game_uid: String,
    pub member_account: String,
    /// Decimal string; negative denotes a bet refund.
    pub bet_amount: Decimal,
    /// Decimal string; negative denotes a win reversal.
    pub win_amount: Decimal,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_round: Option<String>,
    /// Opaque provider data, carried through to the round record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Decrypted response payload for the callback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallbackResponsePayload {
    /// The member's balance after settlement, in the event's currency.
    pub credit_amount: Decimal,
    pub timestamp: i64,
}

/// Decrypted request payload for the outbound game-launch call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchRequestPayload {
    pub member_account: String,
    pub game_uid: String,
    pub credit_amount: Decimal,
    pub currency_code: String,
    pub callback_url: String,
}

/// Decrypted response payload from the launch call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchResponsePayload {
    pub game_launch_url: String,
}

/// Fold signed provider amounts into the non-negative debit/credit pair the
/// settlement coordinator accepts.
///
/// A negative bet is a bet refund (credited back); a negative win is a win
/// reversal (folded into the debit). The identities:
/// `debit = max(0, bet) + max(0, -win)`, `credit = max(0, win) + max(0, -bet)`.
pub fn normalize_amounts(bet: Decimal, win: Decimal) -> (Decimal, Decimal) {
    let zero = Decimal::ZERO;
    let debit = bet.max(zero) + (-win).max(zero);
    let credit = win.max(zero) + (-bet).max(zero);
    (debit, credit)
}

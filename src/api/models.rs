//! API Request/Response Models
//!
//! All request and response types for the internal API endpoints. The
//! aggregator callback speaks its own envelope types from `gateway::protocol`.

use crate::currency::Currency;
use crate::jackpot::{Jackpot, JackpotWin, LastWin};
use crate::ledger_store::{GameSession, LedgerTransaction, Wallet};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub estimated_keys: u64,
}

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

/// Provision a wallet. Currency keys are ISO-style codes ("USD", "EUR", ...);
/// unknown codes are rejected up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    pub user_id: String,
    #[serde(default)]
    pub initial_balances: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletResponse {
    pub user_id: String,
    pub balances: BTreeMap<Currency, Decimal>,
    pub version: u64,
    pub total_wagered_usd: Decimal,
    pub total_won_usd: Decimal,
    pub total_bonus_usd: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            user_id: wallet.user_id,
            balances: wallet.balances,
            version: wallet.version,
            total_wagered_usd: wallet.total_wagered_usd,
            total_won_usd: wallet.total_won_usd,
            total_bonus_usd: wallet.total_bonus_usd,
            created_at: wallet.created_at,
            updated_at: wallet.updated_at,
        }
    }
}

/// Cursor-paginated ledger history, newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsQuery {
    pub currency: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsPage {
    pub transactions: Vec<LedgerTransaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    pub user_id: String,
    pub game_id: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub user_id: String,
    pub game_id: String,
    pub currency: Currency,
    pub total_bet: Decimal,
    pub total_win: Decimal,
    pub rounds_played: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub open: bool,
}

impl From<GameSession> for SessionResponse {
    fn from(session: GameSession) -> Self {
        let open = session.is_open();
        Self {
            id: session.id,
            user_id: session.user_id,
            game_id: session.game_id,
            currency: session.currency,
            total_bet: session.total_bet,
            total_win: session.total_win,
            rounds_played: session.rounds_played,
            started_at: session.started_at,
            ended_at: session.ended_at,
            open,
        }
    }
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

/// Settle one round against an open session. Negative amounts are rejected;
/// refunds arrive through the callback protocol, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRoundRequest {
    pub session_id: Uuid,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    #[serde(default)]
    pub multiplier: Option<Decimal>,
    #[serde(default)]
    pub result_data: Option<serde_json::Value>,
    #[serde(default)]
    pub provider_round_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Jackpots
// ---------------------------------------------------------------------------

/// Public view of one jackpot tier. Trigger bounds and odds are tunables,
/// not part of the public surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JackpotView {
    pub tier: String,
    pub current: Decimal,
    pub seed: Decimal,
    pub contribution_percent: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_win: Option<LastWin>,
    pub updated_at: DateTime<Utc>,
}

impl From<Jackpot> for JackpotView {
    fn from(row: Jackpot) -> Self {
        Self {
            tier: row.tier.to_string(),
            current: row.current,
            seed: row.seed,
            contribution_percent: row.contribution_percent,
            last_win: row.last_win,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JackpotsResponse {
    pub jackpots: Vec<JackpotView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WinsQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JackpotWinsPage {
    pub wins: Vec<JackpotWin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub user_id: String,
    pub game_id: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchResponse {
    pub game_launch_url: String,
    pub member_account: String,
}

//! Persistent wallet ledger stored in RocksDB.
//!
//! One settlement is one `WriteBatch`: wallet row, session row, round row,
//! ledger transactions and their index entries all commit together or not at
//! all. Wallet rows carry an optimistic version; the commit-time check runs
//! under a short in-process lock so a concurrent mutation surfaces as a
//! `Conflict` instead of a lost update.

use crate::currency::Currency;
use crate::errors::{CashdeskError, CashdeskResult, StorageError};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

const WALLET_PREFIX: &str = "wallet:";
const TX_PREFIX: &str = "ledger:tx:";
const TX_INDEX_PREFIX: &str = "ledger:index:";
const SESSION_PREFIX: &str = "session:row:";
const OPEN_SESSION_PREFIX: &str = "session:open:";
const ROUND_PREFIX: &str = "round:row:";
const ROUND_SERIAL_PREFIX: &str = "round:serial:";

/// One user's multi-currency wallet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    pub balances: BTreeMap<Currency, Decimal>,
    /// Optimistic-concurrency token; bumped on every mutation.
    pub version: u64,
    pub total_wagered_usd: Decimal,
    pub total_won_usd: Decimal,
    pub total_bonus_usd: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn balance(&self, currency: Currency) -> Decimal {
        self.balances.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Bet,
    Win,
    JackpotWin,
    Refund,
    Adjustment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Completed,
    Reversed,
}

/// Immutable ledger entry; appended on every balance change, never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub user_id: String,
    pub tx_type: TransactionType,
    pub currency: Currency,
    /// Signed: debits negative, credits positive.
    pub amount: Decimal,
    pub amount_usd: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub round_id: Option<Uuid>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Rounds played by one user on one game in one currency.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameSession {
    pub id: Uuid,
    pub user_id: String,
    pub game_id: String,
    pub currency: Currency,
    pub total_bet: Decimal,
    pub total_win: Decimal,
    pub rounds_played: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl GameSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// One settled outcome, immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameRound {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub game_id: String,
    pub currency: Currency,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    pub multiplier: Option<Decimal>,
    pub result_data: Option<serde_json::Value>,
    /// Provider round reference, kept for audit correlation.
    pub provider_round_id: Option<String>,
    /// Provider idempotency serial; indexed so a replay after the in-memory
    /// cache expired can still be answered from this row.
    pub provider_serial: Option<String>,
    /// Balance in `currency` immediately after this round settled.
    pub balance_after: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// Input to the atomic settlement unit.
#[derive(Clone, Debug)]
pub struct SettleRequest {
    pub user_id: String,
    pub session_id: Uuid,
    pub currency: Currency,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    pub multiplier: Option<Decimal>,
    pub result_data: Option<serde_json::Value>,
    pub provider_round_id: Option<String>,
    pub provider_serial: Option<String>,
}

/// Outcome of one committed settlement unit.
#[derive(Clone, Debug)]
pub struct SettledRound {
    pub round: GameRound,
    pub new_balance: Decimal,
    pub wallet_version: u64,
}

fn wallet_key(user_id: &str) -> Vec<u8> {
    format!("{}{}", WALLET_PREFIX, user_id).into_bytes()
}

fn tx_key(tx_id: Uuid) -> Vec<u8> {
    format!("{}{}", TX_PREFIX, tx_id).into_bytes()
}

fn tx_index_prefix(user_id: &str) -> Vec<u8> {
    format!("{}{}:", TX_INDEX_PREFIX, user_id).into_bytes()
}

// Per-process tiebreak for index entries created within one millisecond.
static TX_SEQ: AtomicU64 = AtomicU64::new(0);

fn tx_index_key(user_id: &str, created_at: DateTime<Utc>, tx_id: Uuid) -> Vec<u8> {
    // Sort newest-first by using an inverted timestamp as the primary sort
    // key and an inverted sequence number as the tiebreak, so entries from
    // the same millisecond still order by recency.
    // Key layout: prefix | user | ':' | inv_millis(be) | inv_seq(be) | tx_id(16)
    let inv_ts = u64::MAX - created_at.timestamp_millis().max(0) as u64;
    let inv_seq = u64::MAX - TX_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut key = tx_index_prefix(user_id);
    key.extend_from_slice(&inv_ts.to_be_bytes());
    key.extend_from_slice(&inv_seq.to_be_bytes());
    key.extend_from_slice(tx_id.as_bytes());
    key
}

fn session_key(session_id: Uuid) -> Vec<u8> {
    format!("{}{}", SESSION_PREFIX, session_id).into_bytes()
}

fn open_session_key(user_id: &str, game_id: &str, currency: Currency) -> Vec<u8> {
    format!("{}{}:{}:{}", OPEN_SESSION_PREFIX, user_id, game_id, currency).into_bytes()
}

fn round_key(round_id: Uuid) -> Vec<u8> {
    format!("{}{}", ROUND_PREFIX, round_id).into_bytes()
}

fn round_serial_key(serial: &str) -> Vec<u8> {
    format!("{}{}", ROUND_SERIAL_PREFIX, serial).into_bytes()
}

fn encode_row<T: Serialize>(what: &str, value: &T) -> CashdeskResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        CashdeskError::Storage(StorageError::WriteFailed(format!(
            "Failed to encode {}: {}",
            what, e
        )))
    })
}

fn decode_row<T: for<'de> Deserialize<'de>>(what: &str, bytes: &[u8]) -> CashdeskResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        CashdeskError::Storage(StorageError::CorruptedData(format!(
            "Failed to decode {}: {}",
            what, e
        )))
    })
}

/// Wallet ledger store. Clone-cheap; all clones share the commit lock.
#[derive(Clone)]
pub struct LedgerStore {
    storage: Storage,
    commit_lock: std::sync::Arc<Mutex<()>>,
}

impl LedgerStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            commit_lock: std::sync::Arc::new(Mutex::new(())),
        }
    }

    pub fn create_wallet(
        &self,
        user_id: &str,
        initial: BTreeMap<Currency, Decimal>,
    ) -> CashdeskResult<Wallet> {
        if user_id.trim().is_empty() {
            return Err(CashdeskError::validation("user_id must not be empty"));
        }
        for (currency, amount) in &initial {
            if amount.is_sign_negative() {
                return Err(CashdeskError::validation(format!(
                    "initial balance for {} must not be negative",
                    currency
                )));
            }
        }

        let now = Utc::now();
        let wallet = Wallet {
            user_id: user_id.to_string(),
            balances: initial,
            version: 1,
            total_wagered_usd: Decimal::ZERO,
            total_won_usd: Decimal::ZERO,
            total_bonus_usd: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        let bytes = encode_row("wallet", &wallet)?;

        let _guard = self.commit_lock.lock().unwrap();
        if self.storage.get(&wallet_key(user_id))?.is_some() {
            return Err(CashdeskError::validation(format!(
                "wallet already exists for user {}",
                user_id
            )));
        }
        self.storage.put(&wallet_key(user_id), &bytes)?;
        Ok(wallet)
    }

    pub fn wallet(&self, user_id: &str) -> CashdeskResult<Wallet> {
        let bytes = self
            .storage
            .get(&wallet_key(user_id))?
            .ok_or_else(|| CashdeskError::not_found("wallet", user_id))?;
        decode_row("wallet", &bytes)
    }

    pub fn wallet_exists(&self, user_id: &str) -> bool {
        matches!(self.storage.get(&wallet_key(user_id)), Ok(Some(_)))
    }

    /// Settle one round as a single atomic unit: debit the bet, create the
    /// round, credit the win, append the ledger transactions, roll the
    /// session aggregates and bump the wallet version.
    ///
    /// Fails with `Conflict` if the wallet version moved between the initial
    /// read and commit; the caller retries from a fresh read.
    pub fn settle(&self, req: &SettleRequest) -> CashdeskResult<SettledRound> {
        if req.bet_amount.is_sign_negative() {
            return Err(CashdeskError::validation("bet_amount must not be negative"));
        }
        if req.win_amount.is_sign_negative() {
            return Err(CashdeskError::validation("win_amount must not be negative"));
        }

        // Read phase: establish the version this unit is conditioned on.
        let wallet = self.wallet(&req.user_id)?;
        let expected_version = wallet.version;

        let session = self.session(req.session_id)?;
        if session.user_id != req.user_id {
            return Err(CashdeskError::validation(format!(
                "session {} does not belong to user {}",
                req.session_id, req.user_id
            )));
        }
        if session.currency != req.currency {
            return Err(CashdeskError::validation(format!(
                "session {} is denominated in {}, not {}",
                req.session_id, session.currency, req.currency
            )));
        }

        let balance = wallet.balance(req.currency);
        if balance < req.bet_amount {
            return Err(CashdeskError::InsufficientFunds {
                currency: req.currency,
                balance,
                requested: req.bet_amount,
            });
        }

        // Commit phase: short critical section, version check then batch.
        let _guard = self.commit_lock.lock().unwrap();

        let current = self.wallet(&req.user_id)?;
        if current.version != expected_version {
            return Err(CashdeskError::conflict("wallet", &req.user_id));
        }
        let mut session = self.session(req.session_id)?;
        if !session.is_open() {
            return Err(CashdeskError::validation(format!(
                "session {} is closed",
                req.session_id
            )));
        }

        let now = Utc::now();
        let round_id = Uuid::new_v4();
        let after_bet = balance - req.bet_amount;
        let new_balance = after_bet + req.win_amount;

        let multiplier = req.multiplier.or_else(|| {
            if req.bet_amount > Decimal::ZERO {
                req.win_amount
                    .checked_div(req.bet_amount)
                    .map(|m| m.round_dp(4))
            } else {
                None
            }
        });

        let round = GameRound {
            id: round_id,
            session_id: session.id,
            user_id: req.user_id.clone(),
            game_id: session.game_id.clone(),
            currency: req.currency,
            bet_amount: req.bet_amount,
            win_amount: req.win_amount,
            multiplier,
            result_data: req.result_data.clone(),
            provider_round_id: req.provider_round_id.clone(),
            provider_serial: req.provider_serial.clone(),
            balance_after: new_balance,
            settled_at: now,
        };

        let mut wallet = current;
        wallet.balances.insert(req.currency, new_balance);
        wallet.version += 1;
        wallet.total_wagered_usd += req.currency.to_usd(req.bet_amount);
        wallet.total_won_usd += req.currency.to_usd(req.win_amount);
        wallet.updated_at = now;

        session.total_bet += req.bet_amount;
        session.total_win += req.win_amount;
        session.rounds_played += 1;

        let mut batch = WriteBatch::default();
        batch.put(wallet_key(&req.user_id), encode_row("wallet", &wallet)?);
        batch.put(session_key(session.id), encode_row("session", &session)?);
        batch.put(round_key(round_id), encode_row("round", &round)?);

        if req.bet_amount > Decimal::ZERO {
            let debit = LedgerTransaction {
                id: Uuid::new_v4(),
                user_id: req.user_id.clone(),
                tx_type: TransactionType::Bet,
                currency: req.currency,
                amount: -req.bet_amount,
                amount_usd: -req.currency.to_usd(req.bet_amount),
                balance_before: balance,
                balance_after: after_bet,
                round_id: Some(round_id),
                status: TransactionStatus::Completed,
                created_at: now,
            };
            self.append_transaction(&mut batch, &debit)?;
        }
        if req.win_amount > Decimal::ZERO {
            let credit = LedgerTransaction {
                id: Uuid::new_v4(),
                user_id: req.user_id.clone(),
                tx_type: TransactionType::Win,
                currency: req.currency,
                amount: req.win_amount,
                amount_usd: req.currency.to_usd(req.win_amount),
                balance_before: after_bet,
                balance_after: new_balance,
                round_id: Some(round_id),
                status: TransactionStatus::Completed,
                created_at: now,
            };
            self.append_transaction(&mut batch, &credit)?;
        }
        if let Some(serial) = &req.provider_serial {
            batch.put(round_serial_key(serial), round_id.to_string().as_bytes());
        }

        self.storage.write(batch)?;

        Ok(SettledRound {
            round,
            new_balance,
            wallet_version: wallet.version,
        })
    }

    /// Apply a standalone credit under the same version discipline as
    /// `settle`. Used for jackpot payouts and manual adjustments.
    pub fn credit(
        &self,
        user_id: &str,
        currency: Currency,
        amount: Decimal,
        tx_type: TransactionType,
        round_id: Option<Uuid>,
    ) -> CashdeskResult<(Decimal, Uuid)> {
        if amount <= Decimal::ZERO {
            return Err(CashdeskError::validation("credit amount must be positive"));
        }

        let wallet = self.wallet(user_id)?;
        let expected_version = wallet.version;
        let balance = wallet.balance(currency);
        let new_balance = balance + amount;

        let _guard = self.commit_lock.lock().unwrap();

        let mut wallet = self.wallet(user_id)?;
        if wallet.version != expected_version {
            return Err(CashdeskError::conflict("wallet", user_id));
        }

        let now = Utc::now();
        wallet.balances.insert(currency, new_balance);
        wallet.version += 1;
        wallet.updated_at = now;
        match tx_type {
            TransactionType::JackpotWin | TransactionType::Win => {
                wallet.total_won_usd += currency.to_usd(amount);
            }
            TransactionType::Adjustment => {
                wallet.total_bonus_usd += currency.to_usd(amount);
            }
            _ => {}
        }

        let tx = LedgerTransaction {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tx_type,
            currency,
            amount,
            amount_usd: currency.to_usd(amount),
            balance_before: balance,
            balance_after: new_balance,
            round_id,
            status: TransactionStatus::Completed,
            created_at: now,
        };

        let mut batch = WriteBatch::default();
        batch.put(wallet_key(user_id), encode_row("wallet", &wallet)?);
        self.append_transaction(&mut batch, &tx)?;
        self.storage.write(batch)?;

        Ok((new_balance, tx.id))
    }

    fn append_transaction(
        &self,
        batch: &mut WriteBatch,
        tx: &LedgerTransaction,
    ) -> CashdeskResult<()> {
        batch.put(tx_key(tx.id), encode_row("transaction", tx)?);
        batch.put(tx_index_key(&tx.user_id, tx.created_at, tx.id), Vec::new());
        Ok(())
    }

    /// Open a session for user+game+currency, superseding (closing) any
    /// session currently open for the same triple.
    pub fn open_session(
        &self,
        user_id: &str,
        game_id: &str,
        currency: Currency,
    ) -> CashdeskResult<GameSession> {
        if !self.wallet_exists(user_id) {
            return Err(CashdeskError::not_found("wallet", user_id));
        }

        let _guard = self.commit_lock.lock().unwrap();

        let now = Utc::now();
        let session = GameSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            game_id: game_id.to_string(),
            currency,
            total_bet: Decimal::ZERO,
            total_win: Decimal::ZERO,
            rounds_played: 0,
            started_at: now,
            ended_at: None,
        };

        let pointer = open_session_key(user_id, game_id, currency);
        let mut batch = WriteBatch::default();

        if let Some(bytes) = self.storage.get(&pointer)? {
            if let Ok(old_id) = Uuid::try_parse(&String::from_utf8_lossy(&bytes)) {
                if let Ok(mut old) = self.session(old_id) {
                    if old.is_open() {
                        old.ended_at = Some(now);
                        batch.put(session_key(old_id), encode_row("session", &old)?);
                        tracing::debug!(
                            old_session = %old_id,
                            new_session = %session.id,
                            "Superseding open session"
                        );
                    }
                }
            }
        }

        batch.put(session_key(session.id), encode_row("session", &session)?);
        batch.put(pointer, session.id.to_string().as_bytes());
        self.storage.write(batch)?;

        Ok(session)
    }

    /// Close a session. Closing an already-closed session is a no-op.
    pub fn close_session(&self, session_id: Uuid) -> CashdeskResult<GameSession> {
        let _guard = self.commit_lock.lock().unwrap();

        let mut session = self.session(session_id)?;
        if !session.is_open() {
            return Ok(session);
        }
        session.ended_at = Some(Utc::now());

        let pointer = open_session_key(&session.user_id, &session.game_id, session.currency);
        let mut batch = WriteBatch::default();
        batch.put(session_key(session_id), encode_row("session", &session)?);
        // Only clear the pointer if it still refers to this session.
        if let Some(bytes) = self.storage.get(&pointer)? {
            if String::from_utf8_lossy(&bytes) == session_id.to_string() {
                batch.delete(pointer);
            }
        }
        self.storage.write(batch)?;

        Ok(session)
    }

    pub fn session(&self, session_id: Uuid) -> CashdeskResult<GameSession> {
        let bytes = self
            .storage
            .get(&session_key(session_id))?
            .ok_or_else(|| CashdeskError::not_found("session", session_id.to_string()))?;
        decode_row("session", &bytes)
    }

    pub fn find_open_session(
        &self,
        user_id: &str,
        game_id: &str,
        currency: Currency,
    ) -> CashdeskResult<Option<GameSession>> {
        let pointer = open_session_key(user_id, game_id, currency);
        let Some(bytes) = self.storage.get(&pointer)? else {
            return Ok(None);
        };
        let id = Uuid::try_parse(&String::from_utf8_lossy(&bytes)).map_err(|e| {
            CashdeskError::Storage(StorageError::CorruptedData(format!(
                "Invalid open-session pointer for {}: {}",
                user_id, e
            )))
        })?;
        let session = self.session(id)?;
        Ok(session.is_open().then_some(session))
    }

    pub fn find_or_open_session(
        &self,
        user_id: &str,
        game_id: &str,
        currency: Currency,
    ) -> CashdeskResult<GameSession> {
        if let Some(session) = self.find_open_session(user_id, game_id, currency)? {
            return Ok(session);
        }
        self.open_session(user_id, game_id, currency)
    }

    pub fn round(&self, round_id: Uuid) -> CashdeskResult<GameRound> {
        let bytes = self
            .storage
            .get(&round_key(round_id))?
            .ok_or_else(|| CashdeskError::not_found("round", round_id.to_string()))?;
        decode_row("round", &bytes)
    }

    /// Look up the round settled under a provider serial number, if any.
    pub fn round_by_serial(&self, serial: &str) -> CashdeskResult<Option<GameRound>> {
        let Some(bytes) = self.storage.get(&round_serial_key(serial))? else {
            return Ok(None);
        };
        let id = Uuid::try_parse(&String::from_utf8_lossy(&bytes)).map_err(|e| {
            CashdeskError::Storage(StorageError::CorruptedData(format!(
                "Invalid serial index for {}: {}",
                serial, e
            )))
        })?;
        Ok(Some(self.round(id)?))
    }

    /// Page through a user's ledger, newest first. The cursor is the
    /// hex-encoded index key of the last row returned; `None` means the
    /// ledger is exhausted. A currency filter keeps scanning until the page
    /// fills or the index runs out, so a filtered page is only short at the
    /// end of the ledger.
    pub fn user_transactions(
        &self,
        user_id: &str,
        currency: Option<Currency>,
        cursor: Option<&str>,
        limit: usize,
    ) -> CashdeskResult<(Vec<LedgerTransaction>, Option<String>)> {
        let mut after = match cursor {
            Some(c) => Some(hex::decode(c).map_err(|e| {
                CashdeskError::Storage(StorageError::CorruptedData(format!(
                    "Invalid cursor hex: {}",
                    e
                )))
            })?),
            None => None,
        };

        let prefix = tx_index_prefix(user_id);
        let limit = limit.max(1);
        let mut transactions = Vec::with_capacity(limit);
        let mut next_cursor = None;

        'scan: loop {
            let rows = self.storage.scan_prefix(&prefix, after.as_deref(), limit);
            let exhausted = rows.len() < limit;

            for (key, _value) in rows {
                after = Some(key.clone());
                if key.len() < prefix.len() + 32 {
                    continue;
                }
                let tx_id_off = key.len() - 16;
                let Ok(tx_id) = Uuid::from_slice(&key[tx_id_off..]) else {
                    continue;
                };
                let Some(bytes) = self.storage.get(&tx_key(tx_id))? else {
                    continue;
                };
                let tx: LedgerTransaction = decode_row("transaction", &bytes)?;
                if currency.map_or(true, |c| tx.currency == c) {
                    transactions.push(tx);
                    if transactions.len() == limit {
                        next_cursor = Some(hex::encode(&key));
                        break 'scan;
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        Ok((transactions, next_cursor))
    }
}

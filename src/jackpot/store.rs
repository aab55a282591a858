//! Persistent jackpot rows and win records.
//!
//! Each tier is an independent row with its own optimistic version; tier
//! updates serialize under per-tier locks so jackpot contention never touches
//! wallet locking.

use crate::config::JackpotTierConfig;
use crate::errors::{CashdeskError, CashdeskResult, StorageError};
use crate::jackpot::types::{Jackpot, JackpotTier, JackpotWin, LastWin};
use crate::storage::Storage;
use chrono::Utc;
use rocksdb::WriteBatch;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const JACKPOT_PREFIX: &str = "jackpot:tier:";
const WIN_PREFIX: &str = "jackpot:win:row:";
const WIN_INDEX_PREFIX: &[u8] = b"jackpot:win:index:";

fn jackpot_key(tier: JackpotTier) -> Vec<u8> {
    format!("{}{}", JACKPOT_PREFIX, tier).into_bytes()
}

fn win_key(win_id: Uuid) -> Vec<u8> {
    format!("{}{}", WIN_PREFIX, win_id).into_bytes()
}

fn win_index_key(won_at_millis: i64, win_id: Uuid) -> Vec<u8> {
    // Newest-first listing via inverted timestamp.
    let inv_ts = u64::MAX - won_at_millis.max(0) as u64;
    let mut key = Vec::with_capacity(WIN_INDEX_PREFIX.len() + 24);
    key.extend_from_slice(WIN_INDEX_PREFIX);
    key.extend_from_slice(&inv_ts.to_be_bytes());
    key.extend_from_slice(win_id.as_bytes());
    key
}

#[derive(Clone)]
pub struct JackpotStore {
    storage: Storage,
    tier_locks: Arc<[Mutex<()>; 4]>,
}

impl JackpotStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            tier_locks: Arc::new([
                Mutex::new(()),
                Mutex::new(()),
                Mutex::new(()),
                Mutex::new(()),
            ]),
        }
    }

    /// Seed missing tier rows and push configured tunables into existing
    /// ones. Pool amount, version history and last-win metadata survive a
    /// tunable change.
    pub fn init_tiers(&self, tiers: &[JackpotTierConfig]) -> CashdeskResult<()> {
        for cfg in tiers {
            let _guard = self.tier_locks[cfg.tier.index()].lock().unwrap();
            match self.load(cfg.tier)? {
                None => {
                    let row = Jackpot {
                        tier: cfg.tier,
                        current: cfg.seed,
                        seed: cfg.seed,
                        contribution_percent: cfg.contribution_percent,
                        trigger_min: cfg.trigger_min,
                        trigger_max: cfg.trigger_max,
                        base_odds: cfg.base_odds,
                        version: 1,
                        last_win: None,
                        updated_at: Utc::now(),
                    };
                    self.put(&row)?;
                    tracing::info!(tier = %cfg.tier, seed = %cfg.seed, "Seeded jackpot tier");
                }
                Some(mut row) => {
                    let unchanged = row.seed == cfg.seed
                        && row.contribution_percent == cfg.contribution_percent
                        && row.trigger_min == cfg.trigger_min
                        && row.trigger_max == cfg.trigger_max
                        && row.base_odds == cfg.base_odds;
                    if unchanged {
                        continue;
                    }
                    row.seed = cfg.seed;
                    row.contribution_percent = cfg.contribution_percent;
                    row.trigger_min = cfg.trigger_min;
                    row.trigger_max = cfg.trigger_max;
                    row.base_odds = cfg.base_odds;
                    row.version += 1;
                    row.updated_at = Utc::now();
                    self.put(&row)?;
                    tracing::info!(tier = %cfg.tier, "Updated jackpot tier tunables");
                }
            }
        }
        Ok(())
    }

    fn load(&self, tier: JackpotTier) -> CashdeskResult<Option<Jackpot>> {
        let Some(bytes) = self.storage.get(&jackpot_key(tier))? else {
            return Ok(None);
        };
        let row = serde_json::from_slice(&bytes).map_err(|e| {
            CashdeskError::Storage(StorageError::CorruptedData(format!(
                "Failed to decode jackpot {}: {}",
                tier, e
            )))
        })?;
        Ok(Some(row))
    }

    fn put(&self, row: &Jackpot) -> CashdeskResult<()> {
        let bytes = serde_json::to_vec(row).map_err(|e| {
            CashdeskError::Storage(StorageError::WriteFailed(format!(
                "Failed to encode jackpot {}: {}",
                row.tier, e
            )))
        })?;
        self.storage.put(&jackpot_key(row.tier), &bytes)
    }

    pub fn jackpot(&self, tier: JackpotTier) -> CashdeskResult<Jackpot> {
        self.load(tier)?
            .ok_or_else(|| CashdeskError::not_found("jackpot", tier.to_string()))
    }

    /// All tiers in fixed evaluation order.
    pub fn all(&self) -> CashdeskResult<Vec<Jackpot>> {
        JackpotTier::ALL.iter().map(|t| self.jackpot(*t)).collect()
    }

    /// Set a tier's pool, conditioned on the version the caller read.
    pub fn update_pool(
        &self,
        tier: JackpotTier,
        expected_version: u64,
        new_current: Decimal,
    ) -> CashdeskResult<Jackpot> {
        let _guard = self.tier_locks[tier.index()].lock().unwrap();

        let mut row = self.jackpot(tier)?;
        if row.version != expected_version {
            return Err(CashdeskError::conflict("jackpot", tier.to_string()));
        }
        if new_current.is_sign_negative() || new_current > row.trigger_max {
            return Err(CashdeskError::validation(format!(
                "jackpot {} pool {} outside [0, {}]",
                tier, new_current, row.trigger_max
            )));
        }

        row.current = new_current;
        row.version += 1;
        row.updated_at = Utc::now();
        self.put(&row)?;
        Ok(row)
    }

    /// Claim a win: atomically reset the pool to its seed, stamp the last-win
    /// metadata and append the immutable win record. Conditioned on the
    /// version the trigger evaluation read, so racing winners cannot both
    /// drain one pool.
    pub fn record_win(&self, expected_version: u64, win: &JackpotWin) -> CashdeskResult<Jackpot> {
        let _guard = self.tier_locks[win.tier.index()].lock().unwrap();

        let mut row = self.jackpot(win.tier)?;
        if row.version != expected_version {
            return Err(CashdeskError::conflict("jackpot", win.tier.to_string()));
        }

        row.current = row.seed;
        row.version += 1;
        row.last_win = Some(LastWin {
            user_id: win.user_id.clone(),
            amount: win.amount,
            won_at: win.won_at,
        });
        row.updated_at = win.won_at;

        let row_bytes = serde_json::to_vec(&row).map_err(|e| {
            CashdeskError::Storage(StorageError::WriteFailed(format!(
                "Failed to encode jackpot {}: {}",
                row.tier, e
            )))
        })?;
        let win_bytes = serde_json::to_vec(win).map_err(|e| {
            CashdeskError::Storage(StorageError::WriteFailed(format!(
                "Failed to encode jackpot win {}: {}",
                win.id, e
            )))
        })?;

        let mut batch = WriteBatch::default();
        batch.put(jackpot_key(win.tier), row_bytes);
        batch.put(win_key(win.id), win_bytes);
        batch.put(
            win_index_key(win.won_at.timestamp_millis(), win.id),
            Vec::new(),
        );
        self.storage.write(batch)?;

        Ok(row)
    }

    /// Recent wins, newest first, with the same opaque hex cursor the ledger
    /// pagination uses.
    pub fn recent_wins(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> CashdeskResult<(Vec<JackpotWin>, Option<String>)> {
        let cursor_bytes = match cursor {
            Some(c) => Some(hex::decode(c).map_err(|e| {
                CashdeskError::Storage(StorageError::CorruptedData(format!(
                    "Invalid cursor hex: {}",
                    e
                )))
            })?),
            None => None,
        };

        let rows = self.storage.scan_prefix(
            WIN_INDEX_PREFIX,
            cursor_bytes.as_deref(),
            limit.max(1),
        );

        let mut wins = Vec::with_capacity(rows.len());
        let mut next_cursor = None;

        for (key, _value) in rows {
            if key.len() < WIN_INDEX_PREFIX.len() + 24 {
                continue;
            }
            let id_off = key.len() - 16;
            let Ok(win_id) = Uuid::from_slice(&key[id_off..]) else {
                continue;
            };
            next_cursor = Some(hex::encode(&key));

            let Some(bytes) = self.storage.get(&win_key(win_id))? else {
                continue;
            };
            let win = serde_json::from_slice(&bytes).map_err(|e| {
                CashdeskError::Storage(StorageError::CorruptedData(format!(
                    "Failed to decode jackpot win {}: {}",
                    win_id, e
                )))
            })?;
            wins.push(win);
        }

        Ok((wins, next_cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use rust_decimal_macros::dec;

    fn tier_config(tier: JackpotTier, seed: Decimal, min: Decimal, max: Decimal) -> JackpotTierConfig {
        JackpotTierConfig {
            tier,
            seed,
            contribution_percent: dec!(0.5),
            trigger_min: min,
            trigger_max: max,
            base_odds: 1000,
        }
    }

    fn test_store() -> (tempfile::TempDir, JackpotStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let store = JackpotStore::new(storage);
        store
            .init_tiers(&[tier_config(
                JackpotTier::Mini,
                dec!(10),
                dec!(20),
                dec!(100),
            )])
            .unwrap();
        (dir, store)
    }

    fn sample_win(tier: JackpotTier, amount: Decimal) -> JackpotWin {
        JackpotWin {
            id: Uuid::new_v4(),
            tier,
            user_id: "winner".to_string(),
            game_id: "slots-1".to_string(),
            round_id: Uuid::new_v4(),
            amount,
            currency: Currency::USD,
            won_at: Utc::now(),
        }
    }

    #[test]
    fn test_init_seeds_pool_and_is_idempotent() {
        let (_dir, store) = test_store();

        let row = store.jackpot(JackpotTier::Mini).unwrap();
        assert_eq!(row.current, dec!(10));
        assert_eq!(row.version, 1);

        store
            .init_tiers(&[tier_config(
                JackpotTier::Mini,
                dec!(10),
                dec!(20),
                dec!(100),
            )])
            .unwrap();
        let again = store.jackpot(JackpotTier::Mini).unwrap();
        assert_eq!(again.version, 1);
    }

    #[test]
    fn test_init_updates_tunables_preserving_pool() {
        let (_dir, store) = test_store();
        let row = store.jackpot(JackpotTier::Mini).unwrap();
        store
            .update_pool(JackpotTier::Mini, row.version, dec!(42))
            .unwrap();

        store
            .init_tiers(&[tier_config(
                JackpotTier::Mini,
                dec!(10),
                dec!(25),
                dec!(100),
            )])
            .unwrap();

        let updated = store.jackpot(JackpotTier::Mini).unwrap();
        assert_eq!(updated.current, dec!(42));
        assert_eq!(updated.trigger_min, dec!(25));
    }

    #[test]
    fn test_update_pool_checks_version() {
        let (_dir, store) = test_store();
        let row = store.jackpot(JackpotTier::Mini).unwrap();

        store
            .update_pool(JackpotTier::Mini, row.version, dec!(50))
            .unwrap();
        let err = store
            .update_pool(JackpotTier::Mini, row.version, dec!(60))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_update_pool_rejects_above_ceiling() {
        let (_dir, store) = test_store();
        let row = store.jackpot(JackpotTier::Mini).unwrap();

        let err = store
            .update_pool(JackpotTier::Mini, row.version, dec!(100.01))
            .unwrap_err();
        assert!(matches!(err, CashdeskError::Validation(_)));
    }

    #[test]
    fn test_record_win_resets_to_seed_and_lists_win() {
        let (_dir, store) = test_store();
        let row = store.jackpot(JackpotTier::Mini).unwrap();
        store
            .update_pool(JackpotTier::Mini, row.version, dec!(100))
            .unwrap();

        let row = store.jackpot(JackpotTier::Mini).unwrap();
        let win = sample_win(JackpotTier::Mini, row.current);
        let after = store.record_win(row.version, &win).unwrap();

        assert_eq!(after.current, dec!(10));
        assert_eq!(after.last_win.as_ref().unwrap().amount, dec!(100));

        let (wins, _) = store.recent_wins(None, 10).unwrap();
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].id, win.id);
    }

    #[test]
    fn test_record_win_conflict_on_stale_version() {
        let (_dir, store) = test_store();
        let row = store.jackpot(JackpotTier::Mini).unwrap();
        store
            .update_pool(JackpotTier::Mini, row.version, dec!(90))
            .unwrap();

        let win = sample_win(JackpotTier::Mini, dec!(90));
        let err = store.record_win(row.version, &win).unwrap_err();
        assert!(err.is_conflict());
    }
}

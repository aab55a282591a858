//! Resolution of external identifiers to internal entities: the game
//! catalog and the durable member-account mapping.

use crate::errors::{CashdeskError, CashdeskResult};
use crate::storage::Storage;
use rocksdb::WriteBatch;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const ACCOUNT_BY_USER_PREFIX: &str = "extacct:by_user:";
const USER_BY_ACCOUNT_PREFIX: &str = "extacct:by_account:";

/// One playable game known to the operator and the aggregator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Game {
    /// Internal identifier, referenced by sessions and rounds.
    pub id: String,
    /// The aggregator's identifier for the same game.
    pub game_uid: String,
    pub name: String,
}

/// Read-only game registry, loaded from configuration at startup.
#[derive(Clone, Default)]
pub struct GameCatalog {
    by_uid: HashMap<String, Game>,
    by_id: HashMap<String, Game>,
}

impl GameCatalog {
    pub fn new(games: &[Game]) -> Self {
        let mut catalog = GameCatalog::default();
        for game in games {
            catalog.by_uid.insert(game.game_uid.clone(), game.clone());
            catalog.by_id.insert(game.id.clone(), game.clone());
        }
        catalog
    }

    pub fn by_uid(&self, game_uid: &str) -> Option<&Game> {
        self.by_uid.get(game_uid)
    }

    pub fn by_id(&self, game_id: &str) -> Option<&Game> {
        self.by_id.get(game_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Durable, no-expiry bidirectional mapping between internal user ids and
/// the pseudonymous member accounts the aggregator knows them by.
///
/// A mapping is written once, on first launch, and reused forever after;
/// regenerating it would orphan the provider's existing player record.
#[derive(Clone)]
pub struct IdentityStore {
    storage: Storage,
    create_lock: Arc<Mutex<()>>,
}

impl IdentityStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn member_account_for(&self, user_id: &str) -> CashdeskResult<Option<String>> {
        let bytes = self
            .storage
            .get(format!("{}{}", ACCOUNT_BY_USER_PREFIX, user_id).as_bytes())?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub fn user_for_member_account(&self, member_account: &str) -> CashdeskResult<Option<String>> {
        let bytes = self
            .storage
            .get(format!("{}{}", USER_BY_ACCOUNT_PREFIX, member_account).as_bytes())?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Return the stored member account for `user_id`, creating it from
    /// `derive` on first use. The stored value always wins over a fresh
    /// derivation.
    pub fn get_or_create<F>(&self, user_id: &str, derive: F) -> CashdeskResult<String>
    where
        F: FnOnce() -> String,
    {
        if let Some(existing) = self.member_account_for(user_id)? {
            return Ok(existing);
        }

        let _guard = self.create_lock.lock().unwrap();
        if let Some(existing) = self.member_account_for(user_id)? {
            return Ok(existing);
        }

        let account = derive();
        if let Some(other) = self.user_for_member_account(&account)? {
            if other != user_id {
                return Err(CashdeskError::conflict("member_account", account));
            }
        }

        let mut batch = WriteBatch::default();
        batch.put(
            format!("{}{}", ACCOUNT_BY_USER_PREFIX, user_id).as_bytes(),
            account.as_bytes(),
        );
        batch.put(
            format!("{}{}", USER_BY_ACCOUNT_PREFIX, account).as_bytes(),
            user_id.as_bytes(),
        );
        self.storage.write(batch)?;

        tracing::info!(user_id, member_account = %account, "Created member-account mapping");
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> GameCatalog {
        GameCatalog::new(&[
            Game {
                id: "slots-1".to_string(),
                game_uid: "prov-8821".to_string(),
                name: "Golden Reels".to_string(),
            },
            Game {
                id: "crash-1".to_string(),
                game_uid: "prov-9040".to_string(),
                name: "Rocket Crash".to_string(),
            },
        ])
    }

    #[test]
    fn test_catalog_resolves_both_directions() {
        let catalog = catalog();
        assert_eq!(catalog.by_uid("prov-8821").unwrap().id, "slots-1");
        assert_eq!(catalog.by_id("crash-1").unwrap().game_uid, "prov-9040");
        assert!(catalog.by_uid("prov-0000").is_none());
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_identity_mapping_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let store = IdentityStore::new(storage);

        let first = store.get_or_create("user-1", || "acct-aaa".to_string()).unwrap();
        assert_eq!(first, "acct-aaa");

        // A later derivation (even a different one) must not replace the
        // stored mapping.
        let second = store.get_or_create("user-1", || "acct-bbb".to_string()).unwrap();
        assert_eq!(second, "acct-aaa");

        assert_eq!(
            store.user_for_member_account("acct-aaa").unwrap().unwrap(),
            "user-1"
        );
        assert!(store.user_for_member_account("acct-bbb").unwrap().is_none());
    }

    #[test]
    fn test_identity_mapping_rejects_account_collision() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let store = IdentityStore::new(storage);

        store.get_or_create("user-1", || "acct-x".to_string()).unwrap();
        let err = store
            .get_or_create("user-2", || "acct-x".to_string())
            .unwrap_err();
        assert!(err.is_conflict());
    }
}

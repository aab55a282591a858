//! Cashdesk - Casino Settlement Backend
//!
//! Multi-currency wallet ledger with atomic round settlement, a progressive
//! jackpot engine, and an encrypted idempotent gateway for game-provider
//! aggregator callbacks. Everything persists in a single RocksDB instance;
//! concurrency control is optimistic versioning under a short commit lock.

pub mod api;
pub mod config;
pub mod currency;
pub mod directory;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod idempotency;
pub mod jackpot;
pub mod ledger_store;
pub mod settlement;
pub mod storage;

pub use config::CashdeskConfig;
pub use currency::Currency;
pub use errors::{CashdeskError, CashdeskResult};
pub use ledger_store::LedgerStore;
pub use settlement::SettlementCoordinator;
pub use storage::Storage;

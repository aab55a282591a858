//! Cashdesk server entrypoint.
//!
//! Loads configuration, opens storage, wires the settlement stack together
//! and serves the HTTP surface until shutdown.

use cashdesk::api::handlers::AppState;
use cashdesk::api::monitoring::MetricsRegistry;
use cashdesk::api::ApiServer;
use cashdesk::config::CashdeskConfig;
use cashdesk::directory::{GameCatalog, IdentityStore};
use cashdesk::events::EventBus;
use cashdesk::gateway::{Gateway, LaunchClient, PayloadCipher};
use cashdesk::idempotency::IdempotencyStore;
use cashdesk::jackpot::{JackpotEngine, JackpotStore, JackpotTuning};
use cashdesk::ledger_store::LedgerStore;
use cashdesk::settlement::SettlementCoordinator;
use cashdesk::storage::Storage;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cashdesk", about = "Casino settlement backend", version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the database path
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cashdesk=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!(%path, "Loading configuration file");
            CashdeskConfig::from_toml_file(path)?
        }
        None => {
            info!("No configuration file given, using development defaults");
            CashdeskConfig::development()
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.database.path = db_path;
    }
    config.validate()?;

    info!("🎰 Starting Cashdesk");
    info!("   Database: {}", config.database.path);
    info!("   Games: {}", config.games.len());

    let storage = Storage::open(&config.database.path)?;
    let ledger = LedgerStore::new(storage.clone());

    let jackpot_store = JackpotStore::new(storage.clone());
    jackpot_store.init_tiers(&config.jackpots.tiers)?;
    let tuning = JackpotTuning {
        min_eligible_bet_usd: config.jackpots.min_eligible_bet_usd,
        odds_exponent: config.jackpots.odds_exponent,
        bet_bonus_cap: config.jackpots.bet_bonus_cap,
        bet_bonus_reference_usd: config.jackpots.bet_bonus_reference_usd,
        max_update_retries: config.jackpots.max_update_retries,
    };
    let engine = Arc::new(JackpotEngine::new(
        jackpot_store.clone(),
        ledger.clone(),
        tuning,
    ));

    let events = EventBus::new(config.events.buffer);
    events.start_logging_drain();

    let metrics = Arc::new(MetricsRegistry::new());
    let coordinator = Arc::new(SettlementCoordinator::new(
        ledger.clone(),
        engine,
        events,
        metrics.clone(),
        config.settlement.clone(),
    ));

    let idempotency = IdempotencyStore::new(config.idempotency_ttl());
    idempotency.start_cleanup_task(config.idempotency_cleanup_interval());

    let identity = IdentityStore::new(storage.clone());
    let catalog = GameCatalog::new(&config.games);
    let cipher = PayloadCipher::new(&config.aggregator.aes_key)?;

    let gateway = Arc::new(Gateway::new(
        cipher.clone(),
        idempotency,
        identity.clone(),
        catalog.clone(),
        coordinator.clone(),
        metrics.clone(),
        config.aggregator.agency_uid.clone(),
    ));
    let launch = Arc::new(LaunchClient::new(
        cipher,
        identity,
        config.aggregator.clone(),
    )?);

    let state = Arc::new(AppState {
        storage,
        ledger,
        jackpots: jackpot_store,
        catalog,
        coordinator,
        gateway,
        launch,
        metrics,
        api_key: config.server.api_key.clone(),
    });

    ApiServer::new(config.server.clone(), state).run().await
}

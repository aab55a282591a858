use cashdesk::config::CashdeskConfig;
use cashdesk::currency::Currency;
use cashdesk::jackpot::JackpotStore;
use cashdesk::ledger_store::LedgerStore;
use cashdesk::storage::Storage;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data/cashdesk".to_string());

    println!("Opening database: {}", db_path);
    let storage = Storage::open(&db_path)?;
    let ledger = LedgerStore::new(storage.clone());

    let config = CashdeskConfig::development();

    println!("Seeding jackpot tiers...");
    JackpotStore::new(storage).init_tiers(&config.jackpots.tiers)?;

    let demo_wallets = [
        ("demo-user-1", Decimal::new(100_000, 2)), // 1000.00
        ("demo-user-2", Decimal::new(50_000, 2)),  // 500.00
        ("demo-user-3", Decimal::new(2_500, 2)),   // 25.00
    ];

    for (user_id, usd) in demo_wallets {
        if ledger.wallet_exists(user_id) {
            println!("  {} already exists, skipping", user_id);
            continue;
        }
        let mut balances = BTreeMap::new();
        balances.insert(Currency::USD, usd);
        balances.insert(Currency::EUR, Decimal::new(10_000, 2));
        let wallet = ledger.create_wallet(user_id, balances)?;
        println!(
            "  Created {} with {} USD",
            wallet.user_id,
            wallet.balance(Currency::USD)
        );
    }

    println!("✅ Demo data seeded");
    Ok(())
}

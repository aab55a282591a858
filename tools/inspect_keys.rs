use cashdesk::storage::Storage;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data/cashdesk".to_string());
    let prefix = std::env::args().nth(2).unwrap_or_default();
    let limit: usize = std::env::args()
        .nth(3)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);

    println!("Opening database: {}", db_path);
    let storage = Storage::open(&db_path)?;
    println!("Estimated keys: {}", storage.estimated_keys());

    let rows = storage.scan_prefix(prefix.as_bytes(), None, limit);
    println!("Keys under prefix {:?} (max {}):", prefix, limit);
    for (key, value) in &rows {
        let key_str = String::from_utf8_lossy(key);
        // Index keys carry binary timestamps; only rows decode as JSON.
        match serde_json::from_slice::<serde_json::Value>(value) {
            Ok(json) => println!("  {} => {}", key_str, json),
            Err(_) => println!("  {} => <{} bytes>", key_str, value.len()),
        }
    }
    println!("{} keys listed", rows.len());

    Ok(())
}

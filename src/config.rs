//! Configuration management with validation and defaults.
//!
//! Loaded from a TOML file at startup, overridable by CLI flags. Each
//! subsystem gets its own nested struct with a `Default` impl; `validate()`
//! catches logically inconsistent values before anything opens the database.

use crate::currency::Currency;
use crate::directory::Game;
use crate::jackpot::types::JackpotTier;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level service configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CashdeskConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub settlement: SettlementConfig,
    pub jackpots: JackpotsConfig,
    pub aggregator: AggregatorConfig,
    pub idempotency: IdempotencyConfig,
    pub events: EventsConfig,
    /// Game catalog: the internal id ↔ provider game_uid mapping.
    pub games: Vec<Game>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Static key required on mutating internal routes when set.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            api_key: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data/cashdesk".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Bounded internal retries for optimistic-lock conflicts.
    pub max_conflict_retries: u32,
    /// A win qualifies as a big win at this multiplier over the bet...
    pub big_win_multiplier: Decimal,
    /// ...and at least this USD amount.
    pub big_win_min_usd: Decimal,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            big_win_multiplier: Decimal::from(10),
            big_win_min_usd: Decimal::from(50),
        }
    }
}

/// One jackpot tier's durable tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JackpotTierConfig {
    pub tier: JackpotTier,
    /// Reset floor after a win; also the initial pool.
    pub seed: Decimal,
    /// Percent of each contributing bet skimmed into the pool.
    pub contribution_percent: Decimal,
    /// Pool must reach this before the tier becomes triggerable.
    pub trigger_min: Decimal,
    /// Forced-win ceiling.
    pub trigger_max: Decimal,
    /// One win in `base_odds` eligible bets at zero progress.
    pub base_odds: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JackpotsConfig {
    /// Bets below this USD amount skip the trigger check.
    pub min_eligible_bet_usd: Decimal,
    /// Exponent on `(1 - progress)` in the effective-odds curve.
    pub odds_exponent: f64,
    /// Ceiling on the bet-size odds bonus factor.
    pub bet_bonus_cap: f64,
    /// Bet size (USD) at which the bonus factor saturates.
    pub bet_bonus_reference_usd: f64,
    /// Bounded retries for pool CAS updates and the payout credit.
    pub max_update_retries: u32,
    pub tiers: Vec<JackpotTierConfig>,
}

impl Default for JackpotsConfig {
    fn default() -> Self {
        Self {
            min_eligible_bet_usd: Decimal::new(10, 2), // 0.10
            odds_exponent: 3.0,
            bet_bonus_cap: 2.0,
            bet_bonus_reference_usd: 100.0,
            max_update_retries: 5,
            tiers: vec![
                tier_default(JackpotTier::Mini, 10, 100, 500, 5_000),
                tier_default(JackpotTier::Minor, 100, 1_000, 5_000, 50_000),
                tier_default(JackpotTier::Major, 1_000, 10_000, 50_000, 500_000),
                tier_default(JackpotTier::Grand, 10_000, 100_000, 500_000, 5_000_000),
            ],
        }
    }
}

fn tier_default(tier: JackpotTier, seed: i64, min: i64, max: i64, odds: u64) -> JackpotTierConfig {
    JackpotTierConfig {
        tier,
        seed: Decimal::from(seed),
        contribution_percent: Decimal::new(5, 1), // 0.5%
        trigger_min: Decimal::from(min),
        trigger_max: Decimal::from(max),
        base_odds: odds,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Agency identifier every inbound callback must declare.
    pub agency_uid: String,
    /// Pre-shared 32-byte UTF-8 AES key.
    pub aes_key: String,
    /// Base URL of the provider's API for outbound calls.
    pub base_url: String,
    /// Path of the game-launch endpoint, appended to `base_url`.
    pub launch_path: String,
    /// Callback URL handed to the provider at launch.
    pub callback_url: String,
    /// Salt for the deterministic member-account pseudonym.
    pub member_salt: String,
    /// Outbound request timeout.
    pub request_timeout_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            agency_uid: "agency-dev".to_string(),
            aes_key: "0123456789abcdef0123456789abcdef".to_string(),
            base_url: "https://aggregator.example.com".to_string(),
            launch_path: "/api/v1/game/launch".to_string(),
            callback_url: "http://localhost:8080/callback/aggregator".to_string(),
            member_salt: "cashdesk-dev-salt".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long a cached callback response stays replayable.
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity; lagging receivers skip, never block.
    pub buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer: 1024 }
    }
}

impl Default for CashdeskConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            settlement: SettlementConfig::default(),
            jackpots: JackpotsConfig::default(),
            aggregator: AggregatorConfig::default(),
            idempotency: IdempotencyConfig::default(),
            events: EventsConfig::default(),
            games: Vec::new(),
        }
    }
}

impl CashdeskConfig {
    /// Local-development preset: demo catalog, permissive CORS.
    pub fn development() -> Self {
        Self {
            games: vec![
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
            ],
            ..Default::default()
        }
    }

    /// Production preset: CORS locked down, key required, slower sweep.
    pub fn production() -> Self {
        Self {
            server: ServerConfig {
                allowed_origins: Vec::new(),
                ..Default::default()
            },
            idempotency: IdempotencyConfig {
                cleanup_interval_secs: 300,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::Io(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let config: CashdeskConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check logical consistency before anything opens the database.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue("server.port must be > 0".to_string()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "server.request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.aggregator.aes_key.as_bytes().len() != 32 {
            return Err(ConfigError::InvalidValue(format!(
                "aggregator.aes_key must be exactly 32 bytes, got {}",
                self.aggregator.aes_key.as_bytes().len()
            )));
        }
        if self.jackpots.min_eligible_bet_usd.is_sign_negative() {
            return Err(ConfigError::InvalidValue(
                "jackpots.min_eligible_bet_usd must not be negative".to_string(),
            ));
        }
        if self.jackpots.odds_exponent <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "jackpots.odds_exponent must be > 0".to_string(),
            ));
        }
        if self.jackpots.bet_bonus_cap < 1.0 {
            return Err(ConfigError::InvalidValue(
                "jackpots.bet_bonus_cap must be >= 1".to_string(),
            ));
        }
        for (i, tier) in self.jackpots.tiers.iter().enumerate() {
            if self.jackpots.tiers[..i].iter().any(|t| t.tier == tier.tier) {
                return Err(ConfigError::LogicalInconsistency(format!(
                    "jackpot tier {} configured twice",
                    tier.tier
                )));
            }
            if tier.seed.is_sign_negative() {
                return Err(ConfigError::InvalidValue(format!(
                    "jackpot {} seed must not be negative",
                    tier.tier
                )));
            }
            if tier.trigger_max <= tier.trigger_min {
                return Err(ConfigError::LogicalInconsistency(format!(
                    "jackpot {} trigger_max must exceed trigger_min",
                    tier.tier
                )));
            }
            if tier.seed > tier.trigger_max {
                return Err(ConfigError::LogicalInconsistency(format!(
                    "jackpot {} seed must not exceed trigger_max",
                    tier.tier
                )));
            }
            if tier.base_odds == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "jackpot {} base_odds must be >= 1",
                    tier.tier
                )));
            }
            if tier.contribution_percent.is_sign_negative()
                || tier.contribution_percent > Decimal::ONE_HUNDRED
            {
                return Err(ConfigError::InvalidValue(format!(
                    "jackpot {} contribution_percent must be within [0, 100]",
                    tier.tier
                )));
            }
        }
        for (i, game) in self.games.iter().enumerate() {
            if self.games[..i].iter().any(|g| g.game_uid == game.game_uid) {
                return Err(ConfigError::LogicalInconsistency(format!(
                    "game_uid {} configured twice",
                    game.game_uid
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency.ttl_secs)
    }

    pub fn idempotency_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.idempotency.cleanup_interval_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregator.request_timeout_secs)
    }
}

/// Configuration loading/validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(String),
    #[error("Failed to parse config file: {0}")]
    Parse(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Configuration logical inconsistency: {0}")]
    LogicalInconsistency(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CashdeskConfig::default().validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(CashdeskConfig::development().validate().is_ok());
        assert!(CashdeskConfig::production().validate().is_ok());
    }

    #[test]
    fn test_short_aes_key_is_rejected() {
        let mut config = CashdeskConfig::default();
        config.aggregator.aes_key = "too-short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_trigger_bounds_are_rejected() {
        let mut config = CashdeskConfig::default();
        config.jackpots.tiers[0].trigger_min = dec!(500);
        config.jackpots.tiers[0].trigger_max = dec!(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_tier_is_rejected() {
        let mut config = CashdeskConfig::default();
        let dup = config.jackpots.tiers[0].clone();
        config.jackpots.tiers.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = CashdeskConfig::development();
        let raw = toml::to_string(&config).unwrap();
        let back: CashdeskConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.server.port, config.server.port);
        assert_eq!(back.games.len(), 2);
        assert_eq!(back.jackpots.tiers.len(), 4);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [server]
            port = 9090

            [aggregator]
            agency_uid = "agency-prod"
            aes_key = "ffffffffffffffffffffffffffffffff"
        "#;
        let config: CashdeskConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.aggregator.agency_uid, "agency-prod");
        assert_eq!(config.idempotency.ttl_secs, 24 * 60 * 60);
        assert!(config.validate().is_ok());
    }
}

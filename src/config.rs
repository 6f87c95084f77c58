//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the operator token) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub game: GameConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

/// Round timing and bet limits.
#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    /// Game name; at most one round per game is open at a time.
    #[serde(default = "default_game_name")]
    pub name: String,
    pub round_duration_secs: u64,
    /// Betting closes this many seconds before the round ends.
    pub closing_margin_secs: u64,
    pub min_bet: Decimal,
    pub max_bet: Decimal,
    /// Period of the round-creation tick, aligned to multiples of itself.
    pub creation_tick_secs: u64,
    /// Period of the status/expiry tick.
    pub status_tick_millis: u64,
}

fn default_game_name() -> String {
    "wingo".to_string()
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            name: default_game_name(),
            round_duration_secs: 60,
            closing_margin_secs: 5,
            min_bet: dec!(10),
            max_bet: dec!(10000),
            creation_tick_secs: 60,
            status_tick_millis: 1000,
        }
    }
}

impl GameConfig {
    pub fn round_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.round_duration_secs as i64)
    }

    pub fn closing_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.closing_margin_secs as i64)
    }

    pub fn creation_period(&self) -> Duration {
        Duration::from_secs(self.creation_tick_secs)
    }

    pub fn status_period(&self) -> Duration {
        Duration::from_millis(self.status_tick_millis)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://wingo.db`.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    /// Name of the env var holding the operator bearer token.
    pub operator_token_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the round lifecycle incoherent.
    pub fn validate(&self) -> Result<()> {
        let game = &self.game;
        if game.round_duration_secs == 0 {
            bail!("game.round_duration_secs must be positive");
        }
        if game.closing_margin_secs >= game.round_duration_secs {
            bail!(
                "game.closing_margin_secs ({}) must be shorter than the round ({})",
                game.closing_margin_secs,
                game.round_duration_secs
            );
        }
        if game.min_bet <= Decimal::ZERO {
            bail!("game.min_bet must be positive");
        }
        if game.min_bet > game.max_bet {
            bail!("game.min_bet ({}) exceeds game.max_bet ({})", game.min_bet, game.max_bet);
        }
        if game.creation_tick_secs == 0 || game.status_tick_millis == 0 {
            bail!("tick periods must be positive");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

//! Persistence layer.
//!
//! Rounds, outcomes, wagers, balances and the ledger live in SQLite behind
//! an `sqlx` pool. The invariants that must survive concurrent writers are
//! enforced by the schema itself (see `migrations/`):
//!
//! - one non-closed round per game (partial unique index),
//! - one wager per (user, round, category, option) (unique constraint),
//! - one outcome per round (primary key),
//! - non-negative balances and an append-only ledger.
//!
//! Every write transaction opens with a write statement so SQLite grants
//! the write lock up front instead of failing a read→write upgrade later.

pub mod ledger;
pub mod rounds;
pub mod wagers;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::types::GameError;

/// Amounts are persisted as integer thousandths of a unit, which keeps a
/// 4.5x payout on any two-decimal stake exact.
pub const UNITS_PER_WHOLE: i64 = 1000;

/// Decimal places representable in storage.
const STORAGE_SCALE: u32 = 3;

/// Handle to the game database. Cheap to clone; all clones share one pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    game: String,
}

impl Store {
    /// Open (creating if needed) the database and apply migrations.
    pub async fn connect(cfg: &DatabaseConfig, game: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&cfg.url)
            .with_context(|| format!("Invalid database url: {}", cfg.url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(cfg.busy_timeout_secs))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", cfg.url))?;

        let store = Self::from_pool(pool, game).await?;
        info!(url = %cfg.url, game, "Database ready");
        Ok(store)
    }

    /// Wrap an existing pool, applying migrations.
    pub async fn from_pool(pool: SqlitePool, game: &str) -> Result<Self> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .context("Failed to apply database migrations")?;
        Ok(Self {
            pool,
            game: game.to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Game this store schedules rounds for.
    pub fn game(&self) -> &str {
        &self.game
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Column conversions
// ---------------------------------------------------------------------------

/// Convert a decimal amount to storage units. Fails if the amount carries
/// more precision than storage can hold.
pub(crate) fn to_units(amount: Decimal) -> Result<i64, GameError> {
    if amount.normalize().scale() > STORAGE_SCALE {
        return Err(GameError::InvalidInput(format!(
            "amount {amount} has more than {STORAGE_SCALE} decimal places"
        )));
    }
    amount
        .checked_mul(Decimal::from(UNITS_PER_WHOLE))
        .and_then(|units| units.trunc().to_i64())
        .ok_or_else(|| GameError::InvalidInput(format!("amount {amount} is out of range")))
}

pub(crate) fn from_units(units: i64) -> Decimal {
    Decimal::new(units, STORAGE_SCALE).normalize()
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Fresh database file in the temp dir, one per test.
#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    let mut path = std::env::temp_dir();
    path.push(format!("wingo_test_{}.db", uuid::Uuid::new_v4()));
    let cfg = DatabaseConfig {
        url: format!("sqlite://{}", path.to_string_lossy()),
        max_connections: 4,
        busy_timeout_secs: 5,
    };
    Store::connect(&cfg, "wingo").await.unwrap()
}

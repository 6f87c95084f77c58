//! Shared setup: a fresh database file, a manual clock, and the engine
//! components wired the way `main` wires them.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use wingo::clock::ManualClock;
use wingo::config::{DatabaseConfig, GameConfig};
use wingo::engine::{BetIntake, Scheduler};
use wingo::storage::Store;

pub struct Harness {
    pub store: Store,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<Scheduler>,
    pub intake: Arc<BetIntake>,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

pub fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

pub async fn store() -> Store {
    let mut path = std::env::temp_dir();
    path.push(format!("wingo_it_{}.db", uuid::Uuid::new_v4()));
    let cfg = DatabaseConfig {
        url: format!("sqlite://{}", path.to_string_lossy()),
        max_connections: 8,
        busy_timeout_secs: 10,
    };
    Store::connect(&cfg, "wingo").await.unwrap()
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(store().await).await
    }

    pub async fn with_store(store: Store) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let game = GameConfig::default();
        let scheduler = Arc::new(Scheduler::new(store.clone(), clock.clone(), game.clone()));
        let intake = Arc::new(BetIntake::new(store.clone(), clock.clone(), &game));
        Self {
            store,
            clock,
            scheduler,
            intake,
        }
    }

    /// Give each user a funded wallet.
    pub async fn fund(&self, users: impl IntoIterator<Item = i64>, amount: Decimal) {
        for user in users {
            self.store.deposit(user, amount, Some("it-seed")).await.unwrap();
        }
    }
}

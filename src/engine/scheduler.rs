//! Round scheduler.
//!
//! Two periodic actions drive the game:
//!
//! - the **creation tick** opens a round whenever none is open,
//! - the **status tick** closes betting once the round is inside its
//!   closing margin, then draws, settles and closes every expired round,
//!   oldest first, and opens the next round straight away.
//!
//! Both ticks are plain async methods driven by an injected [`Clock`], so
//! tests step through a round without waiting on wall-clock time.
//! [`Scheduler::spawn`] runs them on tokio timers for production.
//!
//! Operator overrides settle through the same path as natural expiry. The
//! forced value is recorded before settling, so a failed settlement is
//! finished by a later status tick with that value.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::GameConfig;
use crate::engine::outcome;
use crate::engine::settlement::SettlementEngine;
use crate::storage::Store;
use crate::types::{GameError, GameStatus, Outcome, Round, RoundStatus, SettlementReport};

pub struct Scheduler {
    store: Store,
    settlement: SettlementEngine,
    clock: Arc<dyn Clock>,
    game: GameConfig,
}

impl Scheduler {
    pub fn new(store: Store, clock: Arc<dyn Clock>, game: GameConfig) -> Self {
        let settlement = SettlementEngine::new(store.clone(), clock.clone());
        Self {
            store,
            settlement,
            clock,
            game,
        }
    }

    // -----------------------------------------------------------------------
    // Ticks
    // -----------------------------------------------------------------------

    /// Open a round if none is open. Returns the round if this call created it.
    pub async fn creation_tick(&self) -> Result<Option<Round>, GameError> {
        if self.store.find_open_round().await?.is_some() {
            return Ok(None);
        }
        let (round, created) = self
            .store
            .open_new_round(self.clock.now(), self.game.round_duration())
            .await?;
        Ok(created.then_some(round))
    }

    /// Close betting near the end of the open round and finish expired rounds.
    ///
    /// Stops at the first round that fails to settle; it stays open and is
    /// retried on the next tick.
    pub async fn status_tick(&self) -> Result<Vec<SettlementReport>, GameError> {
        let now = self.clock.now();

        if let Some(round) = self.store.find_open_round().await? {
            if round.status == RoundStatus::Active
                && !round.is_expired(now)
                && round.time_remaining(now) <= self.game.closing_margin()
            {
                self.store.close_betting(&round.round_id, now).await?;
            }
        }

        let mut reports = Vec::new();
        for round in self.store.find_expired(now).await? {
            // A recorded override takes precedence over this draw.
            let drawn = outcome::generate(None)?;
            reports.push(self.finish_round(&round, drawn).await?);
        }

        // Rounds run back to back; the creation tick only covers startup
        // and gaps left by overrides.
        if !reports.is_empty() {
            if let Err(e) = self.creation_tick().await {
                warn!(error = %e, code = e.code(), "Next round not opened, creation tick will retry");
            }
        }
        Ok(reports)
    }

    // -----------------------------------------------------------------------
    // Operator override
    // -----------------------------------------------------------------------

    /// Force the outcome of an active round (the open one if `round_id` is
    /// `None`) and settle it immediately.
    pub async fn force_outcome(
        &self,
        round_id: Option<&str>,
        value: i64,
    ) -> Result<SettlementReport, GameError> {
        let forced = outcome::generate(Some(value))?;

        let round = match round_id {
            Some(id) => self
                .store
                .find_round(id)
                .await?
                .ok_or_else(|| GameError::RoundNotFound(id.to_string()))?,
            None => self.store.find_open_round().await?.ok_or(GameError::NoOpenRound)?,
        };
        if round.status != RoundStatus::Active {
            return Err(GameError::RoundNotActive {
                round_id: round.round_id,
                status: round.status,
            });
        }

        // Claim the round. Losing here means a tick closed betting first.
        if !self.store.close_betting(&round.round_id, self.clock.now()).await? {
            return Err(self.not_active(round.round_id).await);
        }

        // Expiry may have drawn for this round between the claim and here.
        let recorded = self
            .store
            .record_outcome(&round.round_id, &forced, self.clock.now())
            .await?;
        if recorded != forced {
            warn!(
                round_id = %round.round_id,
                value,
                recorded = recorded.value,
                "Override lost to natural expiry"
            );
            return Err(self.not_active(round.round_id).await);
        }

        warn!(round_id = %round.round_id, value, "Operator override accepted");
        self.finish_round(&round, forced).await
    }

    async fn not_active(&self, round_id: String) -> GameError {
        let status = match self.store.find_round(&round_id).await {
            Ok(Some(round)) => round.status,
            _ => RoundStatus::Closed,
        };
        GameError::RoundNotActive { round_id, status }
    }

    /// Settle `round` with `drawn` (or the outcome already on record) and
    /// close it.
    async fn finish_round(&self, round: &Round, drawn: Outcome) -> Result<SettlementReport, GameError> {
        let now = self.clock.now();
        self.store.close_betting(&round.round_id, now).await?;
        let report = self.settlement.settle_round(round, drawn).await?;
        self.store.close_round(&round.round_id, self.clock.now()).await?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Status of the open round, read from the store at call time.
    pub async fn current_status(&self) -> Result<Option<GameStatus>, GameError> {
        let now = self.clock.now();
        Ok(self.store.find_open_round().await?.map(|round| GameStatus {
            time_remaining_ms: round.time_remaining(now).num_milliseconds(),
            end_time: round.end_time,
            status: round.status,
            round_id: round.round_id,
        }))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn game(&self) -> &GameConfig {
        &self.game
    }

    // -----------------------------------------------------------------------
    // Background loops
    // -----------------------------------------------------------------------

    /// Run the creation and status loops until `shutdown` flips to true (or
    /// its sender is dropped).
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let creation = {
            let scheduler = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.creation_loop(shutdown).await })
        };
        let status = tokio::spawn(async move { self.status_loop(shutdown).await });
        vec![creation, status]
    }

    async fn creation_loop(&self, mut shutdown: watch::Receiver<bool>) {
        info!(period_secs = self.game.creation_tick_secs, "Creation loop started");
        loop {
            if let Err(e) = self.creation_tick().await {
                error!(error = %e, code = e.code(), "Creation tick failed, continuing");
            }

            let wait = until_next_boundary(self.clock.now(), self.game.creation_period());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Creation loop stopped");
    }

    async fn status_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.game.status_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = self.game.status_tick_millis, "Status loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.status_tick().await {
                        error!(error = %e, code = e.code(), "Status tick failed, continuing");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Status loop stopped");
    }
}

/// Time from `now` to the next multiple of `period` since the epoch.
fn until_next_boundary(now: chrono::DateTime<chrono::Utc>, period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1) as i64;
    let into = now.timestamp_millis().rem_euclid(period_ms);
    Duration::from_millis((period_ms - into) as u64)
}

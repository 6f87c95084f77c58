//! Round Store: round records, status transitions and recorded outcomes.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::{from_millis, to_millis, Store};
use crate::types::{Color, GameError, Outcome, Page, Round, RoundResult, Size};

const ROUND_COLUMNS: &str = "round_id, start_time, end_time, status";

#[derive(Debug, sqlx::FromRow)]
struct RoundRow {
    round_id: String,
    start_time: i64,
    end_time: i64,
    status: String,
}

impl TryFrom<RoundRow> for Round {
    type Error = GameError;

    fn try_from(row: RoundRow) -> Result<Self, Self::Error> {
        Ok(Round {
            round_id: row.round_id,
            start_time: from_millis(row.start_time),
            end_time: from_millis(row.end_time),
            status: row.status.parse()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutcomeRow {
    value: i64,
    color: String,
    size: String,
    forced: bool,
}

impl TryFrom<OutcomeRow> for Outcome {
    type Error = GameError;

    fn try_from(row: OutcomeRow) -> Result<Self, Self::Error> {
        let outcome = Outcome::from_value(row.value, row.forced)?;
        // Colour and size are stored for reporting; the value is authoritative.
        let stored_color: Color = row.color.parse()?;
        let stored_size: Size = row.size.parse()?;
        if stored_color != outcome.color || stored_size != outcome.size {
            return Err(GameError::Storage(format!(
                "outcome attributes {stored_color}/{stored_size} do not match value {}",
                outcome.value
            )));
        }
        Ok(outcome)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    round_id: String,
    start_time: i64,
    end_time: i64,
    value: i64,
    color: String,
    size: String,
    forced: bool,
    generated_at: i64,
}

impl Store {
    /// Open a new active round starting at `start`, unless one is already
    /// open. Returns the open round and whether this call created it.
    ///
    /// Concurrent callers race on the partial unique index; losers fall
    /// through to reading the winner's row.
    pub async fn open_new_round(
        &self,
        start: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> Result<(Round, bool), GameError> {
        let start_ms = to_millis(start);
        let end_ms = to_millis(start + duration);
        let round_id = format!("{}_{}", self.game.to_uppercase(), start_ms);

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO rounds
                 (round_id, game, start_time, end_time, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?3, ?3)",
        )
        .bind(&round_id)
        .bind(&self.game)
        .bind(start_ms)
        .bind(end_ms)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let open = self.open_round_in(&mut tx).await?;
        tx.commit().await?;

        match open {
            Some(round) => {
                if inserted {
                    info!(round_id = %round.round_id, end = %round.end_time, "Round opened");
                } else {
                    debug!(round_id = %round.round_id, "Round already open");
                }
                Ok((round, inserted))
            }
            None => Err(GameError::StorageConflict(format!(
                "round id {round_id} already used and no round is open"
            ))),
        }
    }

    /// active → betting_closed. Returns false if the round was already past
    /// that state (or does not exist).
    pub async fn close_betting(&self, round_id: &str, now: DateTime<Utc>) -> Result<bool, GameError> {
        let changed = sqlx::query(
            "UPDATE rounds SET status = 'betting_closed', updated_at = ?1
             WHERE round_id = ?2 AND status = 'active'",
        )
        .bind(to_millis(now))
        .bind(round_id)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if changed {
            info!(round_id, "Betting closed");
        }
        Ok(changed)
    }

    /// active|betting_closed → closed. Refuses while the round has no
    /// recorded outcome or still has pending wagers. Returns false if the
    /// round was already closed.
    pub async fn close_round(&self, round_id: &str, now: DateTime<Utc>) -> Result<bool, GameError> {
        let changed = sqlx::query(
            "UPDATE rounds SET status = 'closed', updated_at = ?1
             WHERE round_id = ?2
               AND status <> 'closed'
               AND EXISTS (SELECT 1 FROM outcomes o WHERE o.round_id = rounds.round_id)
               AND NOT EXISTS (
                   SELECT 1 FROM wagers w
                   WHERE w.round_id = rounds.round_id AND w.status = 'pending'
               )",
        )
        .bind(to_millis(now))
        .bind(round_id)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if changed {
            info!(round_id, "Round closed");
            return Ok(true);
        }

        match self.find_round(round_id).await? {
            Some(round) if !round.status.is_open() => Ok(false),
            Some(_) => Err(GameError::SettlementFailure {
                round_id: round_id.to_string(),
                message: "round still has pending wagers or no outcome".to_string(),
            }),
            None => Err(GameError::RoundNotFound(round_id.to_string())),
        }
    }

    /// The single active/betting_closed round, if any.
    pub async fn find_open_round(&self) -> Result<Option<Round>, GameError> {
        let mut conn = self.pool.acquire().await?;
        self.open_round_in(&mut conn).await
    }

    async fn open_round_in(&self, conn: &mut SqliteConnection) -> Result<Option<Round>, GameError> {
        let sql = format!(
            "SELECT {ROUND_COLUMNS} FROM rounds
             WHERE game = ?1 AND status <> 'closed'
             ORDER BY end_time DESC LIMIT 1"
        );
        sqlx::query_as::<_, RoundRow>(&sql)
            .bind(&self.game)
            .fetch_optional(conn)
            .await?
            .map(Round::try_from)
            .transpose()
    }

    /// Non-closed rounds whose end time has passed, oldest first.
    pub async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Round>, GameError> {
        let sql = format!(
            "SELECT {ROUND_COLUMNS} FROM rounds
             WHERE game = ?1 AND status <> 'closed' AND end_time <= ?2
             ORDER BY end_time ASC"
        );
        sqlx::query_as::<_, RoundRow>(&sql)
            .bind(&self.game)
            .bind(to_millis(now))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Round::try_from)
            .collect()
    }

    pub async fn find_round(&self, round_id: &str) -> Result<Option<Round>, GameError> {
        let sql = format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE round_id = ?1");
        sqlx::query_as::<_, RoundRow>(&sql)
            .bind(round_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Round::try_from)
            .transpose()
    }

    /// The recorded outcome of a round, if drawn.
    pub async fn outcome_for(&self, round_id: &str) -> Result<Option<Outcome>, GameError> {
        let mut conn = self.pool.acquire().await?;
        outcome_in(&mut conn, round_id).await
    }

    /// Record `outcome` for a round on its own, ahead of settlement. Returns
    /// the outcome on record, which is an earlier one if it already existed.
    pub async fn record_outcome(
        &self,
        round_id: &str,
        outcome: &Outcome,
        now: DateTime<Utc>,
    ) -> Result<Outcome, GameError> {
        let mut conn = self.pool.acquire().await?;
        let recorded = record_outcome(&mut conn, round_id, outcome, now).await?;
        if recorded == *outcome {
            info!(round_id, value = recorded.value, forced = recorded.forced, "Outcome recorded");
        }
        Ok(recorded)
    }

    /// Closed rounds with their outcomes, newest first.
    pub async fn history(&self, page: Page) -> Result<Vec<RoundResult>, GameError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT r.round_id, r.start_time, r.end_time,
                    o.value, o.color, o.size, o.forced, o.generated_at
             FROM rounds r
             JOIN outcomes o ON o.round_id = r.round_id
             WHERE r.game = ?1 AND r.status = 'closed'
             ORDER BY r.end_time DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(&self.game)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let outcome = Outcome::try_from(OutcomeRow {
                    value: row.value,
                    color: row.color,
                    size: row.size,
                    forced: row.forced,
                })?;
                Ok(RoundResult {
                    round_id: row.round_id,
                    start_time: from_millis(row.start_time),
                    end_time: from_millis(row.end_time),
                    outcome,
                    generated_at: from_millis(row.generated_at),
                })
            })
            .collect()
    }
}

/// Record `outcome` for a round unless one already exists, then return the
/// outcome that is on record.
pub(crate) async fn record_outcome(
    conn: &mut SqliteConnection,
    round_id: &str,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Result<Outcome, GameError> {
    sqlx::query(
        "INSERT INTO outcomes (round_id, value, color, size, forced, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (round_id) DO NOTHING",
    )
    .bind(round_id)
    .bind(i64::from(outcome.value))
    .bind(outcome.color.as_str())
    .bind(outcome.size.as_str())
    .bind(outcome.forced)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;

    outcome_in(conn, round_id)
        .await?
        .ok_or_else(|| GameError::Storage(format!("outcome for {round_id} missing after insert")))
}

async fn outcome_in(conn: &mut SqliteConnection, round_id: &str) -> Result<Option<Outcome>, GameError> {
    sqlx::query_as::<_, OutcomeRow>(
        "SELECT value, color, size, forced FROM outcomes WHERE round_id = ?1",
    )
    .bind(round_id)
    .fetch_optional(conn)
    .await?
    .map(Outcome::try_from)
    .transpose()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Wager records: conditional insert, settlement updates and history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;

use super::{from_millis, from_units, to_millis, to_units, Store};
use crate::types::{
    BetSelection, GameError, Outcome, Page, UserId, Wager, WagerHistoryEntry, WagerStatus,
};

const WAGER_COLUMNS: &str =
    "id, user_id, round_id, category, selection, amount, status, payout, created_at, settled_at";

/// A wager as stored. Category and selection stay raw strings until
/// [`WagerRow::selection`] is asked for them, so settlement can treat an
/// unreadable row as a loss instead of failing the round.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct WagerRow {
    pub id: String,
    pub user_id: UserId,
    pub round_id: String,
    pub category: String,
    pub selection: String,
    pub amount: i64,
    pub status: String,
    pub payout: Option<i64>,
    pub created_at: i64,
    pub settled_at: Option<i64>,
}

impl WagerRow {
    pub fn selection(&self) -> Result<BetSelection, GameError> {
        BetSelection::parse(&self.category, &self.selection)
    }

    pub fn stake(&self) -> Decimal {
        from_units(self.amount)
    }
}

impl TryFrom<WagerRow> for Wager {
    type Error = GameError;

    fn try_from(row: WagerRow) -> Result<Self, Self::Error> {
        Ok(Wager {
            selection: row.selection()?,
            amount: from_units(row.amount),
            status: row.status.parse()?,
            payout: row.payout.map(from_units),
            created_at: from_millis(row.created_at),
            settled_at: row.settled_at.map(from_millis),
            id: row.id,
            user_id: row.user_id,
            round_id: row.round_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    #[sqlx(flatten)]
    wager: WagerRow,
    outcome_value: Option<i64>,
    outcome_forced: Option<bool>,
}

/// Insert a pending wager, but only if the round is still active and more
/// than `margin_ms` remains before it ends. Returns false when the round no
/// longer accepts bets. A duplicate selection surfaces as `StorageConflict`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn insert_wager(
    conn: &mut SqliteConnection,
    id: &str,
    user_id: UserId,
    round_id: &str,
    selection: &BetSelection,
    amount: Decimal,
    now: DateTime<Utc>,
    margin_ms: i64,
) -> Result<bool, GameError> {
    let now_ms = to_millis(now);
    let inserted = sqlx::query(
        "INSERT INTO wagers
             (id, user_id, round_id, category, selection, amount, status, created_at)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7
         WHERE EXISTS (
             SELECT 1 FROM rounds
             WHERE round_id = ?3 AND status = 'active' AND end_time - ?7 > ?8
         )",
    )
    .bind(id)
    .bind(user_id)
    .bind(round_id)
    .bind(selection.category().as_str())
    .bind(selection.option())
    .bind(to_units(amount)?)
    .bind(now_ms)
    .bind(margin_ms)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(inserted == 1)
}

/// Pending wagers of a round, oldest first.
pub(crate) async fn pending_for_round(
    conn: &mut SqliteConnection,
    round_id: &str,
) -> Result<Vec<WagerRow>, GameError> {
    let sql = format!(
        "SELECT {WAGER_COLUMNS} FROM wagers
         WHERE round_id = ?1 AND status = 'pending'
         ORDER BY created_at ASC, id ASC"
    );
    Ok(sqlx::query_as::<_, WagerRow>(&sql)
        .bind(round_id)
        .fetch_all(conn)
        .await?)
}

/// pending → won|lost. Returns false if the wager was no longer pending,
/// in which case the caller must not pay it out.
pub(crate) async fn mark_settled(
    conn: &mut SqliteConnection,
    wager_id: &str,
    status: WagerStatus,
    payout: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<bool, GameError> {
    let payout = payout.map(to_units).transpose()?;
    let changed = sqlx::query(
        "UPDATE wagers SET status = ?1, payout = ?2, settled_at = ?3
         WHERE id = ?4 AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(payout)
    .bind(to_millis(now))
    .bind(wager_id)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(changed == 1)
}

impl Store {
    pub async fn find_wager(&self, wager_id: &str) -> Result<Option<Wager>, GameError> {
        let sql = format!("SELECT {WAGER_COLUMNS} FROM wagers WHERE id = ?1");
        sqlx::query_as::<_, WagerRow>(&sql)
            .bind(wager_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Wager::try_from)
            .transpose()
    }

    /// Whether the user already holds a wager on this selection in the round.
    pub async fn has_wager(
        &self,
        user_id: UserId,
        round_id: &str,
        selection: &BetSelection,
    ) -> Result<bool, GameError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM wagers
             WHERE user_id = ?1 AND round_id = ?2 AND category = ?3 AND selection = ?4",
        )
        .bind(user_id)
        .bind(round_id)
        .bind(selection.category().as_str())
        .bind(selection.option())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    pub async fn pending_for_round(&self, round_id: &str) -> Result<Vec<Wager>, GameError> {
        let mut conn = self.pool.acquire().await?;
        pending_for_round(&mut conn, round_id)
            .await?
            .into_iter()
            .map(Wager::try_from)
            .collect()
    }

    /// Every wager of a round regardless of status, oldest first.
    pub async fn wagers_for_round(&self, round_id: &str) -> Result<Vec<Wager>, GameError> {
        let sql = format!(
            "SELECT {WAGER_COLUMNS} FROM wagers WHERE round_id = ?1 ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, WagerRow>(&sql)
            .bind(round_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Wager::try_from)
            .collect()
    }

    /// A user's bet history, newest first, with the round outcome once drawn.
    pub async fn wagers_for_user(
        &self,
        user_id: UserId,
        page: Page,
    ) -> Result<Vec<WagerHistoryEntry>, GameError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT w.id, w.user_id, w.round_id, w.category, w.selection, w.amount,
                    w.status, w.payout, w.created_at, w.settled_at,
                    o.value AS outcome_value, o.forced AS outcome_forced
             FROM wagers w
             LEFT JOIN outcomes o ON o.round_id = w.round_id
             WHERE w.user_id = ?1
             ORDER BY w.created_at DESC, w.id DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let outcome = row
                    .outcome_value
                    .map(|v| Outcome::from_value(v, row.outcome_forced.unwrap_or(false)))
                    .transpose()?;
                Ok(WagerHistoryEntry {
                    wager: Wager::try_from(row.wager)?,
                    outcome,
                })
            })
            .collect()
    }
}

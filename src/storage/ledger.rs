//! Ledger Store: per-user balances and the append-only ledger.
//!
//! A balance never changes without a ledger entry in the same transaction.
//! Increments and decrements are single `UPDATE ... RETURNING` statements,
//! so concurrent mutations of one wallet serialize on SQLite's write lock
//! instead of racing through read-compute-write.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::info;

use super::{from_millis, from_units, to_millis, to_units, Store};
use crate::types::{GameError, LedgerEntry, LedgerKind, Page, UserId};

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: i64,
    user_id: UserId,
    kind: String,
    amount: i64,
    balance_before: i64,
    balance_after: i64,
    reference: Option<String>,
    created_at: i64,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = GameError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse()?,
            amount: from_units(row.amount),
            balance_before: from_units(row.balance_before),
            balance_after: from_units(row.balance_after),
            reference: row.reference,
            created_at: from_millis(row.created_at),
        })
    }
}

/// Move `amount` in or out of a wallet and append the matching ledger entry.
/// Debits never take a balance below zero.
pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    user_id: UserId,
    kind: LedgerKind,
    amount: Decimal,
    reference: Option<&str>,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, GameError> {
    if amount <= Decimal::ZERO {
        return Err(GameError::InvalidInput(format!("{kind} amount must be positive, got {amount}")));
    }
    let units = to_units(amount)?;
    let now_ms = to_millis(now);

    let after: Option<i64> = if kind.is_credit() {
        sqlx::query_scalar(
            "UPDATE wallets SET balance = balance + ?1, updated_at = ?2
             WHERE user_id = ?3
             RETURNING balance",
        )
        .bind(units)
        .bind(now_ms)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
    } else {
        sqlx::query_scalar(
            "UPDATE wallets SET balance = balance - ?1, updated_at = ?2
             WHERE user_id = ?3 AND balance >= ?1
             RETURNING balance",
        )
        .bind(units)
        .bind(now_ms)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
    };

    let Some(after) = after else {
        let current: Option<i64> = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
        return Err(match current {
            None => GameError::WalletNotFound(user_id),
            Some(available) => GameError::InsufficientFunds {
                needed: amount,
                available: from_units(available),
            },
        });
    };
    let before = if kind.is_credit() { after - units } else { after + units };

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO ledger_entries
             (user_id, kind, amount, balance_before, balance_after, reference, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         RETURNING id",
    )
    .bind(user_id)
    .bind(kind.as_str())
    .bind(units)
    .bind(before)
    .bind(after)
    .bind(reference)
    .bind(now_ms)
    .fetch_one(&mut *conn)
    .await?;

    Ok(LedgerEntry {
        id,
        user_id,
        kind,
        amount: from_units(units),
        balance_before: from_units(before),
        balance_after: from_units(after),
        reference: reference.map(str::to_string),
        created_at: from_millis(now_ms),
    })
}

async fn ensure_wallet(conn: &mut SqliteConnection, user_id: UserId, now: DateTime<Utc>) -> Result<bool, GameError> {
    let now_ms = to_millis(now);
    let created = sqlx::query(
        "INSERT INTO wallets (user_id, balance, created_at, updated_at)
         VALUES (?1, 0, ?2, ?2)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(now_ms)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(created == 1)
}

impl Store {
    /// Current balance, or `None` if the user has no wallet.
    pub async fn balance(&self, user_id: UserId) -> Result<Option<Decimal>, GameError> {
        let units: Option<i64> = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(units.map(from_units))
    }

    /// Create an empty wallet if the user has none. Returns whether one was created.
    pub async fn open_wallet(&self, user_id: UserId) -> Result<bool, GameError> {
        let mut conn = self.pool.acquire().await?;
        let created = ensure_wallet(&mut conn, user_id, Utc::now()).await?;
        if created {
            info!(user_id, "Wallet opened");
        }
        Ok(created)
    }

    /// Credit a wallet from an external deposit, opening it if needed.
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        reference: Option<&str>,
    ) -> Result<LedgerEntry, GameError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        ensure_wallet(&mut tx, user_id, now).await?;
        let entry = apply(&mut tx, user_id, LedgerKind::Deposit, amount, reference, now).await?;
        tx.commit().await?;
        info!(user_id, amount = %entry.amount, balance = %entry.balance_after, "Deposit");
        Ok(entry)
    }

    /// Debit a wallet for an external withdrawal.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Decimal,
        reference: Option<&str>,
    ) -> Result<LedgerEntry, GameError> {
        let mut tx = self.pool.begin().await?;
        let entry = apply(&mut tx, user_id, LedgerKind::Withdrawal, amount, reference, Utc::now()).await?;
        tx.commit().await?;
        info!(user_id, amount = %entry.amount, balance = %entry.balance_after, "Withdrawal");
        Ok(entry)
    }

    /// A user's ledger, newest first.
    pub async fn entries(&self, user_id: UserId, page: Page) -> Result<Vec<LedgerEntry>, GameError> {
        sqlx::query_as::<_, LedgerRow>(
            "SELECT id, user_id, kind, amount, balance_before, balance_after, reference, created_at
             FROM ledger_entries
             WHERE user_id = ?1
             ORDER BY id DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }

    /// Sum of all wallet balances.
    pub async fn total_balance(&self) -> Result<Decimal, GameError> {
        let units: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(balance), 0) FROM wallets")
            .fetch_one(&self.pool)
            .await?;
        Ok(from_units(units))
    }
}

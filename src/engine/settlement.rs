//! Settlement engine.
//!
//! Resolves every pending wager of a round against its outcome in a single
//! transaction: the outcome is recorded (first write wins), each wager is
//! moved out of pending with a guarded update, and winners are credited
//! with a paired ledger entry. A wager whose status update matched no row
//! was settled by someone else and is not paid again, which makes
//! re-running settlement on a round a no-op.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::storage::wagers::{self, WagerRow};
use crate::storage::{ledger, rounds, Store};
use crate::types::{GameError, LedgerKind, Outcome, Round, SettlementReport, WagerStatus};

pub struct SettlementEngine {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl SettlementEngine {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Settle `round` against `outcome`.
    ///
    /// If the round already has an outcome on record, that one is used and
    /// reported instead of `outcome`. Any storage error rolls the whole
    /// round back and is returned as `SettlementFailure`; the round stays
    /// pending for the next attempt.
    pub async fn settle_round(
        &self,
        round: &Round,
        outcome: Outcome,
    ) -> Result<SettlementReport, GameError> {
        self.settle_in_tx(round, outcome)
            .await
            .map_err(|e| match e {
                GameError::SettlementFailure { .. } => e,
                other => GameError::SettlementFailure {
                    round_id: round.round_id.clone(),
                    message: other.to_string(),
                },
            })
    }

    async fn settle_in_tx(
        &self,
        round: &Round,
        outcome: Outcome,
    ) -> Result<SettlementReport, GameError> {
        let now = self.clock.now();
        let mut tx = self.store.pool().begin().await?;

        let outcome = rounds::record_outcome(&mut tx, &round.round_id, &outcome, now).await?;
        let pending = wagers::pending_for_round(&mut tx, &round.round_id).await?;
        let mut report = SettlementReport::empty(&round.round_id, outcome);

        for row in &pending {
            let (status, payout) = classify(row, &outcome);
            if !wagers::mark_settled(&mut tx, &row.id, status, payout, now).await? {
                continue;
            }

            report.total_staked += row.stake();
            match payout {
                Some(payout) => {
                    ledger::apply(&mut tx, row.user_id, LedgerKind::Win, payout, Some(&row.id), now)
                        .await?;
                    report.won += 1;
                    report.total_payout += payout;
                }
                None => report.lost += 1,
            }
        }

        tx.commit().await?;

        info!(
            round_id = %round.round_id,
            value = outcome.value,
            color = %outcome.color,
            size = %outcome.size,
            forced = outcome.forced,
            won = report.won,
            lost = report.lost,
            staked = %report.total_staked,
            paid = %report.total_payout,
            "Round settled"
        );
        Ok(report)
    }
}

/// Decide a single wager. Rows whose selection no longer parses lose.
fn classify(row: &WagerRow, outcome: &Outcome) -> (WagerStatus, Option<Decimal>) {
    match row.selection() {
        Ok(selection) if selection.wins(outcome) => {
            (WagerStatus::Won, Some(selection.payout(row.stake())))
        }
        Ok(_) => (WagerStatus::Lost, None),
        Err(e) => {
            warn!(
                wager_id = %row.id,
                category = %row.category,
                option = %row.selection,
                error = %e,
                "Unrecognised wager selection, settling as lost"
            );
            (WagerStatus::Lost, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::test_store;
    use crate::types::{BetSelection, Color, Size};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Store,
        engine: SettlementEngine,
        round: Round,
    }

    async fn fixture() -> Fixture {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = test_store().await;
        let (round, _) = store
            .open_new_round(start, chrono::Duration::seconds(60))
            .await
            .unwrap();
        let engine = SettlementEngine::new(store.clone(), clock);
        Fixture { store, engine, round }
    }

    async fn bet(f: &Fixture, id: &str, user: i64, selection: BetSelection, amount: Decimal) {
        let mut tx = f.store.pool().begin().await.unwrap();
        ledger::apply(&mut tx, user, LedgerKind::Bet, amount, Some(id), f.round.start_time)
            .await
            .unwrap();
        assert!(wagers::insert_wager(
            &mut tx, id, user, &f.round.round_id, &selection, amount, f.round.start_time, 5_000,
        )
        .await
        .unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_outcome_payouts() {
        let f = fixture().await;
        f.store.deposit(1, dec!(1000), None).await.unwrap();
        bet(&f, "violet", 1, BetSelection::Color(Color::Violet), dec!(100)).await;
        bet(&f, "zero", 1, BetSelection::Number(0), dec!(100)).await;
        bet(&f, "big", 1, BetSelection::Size(Size::Big), dec!(100)).await;
        assert_eq!(f.store.balance(1).await.unwrap(), Some(dec!(700)));

        let outcome = Outcome::from_value(0, false).unwrap();
        let report = f.engine.settle_round(&f.round, outcome).await.unwrap();
        assert_eq!(report.won, 2);
        assert_eq!(report.lost, 1);
        assert_eq!(report.total_staked, dec!(300));
        assert_eq!(report.total_payout, dec!(1350));

        let violet = f.store.find_wager("violet").await.unwrap().unwrap();
        assert_eq!(violet.status, WagerStatus::Won);
        assert_eq!(violet.payout, Some(dec!(450)));
        let zero = f.store.find_wager("zero").await.unwrap().unwrap();
        assert_eq!(zero.payout, Some(dec!(900)));
        let big = f.store.find_wager("big").await.unwrap().unwrap();
        assert_eq!(big.status, WagerStatus::Lost);
        assert_eq!(big.payout, None);

        assert_eq!(f.store.balance(1).await.unwrap(), Some(dec!(2050)));
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent() {
        let f = fixture().await;
        f.store.deposit(1, dec!(100), None).await.unwrap();
        f.store.deposit(2, dec!(100), None).await.unwrap();
        bet(&f, "a", 1, BetSelection::Color(Color::Green), dec!(50)).await;
        bet(&f, "b", 2, BetSelection::Color(Color::Red), dec!(50)).await;

        let outcome = Outcome::from_value(3, false).unwrap();
        let first = f.engine.settle_round(&f.round, outcome).await.unwrap();
        assert_eq!(first.settled(), 2);
        let balances = (f.store.balance(1).await.unwrap(), f.store.balance(2).await.unwrap());

        let second = f.engine.settle_round(&f.round, outcome).await.unwrap();
        assert_eq!(second.settled(), 0);
        assert_eq!(second.total_payout, Decimal::ZERO);
        assert_eq!(
            (f.store.balance(1).await.unwrap(), f.store.balance(2).await.unwrap()),
            balances
        );
        assert_eq!(balances, (Some(dec!(150)), Some(dec!(50))));
    }

    #[tokio::test]
    async fn test_stored_outcome_wins_over_later_draw() {
        let f = fixture().await;
        let forced = Outcome::from_value(7, true).unwrap();
        f.engine.settle_round(&f.round, forced).await.unwrap();

        let other = Outcome::from_value(2, false).unwrap();
        let report = f.engine.settle_round(&f.round, other).await.unwrap();
        assert_eq!(report.outcome, forced);
        assert_eq!(f.store.outcome_for(&f.round.round_id).await.unwrap(), Some(forced));
    }

    #[tokio::test]
    async fn test_empty_round_is_success() {
        let f = fixture().await;
        let report = f
            .engine
            .settle_round(&f.round, Outcome::from_value(5, false).unwrap())
            .await
            .unwrap();
        assert_eq!(report.settled(), 0);
        assert!(f.store.close_round(&f.round.round_id, f.round.end_time).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_selection_settles_as_lost() {
        let f = fixture().await;
        f.store.deposit(1, dec!(100), None).await.unwrap();
        bet(&f, "odd", 1, BetSelection::Number(4), dec!(10)).await;
        sqlx::query("UPDATE wagers SET category = 'parity', selection = 'odd' WHERE id = 'odd'")
            .execute(f.store.pool())
            .await
            .unwrap();

        let report = f
            .engine
            .settle_round(&f.round, Outcome::from_value(4, false).unwrap())
            .await
            .unwrap();
        assert_eq!(report.lost, 1);
        assert_eq!(report.won, 0);
        assert!(f.store.pending_for_round(&f.round.round_id).await.unwrap().is_empty());
        assert_eq!(f.store.balance(1).await.unwrap(), Some(dec!(90)));
    }

    #[tokio::test]
    async fn test_balance_delta_matches_report() {
        let f = fixture().await;
        for user in 1..=4 {
            f.store.deposit(user, dec!(500), None).await.unwrap();
        }
        let before = f.store.total_balance().await.unwrap();

        bet(&f, "w1", 1, BetSelection::Number(8), dec!(12.34)).await;
        bet(&f, "w2", 2, BetSelection::Color(Color::Red), dec!(99.99)).await;
        bet(&f, "w3", 3, BetSelection::Size(Size::Small), dec!(10)).await;
        bet(&f, "w4", 4, BetSelection::Color(Color::Violet), dec!(33.33)).await;

        let report = f
            .engine
            .settle_round(&f.round, Outcome::from_value(8, false).unwrap())
            .await
            .unwrap();
        let after = f.store.total_balance().await.unwrap();
        assert_eq!(after - before, report.player_net());
        assert_eq!(report.total_payout, dec!(12.34) * dec!(9) + dec!(99.99) * dec!(2));
    }
}

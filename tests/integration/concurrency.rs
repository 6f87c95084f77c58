//! Concurrent writers against one database: duplicate bets, round
//! creation races, bets racing the close of betting, and an override
//! racing natural expiry.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use wingo::clock::SystemClock;
use wingo::config::GameConfig;
use wingo::engine::{BetIntake, Scheduler};
use wingo::types::{GameError, LedgerKind, Page, RoundStatus, WagerStatus};

use crate::harness::{secs, store, t0, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_bets() {
    let h = Harness::new().await;
    h.fund([1], dec!(1000)).await;
    let round = h.scheduler.creation_tick().await.unwrap().unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let intake = h.intake.clone();
            tokio::spawn(async move { intake.place_bet(1, "color", "red", dec!(100)).await })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(GameError::DuplicateBet))));
    assert_eq!(h.store.wagers_for_round(&round.round_id).await.unwrap().len(), 1);
    assert_eq!(h.store.balance(1).await.unwrap(), Some(dec!(900)));

    let bets = h
        .store
        .entries(1, Page::default())
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == LedgerKind::Bet)
        .count();
    assert_eq!(bets, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_round_creation() {
    let store = store().await;
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .open_new_round(t0() + chrono::Duration::milliseconds(i), secs(60))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        let (round, was_created) = handle.await.unwrap().unwrap();
        created += usize::from(was_created);
        ids.push(round.round_id);
    }
    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rounds")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_schedulers_share_one_round() {
    let store = store().await;
    let game = GameConfig::default();
    let schedulers: Vec<_> = (0..4)
        .map(|_| Arc::new(Scheduler::new(store.clone(), Arc::new(SystemClock), game.clone())))
        .collect();

    let handles: Vec<_> = schedulers
        .iter()
        .map(|s| {
            let s = s.clone();
            tokio::spawn(async move { s.creation_tick().await })
        })
        .collect();
    let created = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(Some(_)))))
        .count();
    assert_eq!(created, 1);

    let open = store.find_open_round().await.unwrap().unwrap();
    assert_eq!(open.status, RoundStatus::Active);
    assert!(open.end_time > Utc::now());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bets_racing_settlement_are_never_orphaned() {
    let h = Harness::new().await;
    let users: Vec<i64> = (1..=20).collect();
    h.fund(users.iter().copied(), dec!(500)).await;
    let deposited = h.store.total_balance().await.unwrap();
    let round = h.scheduler.creation_tick().await.unwrap().unwrap();

    let bets: Vec<_> = users
        .iter()
        .map(|&user| {
            let intake = h.intake.clone();
            tokio::spawn(async move { intake.place_bet(user, "size", "big", dec!(50)).await })
        })
        .collect();
    let scheduler = h.scheduler.clone();
    let overriding = tokio::spawn(async move { scheduler.force_outcome(None, 9).await });

    let mut accepted = 0usize;
    for bet in futures::future::join_all(bets).await {
        match bet.unwrap() {
            Ok(_) => accepted += 1,
            Err(GameError::BettingClosed | GameError::NoOpenRound) => {}
            Err(e) => panic!("unexpected rejection: {e}"),
        }
    }
    let report = overriding.await.unwrap().unwrap();

    // Anything accepted was settled by the override; nothing slipped in after.
    assert_eq!(report.settled(), accepted);
    assert_eq!(report.won, accepted);
    let wagers = h.store.wagers_for_round(&round.round_id).await.unwrap();
    assert_eq!(wagers.len(), accepted);
    assert!(wagers.iter().all(|w| w.status == WagerStatus::Won));

    let closed = h.store.find_round(&round.round_id).await.unwrap().unwrap();
    assert_eq!(closed.status, RoundStatus::Closed);
    assert_eq!(
        h.store.total_balance().await.unwrap(),
        deposited + Decimal::from(accepted as i64) * dec!(50)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_override_racing_expiry_pays_once() {
    let h = Harness::new().await;
    h.fund([1, 2], dec!(100)).await;
    let round = h.scheduler.creation_tick().await.unwrap().unwrap();
    h.intake.place_bet(1, "number", "4", dec!(10)).await.unwrap();
    h.intake.place_bet(2, "number", "4", dec!(10)).await.unwrap();

    // Second scheduler over the same store whose clock says the round is over.
    let late = Harness::with_store(h.store.clone()).await;
    late.clock.set(round.end_time);

    let overriding = {
        let scheduler = h.scheduler.clone();
        let round_id = round.round_id.clone();
        tokio::spawn(async move { scheduler.force_outcome(Some(&round_id), 4).await })
    };
    let expiring = {
        let scheduler = late.scheduler.clone();
        tokio::spawn(async move { scheduler.status_tick().await })
    };
    let overridden = overriding.await.unwrap();
    let expired = expiring.await.unwrap().unwrap();

    let outcome = h.store.outcome_for(&round.round_id).await.unwrap().unwrap();
    let mut paid_out = Decimal::ZERO;
    match &overridden {
        // An override that returns Ok always had its value applied.
        Ok(report) => {
            assert_eq!(report.outcome, outcome);
            assert_eq!((outcome.value, outcome.forced), (4, true));
            paid_out += report.total_payout;
        }
        Err(e) => assert!(matches!(e, GameError::RoundNotActive { .. }), "{e}"),
    }
    for report in &expired {
        assert_eq!(report.outcome, outcome);
        paid_out += report.total_payout;
    }

    // Exactly one settlement did the work.
    let won = h
        .store
        .wagers_for_round(&round.round_id)
        .await
        .unwrap()
        .iter()
        .filter(|w| w.status == WagerStatus::Won)
        .count();
    let expected = if outcome.value == 4 { dec!(180) } else { Decimal::ZERO };
    assert_eq!(paid_out, expected);
    assert_eq!(won, if outcome.value == 4 { 2 } else { 0 });
    assert_eq!(h.store.total_balance().await.unwrap(), dec!(180) + expected);
    assert_eq!(
        h.store.find_round(&round.round_id).await.unwrap().unwrap().status,
        RoundStatus::Closed
    );
    if overridden.is_err() {
        assert!(!outcome.forced);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_bets_and_deposits_keep_ledger_consistent() {
    let h = Harness::new().await;
    h.fund([1], dec!(1000)).await;
    h.scheduler.creation_tick().await.unwrap();

    let options = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];
    let mut handles = Vec::new();
    for option in options {
        let intake: Arc<BetIntake> = h.intake.clone();
        handles.push(tokio::spawn(async move {
            intake.place_bet(1, "number", option, dec!(10)).await.map(|_| ())
        }));
        let store = h.store.clone();
        handles.push(tokio::spawn(async move {
            store.deposit(1, dec!(1), None).await.map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.store.balance(1).await.unwrap(), Some(dec!(910)));
    let mut entries = h.store.entries(1, Page::new(100, 0)).await.unwrap();
    assert_eq!(entries.len(), 21);
    entries.reverse();
    for pair in entries.windows(2) {
        assert_eq!(pair[0].balance_after, pair[1].balance_before);
    }
}

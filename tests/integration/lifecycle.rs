//! Round lifecycle scenarios driven tick by tick.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use wingo::types::{
    Color, GameError, LedgerKind, Page, RoundStatus, Size, WagerStatus,
};

use crate::harness::{secs, t0, Harness};

#[tokio::test]
async fn test_full_round() {
    let h = Harness::new().await;
    h.fund(1..=3, dec!(1000)).await;

    let round = h.scheduler.creation_tick().await.unwrap().unwrap();
    assert_eq!(round.end_time, t0() + secs(60));

    h.clock.advance(secs(10));
    let w1 = h.intake.place_bet(1, "color", "violet", dec!(100)).await.unwrap();
    let w2 = h.intake.place_bet(2, "number", "0", dec!(100)).await.unwrap();
    let w3 = h.intake.place_bet(3, "size", "big", dec!(100)).await.unwrap();

    // Inside the closing margin the round stops taking bets.
    h.clock.set(t0() + secs(56));
    h.scheduler.status_tick().await.unwrap();
    let err = h.intake.place_bet(1, "size", "small", dec!(10)).await.unwrap_err();
    assert_eq!(err, GameError::BettingClosed);

    h.clock.set(round.end_time);
    let reports = h.scheduler.status_tick().await.unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.settled(), 3);

    let closed = h.store.find_round(&round.round_id).await.unwrap().unwrap();
    assert_eq!(closed.status, RoundStatus::Closed);
    assert!(h.store.pending_for_round(&round.round_id).await.unwrap().is_empty());

    for wager in [&w1, &w2, &w3] {
        let settled = h.store.find_wager(&wager.id).await.unwrap().unwrap();
        let won = wager.selection.wins(&report.outcome);
        let expected = if won { WagerStatus::Won } else { WagerStatus::Lost };
        assert_eq!(settled.status, expected);
        assert_eq!(settled.payout, won.then(|| wager.selection.payout(wager.amount)));

        let balance = h.store.balance(wager.user_id).await.unwrap().unwrap();
        assert_eq!(balance, dec!(900) + settled.payout.unwrap_or_default());
    }

    let history = h.store.history(Page::default()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].round_id, round.round_id);
    assert_eq!(history[0].outcome, report.outcome);

    // The next round opened as soon as this one closed.
    assert!(h.scheduler.creation_tick().await.unwrap().is_none());
    let next = h.store.find_open_round().await.unwrap().unwrap();
    assert_eq!(next.start_time, round.end_time);
    assert_eq!(next.status, RoundStatus::Active);
}

#[tokio::test]
async fn test_override_seven_on_empty_round() {
    let h = Harness::new().await;
    let round = h.scheduler.creation_tick().await.unwrap().unwrap();

    let report = h.scheduler.force_outcome(None, 7).await.unwrap();
    assert_eq!(report.outcome.value, 7);
    assert_eq!(report.outcome.color, Color::Green);
    assert_eq!(report.outcome.size, Size::Big);
    assert!(report.outcome.forced);

    let closed = h.store.find_round(&round.round_id).await.unwrap().unwrap();
    assert_eq!(closed.status, RoundStatus::Closed);
    assert_eq!(h.store.outcome_for(&round.round_id).await.unwrap(), Some(report.outcome));
    assert!(h.scheduler.current_status().await.unwrap().is_none());
}

#[tokio::test]
async fn test_zero_outcome_scenario() {
    let h = Harness::new().await;
    h.fund([1], dec!(300)).await;
    h.scheduler.creation_tick().await.unwrap();

    let violet = h.intake.place_bet(1, "color", "violet", dec!(100)).await.unwrap();
    let zero = h.intake.place_bet(1, "number", "0", dec!(100)).await.unwrap();
    let big = h.intake.place_bet(1, "size", "big", dec!(100)).await.unwrap();
    assert_eq!(h.store.balance(1).await.unwrap(), Some(Decimal::ZERO));

    h.scheduler.force_outcome(None, 0).await.unwrap();

    let violet = h.store.find_wager(&violet.id).await.unwrap().unwrap();
    let zero = h.store.find_wager(&zero.id).await.unwrap().unwrap();
    let big = h.store.find_wager(&big.id).await.unwrap().unwrap();
    assert_eq!((violet.status, violet.payout), (WagerStatus::Won, Some(dec!(450))));
    assert_eq!((zero.status, zero.payout), (WagerStatus::Won, Some(dec!(900))));
    assert_eq!((big.status, big.payout), (WagerStatus::Lost, None));
    assert_eq!(h.store.balance(1).await.unwrap(), Some(dec!(1350)));

    // Every balance change has its ledger entry.
    let entries = h.store.entries(1, Page::new(100, 0)).await.unwrap();
    let wins = entries.iter().filter(|e| e.kind == LedgerKind::Win).count();
    let bets = entries.iter().filter(|e| e.kind == LedgerKind::Bet).count();
    assert_eq!((bets, wins), (3, 2));
}

#[tokio::test]
async fn test_many_rounds_conserve_value() {
    let h = Harness::new().await;
    let users: Vec<i64> = (1..=6).collect();
    h.fund(users.iter().copied(), dec!(5000)).await;
    let deposited = h.store.total_balance().await.unwrap();

    let mut rng = StdRng::seed_from_u64(2026);
    let options: [(&str, &str); 6] = [
        ("size", "big"),
        ("size", "small"),
        ("color", "red"),
        ("color", "green"),
        ("color", "violet"),
        ("number", "5"),
    ];

    let mut net = Decimal::ZERO;
    let mut closed_rounds = Vec::new();
    for _ in 0..15 {
        h.scheduler.creation_tick().await.unwrap();
        let round = h.store.find_open_round().await.unwrap().unwrap();
        for &user in &users {
            let (category, option) = options[rng.gen_range(0..options.len())];
            let stake = Decimal::from(rng.gen_range(10i64..=200));
            match h.intake.place_bet(user, category, option, stake).await {
                Ok(_) | Err(GameError::InsufficientFunds { .. }) => {}
                Err(e) => panic!("unexpected rejection: {e}"),
            }
        }

        h.clock.set(round.end_time);
        for report in h.scheduler.status_tick().await.unwrap() {
            net += report.player_net();
        }
        closed_rounds.push(round.round_id);
    }

    assert_eq!(h.store.total_balance().await.unwrap(), deposited + net);
    for round_id in &closed_rounds {
        let round = h.store.find_round(round_id).await.unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Closed);
        for wager in h.store.wagers_for_round(round_id).await.unwrap() {
            assert_ne!(wager.status, WagerStatus::Pending);
        }
    }
    assert_eq!(h.store.history(Page::new(100, 0)).await.unwrap().len(), 15);
}

#[tokio::test]
async fn test_restart_resumes_expired_round() {
    let h = Harness::new().await;
    h.fund([1], dec!(100)).await;
    let round = h.scheduler.creation_tick().await.unwrap().unwrap();
    h.intake.place_bet(1, "color", "red", dec!(50)).await.unwrap();

    // A new process over the same database, started long after the round ended.
    let restarted = Harness::with_store(h.store.clone()).await;
    restarted.clock.set(round.end_time + secs(600));
    assert!(restarted.scheduler.creation_tick().await.unwrap().is_none());

    let reports = restarted.scheduler.status_tick().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].round_id, round.round_id);
    assert_eq!(reports[0].settled(), 1);

    let next = restarted.store.find_open_round().await.unwrap().unwrap();
    assert_eq!(next.start_time, round.end_time + secs(600));
}

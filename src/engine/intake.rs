//! Bet intake.
//!
//! Validates a bet against the open round and the player's wallet, then
//! debits the stake and records the wager in one transaction. The checks
//! run up front so rejections are cheap and carry a precise reason; the
//! transaction itself re-enforces the ones that can race:
//!
//! - the debit only applies if the balance still covers the stake,
//! - the wager insert only applies while the round is active and inside
//!   its betting window,
//! - the unique (user, round, category, option) constraint rejects a
//!   concurrent duplicate.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::GameConfig;
use crate::storage::{from_millis, ledger, to_millis, wagers, Store};
use crate::types::{
    BetSelection, GameError, LedgerKind, RoundStatus, UserId, Wager, WagerStatus,
};

/// Decimal places a stake may carry.
const STAKE_SCALE: u32 = 2;

pub struct BetIntake {
    store: Store,
    clock: Arc<dyn Clock>,
    min_bet: Decimal,
    max_bet: Decimal,
    closing_margin: chrono::Duration,
}

impl BetIntake {
    pub fn new(store: Store, clock: Arc<dyn Clock>, game: &GameConfig) -> Self {
        Self {
            store,
            clock,
            min_bet: game.min_bet,
            max_bet: game.max_bet,
            closing_margin: game.closing_margin(),
        }
    }

    /// Place a bet on the currently open round.
    pub async fn place_bet(
        &self,
        user_id: UserId,
        category: &str,
        option: &str,
        amount: Decimal,
    ) -> Result<Wager, GameError> {
        let result = self.validate_and_place(user_id, category, option, amount).await;
        match &result {
            Ok(wager) => info!(
                wager_id = %wager.id,
                user_id,
                round_id = %wager.round_id,
                selection = %wager.selection,
                amount = %wager.amount,
                "Bet accepted"
            ),
            Err(e) => debug!(user_id, category, option, %amount, code = e.code(), "Bet rejected"),
        }
        result
    }

    async fn validate_and_place(
        &self,
        user_id: UserId,
        category: &str,
        option: &str,
        amount: Decimal,
    ) -> Result<Wager, GameError> {
        let selection = BetSelection::parse(category, option)?;
        self.check_amount(amount)?;

        match self.try_place(user_id, selection, amount).await {
            Err(GameError::StorageConflict(reason)) => {
                warn!(user_id, %selection, reason = %reason, "Bet lost a storage race, retrying once");
                self.try_place(user_id, selection, amount).await
            }
            other => other,
        }
    }

    fn check_amount(&self, amount: Decimal) -> Result<(), GameError> {
        if amount < self.min_bet || amount > self.max_bet || amount.normalize().scale() > STAKE_SCALE {
            return Err(GameError::InvalidAmount {
                min: self.min_bet,
                max: self.max_bet,
            });
        }
        Ok(())
    }

    async fn try_place(
        &self,
        user_id: UserId,
        selection: BetSelection,
        amount: Decimal,
    ) -> Result<Wager, GameError> {
        let now = self.clock.now();

        let round = self.store.find_open_round().await?.ok_or(GameError::NoOpenRound)?;
        if round.status != RoundStatus::Active {
            return Err(GameError::BettingClosed);
        }
        if !round.betting_window_open(now, self.closing_margin) {
            return Err(GameError::BettingWindowClosed);
        }

        let available = self
            .store
            .balance(user_id)
            .await?
            .ok_or(GameError::WalletNotFound(user_id))?;
        if available < amount {
            return Err(GameError::InsufficientFunds { needed: amount, available });
        }
        if self.store.has_wager(user_id, &round.round_id, &selection).await? {
            return Err(GameError::DuplicateBet);
        }

        let wager_id = Uuid::new_v4().to_string();
        let mut tx = self.store.pool().begin().await?;
        ledger::apply(&mut tx, user_id, LedgerKind::Bet, amount, Some(&wager_id), now).await?;
        let inserted = wagers::insert_wager(
            &mut tx,
            &wager_id,
            user_id,
            &round.round_id,
            &selection,
            amount,
            now,
            self.closing_margin.num_milliseconds(),
        )
        .await?;
        if !inserted {
            // Dropping the transaction undoes the debit.
            return Err(GameError::BettingClosed);
        }
        tx.commit().await?;

        Ok(Wager {
            id: wager_id,
            user_id,
            round_id: round.round_id,
            selection,
            amount: amount.normalize(),
            status: WagerStatus::Pending,
            payout: None,
            created_at: from_millis(to_millis(now)),
            settled_at: None,
        })
    }
}

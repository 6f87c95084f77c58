//! Shared types for the WINGO game service.
//!
//! These types form the data model used across the storage layer, the
//! engine and the API: rounds and their outcomes, wagers, ledger entries,
//! and the error taxonomy with its stable reason codes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Users are identified by the numeric id issued by the account service.
pub type UserId = i64;

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Lifecycle status of a round: `active → betting_closed → closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Active,
    BettingClosed,
    Closed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Active => "active",
            RoundStatus::BettingClosed => "betting_closed",
            RoundStatus::Closed => "closed",
        }
    }

    /// Whether the round still counts against the single-open-round limit.
    pub fn is_open(&self) -> bool {
        !matches!(self, RoundStatus::Closed)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundStatus {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RoundStatus::Active),
            "betting_closed" => Ok(RoundStatus::BettingClosed),
            "closed" => Ok(RoundStatus::Closed),
            other => Err(GameError::InvalidInput(format!("unknown round status: {other}"))),
        }
    }
}

/// One timed cycle of the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Time-derived identifier, e.g. `WINGO_1760601600000`.
    pub round_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: RoundStatus,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} → {}",
            self.round_id,
            self.status,
            self.start_time.format("%H:%M:%S"),
            self.end_time.format("%H:%M:%S"),
        )
    }
}

impl Round {
    /// Time left until the round ends, clamped at zero.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.end_time - now).max(chrono::Duration::zero())
    }

    /// Whether the round has reached its end time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }

    /// Whether more than `margin` remains before the round ends.
    pub fn betting_window_open(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.end_time - now > margin
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Colour tag derived from the drawn value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Red,
    Green,
    Violet,
}

impl Color {
    /// 0 and 5 are violet, even values red, remaining odd values green.
    pub fn for_value(value: u8) -> Self {
        match value {
            0 | 5 => Color::Violet,
            v if v % 2 == 0 => Color::Red,
            _ => Color::Green,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Violet => "violet",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "red" => Ok(Color::Red),
            "green" => Ok(Color::Green),
            "violet" => Ok(Color::Violet),
            other => Err(GameError::InvalidInput(format!("unknown colour: {other}"))),
        }
    }
}

/// Size tag derived from the drawn value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Size {
    Big,
    Small,
}

impl Size {
    pub fn for_value(value: u8) -> Self {
        if value >= 5 {
            Size::Big
        } else {
            Size::Small
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Size::Big => "big",
            Size::Small => "small",
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Size {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "big" => Ok(Size::Big),
            "small" => Ok(Size::Small),
            other => Err(GameError::InvalidInput(format!("unknown size: {other}"))),
        }
    }
}

/// The drawn (or operator-forced) result of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub value: u8,
    pub color: Color,
    pub size: Size,
    /// True when the value came from an operator override.
    pub forced: bool,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.value, self.color, self.size)?;
        if self.forced {
            write!(f, " [forced]")?;
        }
        Ok(())
    }
}

impl Outcome {
    /// Largest value the generator can produce.
    pub const MAX_VALUE: u8 = 9;

    /// Build an outcome from a value, deriving colour and size.
    pub fn from_value(value: i64, forced: bool) -> Result<Self, GameError> {
        if !(0..=i64::from(Self::MAX_VALUE)).contains(&value) {
            return Err(GameError::InvalidInput(format!(
                "outcome value must be between 0 and {}, got {value}",
                Self::MAX_VALUE
            )));
        }
        let value = value as u8;
        Ok(Self {
            value,
            color: Color::for_value(value),
            size: Size::for_value(value),
            forced,
        })
    }
}

/// A closed round together with its recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub outcome: Outcome,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

/// The bet families a player can choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetCategory {
    Size,
    Color,
    Number,
}

impl BetCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetCategory::Size => "size",
            BetCategory::Color => "color",
            BetCategory::Number => "number",
        }
    }
}

impl fmt::Display for BetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BetCategory {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "size" | "big_small" => Ok(BetCategory::Size),
            "color" | "colour" => Ok(BetCategory::Color),
            "number" => Ok(BetCategory::Number),
            other => Err(GameError::InvalidInput(format!("unknown bet category: {other}"))),
        }
    }
}

/// A category together with the option chosen inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "option", rename_all = "snake_case")]
pub enum BetSelection {
    Size(Size),
    Color(Color),
    Number(u8),
}

impl fmt::Display for BetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category(), self.option())
    }
}

impl BetSelection {
    /// Parse a raw `(category, option)` pair as submitted by a player.
    pub fn parse(category: &str, option: &str) -> Result<Self, GameError> {
        let option = option.trim();
        match category.trim().parse::<BetCategory>()? {
            BetCategory::Size => Ok(BetSelection::Size(option.parse()?)),
            BetCategory::Color => Ok(BetSelection::Color(option.parse()?)),
            BetCategory::Number => {
                let n: u8 = option.parse().map_err(|_| {
                    GameError::InvalidInput(format!("number bet option must be 0-9, got {option}"))
                })?;
                if n > Outcome::MAX_VALUE {
                    return Err(GameError::InvalidInput(format!(
                        "number bet option must be 0-9, got {n}"
                    )));
                }
                Ok(BetSelection::Number(n))
            }
        }
    }

    pub fn category(&self) -> BetCategory {
        match self {
            BetSelection::Size(_) => BetCategory::Size,
            BetSelection::Color(_) => BetCategory::Color,
            BetSelection::Number(_) => BetCategory::Number,
        }
    }

    /// Canonical option string as persisted.
    pub fn option(&self) -> String {
        match self {
            BetSelection::Size(s) => s.as_str().to_string(),
            BetSelection::Color(c) => c.as_str().to_string(),
            BetSelection::Number(n) => n.to_string(),
        }
    }

    /// Whether this selection wins against `outcome`.
    pub fn wins(&self, outcome: &Outcome) -> bool {
        match self {
            BetSelection::Size(s) => *s == outcome.size,
            BetSelection::Color(c) => *c == outcome.color,
            BetSelection::Number(n) => *n == outcome.value,
        }
    }

    /// Payout multiplier applied to the stake of a winning wager.
    pub fn multiplier(&self) -> Decimal {
        match self {
            BetSelection::Number(_) => dec!(9),
            BetSelection::Color(Color::Violet) => dec!(4.5),
            _ => dec!(2),
        }
    }

    pub fn payout(&self, stake: Decimal) -> Decimal {
        stake * self.multiplier()
    }
}

/// Settlement status of a wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "pending",
            WagerStatus::Won => "won",
            WagerStatus::Lost => "lost",
        }
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WagerStatus {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WagerStatus::Pending),
            "won" => Ok(WagerStatus::Won),
            "lost" => Ok(WagerStatus::Lost),
            other => Err(GameError::InvalidInput(format!("unknown wager status: {other}"))),
        }
    }
}

/// A single user's stake on one selection for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wager {
    pub id: String,
    pub user_id: UserId,
    pub round_id: String,
    #[serde(flatten)]
    pub selection: BetSelection,
    pub amount: Decimal,
    pub status: WagerStatus,
    pub payout: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] user={} {} {:.2} {}",
            self.round_id, self.user_id, self.selection, self.amount, self.status,
        )?;
        if let Some(payout) = self.payout {
            write!(f, " payout={payout:.2}")?;
        }
        Ok(())
    }
}

/// A wager joined with the outcome of its round (if drawn yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WagerHistoryEntry {
    #[serde(flatten)]
    pub wager: Wager,
    pub outcome: Option<Outcome>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Kind of balance mutation recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Bet,
    Win,
    Deposit,
    Withdrawal,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Bet => "bet",
            LedgerKind::Win => "win",
            LedgerKind::Deposit => "deposit",
            LedgerKind::Withdrawal => "withdrawal",
        }
    }

    /// Whether entries of this kind increase the balance.
    pub fn is_credit(&self) -> bool {
        matches!(self, LedgerKind::Win | LedgerKind::Deposit)
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerKind {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bet" => Ok(LedgerKind::Bet),
            "win" => Ok(LedgerKind::Win),
            "deposit" => Ok(LedgerKind::Deposit),
            "withdrawal" => Ok(LedgerKind::Withdrawal),
            other => Err(GameError::InvalidInput(format!("unknown ledger kind: {other}"))),
        }
    }
}

/// Immutable audit record of one balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: UserId,
    pub kind: LedgerKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    /// Wager id for bet/win entries, external reference otherwise.
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} user={} {} {:.2} ({:.2} → {:.2})",
            self.id, self.user_id, self.kind, self.amount, self.balance_before, self.balance_after,
        )
    }
}

// ---------------------------------------------------------------------------
// Settlement & status
// ---------------------------------------------------------------------------

/// Summary of one `settle_round` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub round_id: String,
    /// The outcome as recorded for the round.
    pub outcome: Outcome,
    pub won: usize,
    pub lost: usize,
    pub total_staked: Decimal,
    pub total_payout: Decimal,
}

impl fmt::Display for SettlementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round {}: outcome={} won={} lost={} staked={:.2} paid={:.2}",
            self.round_id, self.outcome, self.won, self.lost, self.total_staked, self.total_payout,
        )
    }
}

impl SettlementReport {
    pub fn empty(round_id: &str, outcome: Outcome) -> Self {
        Self {
            round_id: round_id.to_string(),
            outcome,
            won: 0,
            lost: 0,
            total_staked: Decimal::ZERO,
            total_payout: Decimal::ZERO,
        }
    }

    /// Number of wagers moved out of pending by this call.
    pub fn settled(&self) -> usize {
        self.won + self.lost
    }

    /// Net change in player balances caused by the settled wagers
    /// (payouts minus stakes).
    pub fn player_net(&self) -> Decimal {
        self.total_payout - self.total_staked
    }
}

/// Snapshot of the currently open round, derived at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameStatus {
    pub round_id: String,
    pub status: RoundStatus,
    pub time_remaining_ms: i64,
    pub end_time: DateTime<Utc>,
}

/// Limit/offset pagination for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default = "Page::default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: Self::default_limit(),
            offset: 0,
        }
    }
}

impl Page {
    pub const MAX_LIMIT: u32 = 100;

    fn default_limit() -> u32 {
        20
    }

    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Limit clamped to `1..=MAX_LIMIT`.
    pub fn limit(&self) -> i64 {
        i64::from(self.limit.clamp(1, Self::MAX_LIMIT))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.offset)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors for WINGO. Every variant carries a stable reason code
/// (see [`GameError::code`]) and a human-readable message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bet amount must be between {min} and {max} with at most two decimal places")]
    InvalidAmount { min: Decimal, max: Decimal },

    #[error("No active game round")]
    NoOpenRound,

    #[error("Betting is closed for this round")]
    BettingClosed,

    #[error("Betting window closed")]
    BettingWindowClosed,

    #[error("Insufficient balance: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("You have already placed a bet on this option")]
    DuplicateBet,

    #[error("Wallet not found for user {0}")]
    WalletNotFound(UserId),

    #[error("Round not found: {0}")]
    RoundNotFound(String),

    #[error("Round {round_id} is not active (status: {status})")]
    RoundNotActive { round_id: String, status: RoundStatus },

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Settlement of round {round_id} failed: {message}")]
    SettlementFailure { round_id: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl GameError {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidInput(_) => "INVALID_INPUT",
            GameError::InvalidAmount { .. } => "INVALID_AMOUNT",
            GameError::NoOpenRound => "NO_OPEN_ROUND",
            GameError::BettingClosed => "BETTING_CLOSED",
            GameError::BettingWindowClosed => "BETTING_WINDOW_CLOSED",
            GameError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            GameError::DuplicateBet => "DUPLICATE_BET",
            GameError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            GameError::RoundNotFound(_) => "ROUND_NOT_FOUND",
            GameError::RoundNotActive { .. } => "ROUND_NOT_ACTIVE",
            GameError::StorageConflict(_) => "STORAGE_CONFLICT",
            GameError::SettlementFailure { .. } => "SETTLEMENT_FAILURE",
            GameError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether this is a user-facing rejection (no side effects happened)
    /// as opposed to an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            GameError::StorageConflict(_)
                | GameError::SettlementFailure { .. }
                | GameError::Storage(_)
        )
    }
}

/// SQLite primary result codes for SQLITE_BUSY / SQLITE_LOCKED and the
/// extended BUSY_SNAPSHOT code.
const SQLITE_CONTENTION_CODES: &[&str] = &["5", "6", "517"];

impl From<sqlx::Error> for GameError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return GameError::StorageConflict(db.message().to_string());
            }
            if let Some(code) = db.code() {
                if SQLITE_CONTENTION_CODES.contains(&&*code) {
                    return GameError::StorageConflict(db.message().to_string());
                }
            }
        }
        GameError::Storage(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::ApiError;
use crate::engine::{BetIntake, Scheduler};
use crate::types::{
    GameError, GameStatus, LedgerEntry, Page, RoundResult, SettlementReport, UserId, Wager,
    WagerHistoryEntry,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub intake: BetIntake,
    /// Bearer token for operator endpoints; `None` disables them.
    pub operator_token: Option<SecretString>,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Option values arrive as strings ("red") or, for number bets, as numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Text(String),
    Number(i64),
}

impl OptionValue {
    fn as_string(&self) -> String {
        match self {
            OptionValue::Text(s) => s.clone(),
            OptionValue::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetRequest {
    pub user_id: UserId,
    pub category: String,
    pub option: OptionValue,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub round_id: Option<String>,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletResponse {
    pub user_id: UserId,
    pub balance: Decimal,
    /// Most recent ledger entries, newest first.
    pub entries: Vec<LedgerEntry>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/game/current
pub async fn get_current(State(state): State<AppState>) -> Result<Json<GameStatus>, ApiError> {
    let status = state
        .scheduler
        .current_status()
        .await?
        .ok_or(GameError::NoOpenRound)?;
    Ok(Json(status))
}

/// GET /api/game/history
pub async fn get_history(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<RoundResult>>, ApiError> {
    Ok(Json(state.scheduler.store().history(page).await?))
}

/// POST /api/bets
pub async fn place_bet(
    State(state): State<AppState>,
    Json(req): Json<BetRequest>,
) -> Result<(StatusCode, Json<Wager>), ApiError> {
    let wager = state
        .intake
        .place_bet(req.user_id, &req.category, &req.option.as_string(), req.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(wager)))
}

/// GET /api/users/:user_id/bets
pub async fn get_user_bets(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<WagerHistoryEntry>>, ApiError> {
    Ok(Json(state.scheduler.store().wagers_for_user(user_id, page).await?))
}

/// GET /api/users/:user_id/wallet
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<WalletResponse>, ApiError> {
    let store = state.scheduler.store();
    let balance = store
        .balance(user_id)
        .await?
        .ok_or(GameError::WalletNotFound(user_id))?;
    let entries = store.entries(user_id, Page::default()).await?;
    Ok(Json(WalletResponse {
        user_id,
        balance,
        entries,
    }))
}

/// POST /api/admin/override
pub async fn override_outcome(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OverrideRequest>,
) -> Result<Json<SettlementReport>, ApiError> {
    authorize_operator(&state, &headers)?;
    let report = state
        .scheduler
        .force_outcome(req.round_id.as_deref(), req.value)
        .await?;
    Ok(Json(report))
}

fn authorize_operator(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state
        .operator_token
        .as_ref()
        .ok_or(ApiError::OperatorDisabled)?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;
    if !token_matches(presented, expected) {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

fn token_matches(presented: &str, expected: &SecretString) -> bool {
    presented
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! HTTP API — Axum server exposing the game to players and operators.
//!
//! Thin glue over the engine: every handler delegates to [`BetIntake`],
//! [`Scheduler`] or the [`Store`](crate::storage::Store) and maps
//! [`GameError`] to an HTTP status with a `{code, message}` body.
//! CORS enabled for browser clients.
//!
//! [`BetIntake`]: crate::engine::BetIntake
//! [`Scheduler`]: crate::engine::Scheduler

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::types::GameError;
use routes::AppState;

/// Bind `port` and serve the API in a background task until `shutdown`
/// flips to true.
pub async fn spawn_server(
    state: AppState,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        let stop = async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
            error!(error = %e, "API server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/game/current", get(routes::get_current))
        .route("/api/game/history", get(routes::get_history))
        .route("/api/bets", post(routes::place_bet))
        .route("/api/users/:user_id/bets", get(routes::get_user_bets))
        .route("/api/users/:user_id/wallet", get(routes::get_wallet))
        .route("/api/admin/override", post(routes::override_outcome))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Game(GameError),
    /// Missing or wrong operator token.
    Unauthorized,
    /// No operator token is configured, so the endpoint is disabled.
    OperatorDisabled,
}

impl From<GameError> for ApiError {
    fn from(e: GameError) -> Self {
        ApiError::Game(e)
    }
}

fn status_for(e: &GameError) -> StatusCode {
    match e {
        GameError::InvalidInput(_) | GameError::InvalidAmount { .. } => StatusCode::BAD_REQUEST,
        GameError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        GameError::NoOpenRound | GameError::WalletNotFound(_) | GameError::RoundNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        GameError::BettingClosed
        | GameError::BettingWindowClosed
        | GameError::DuplicateBet
        | GameError::RoundNotActive { .. } => StatusCode::CONFLICT,
        GameError::StorageConflict(_) => StatusCode::SERVICE_UNAVAILABLE,
        GameError::SettlementFailure { .. } | GameError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Game(e) => {
                if !e.is_rejection() {
                    error!(error = %e, "Request failed");
                }
                (status_for(&e), e.code(), e.to_string())
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Missing or invalid operator token".to_string(),
            ),
            ApiError::OperatorDisabled => (
                StatusCode::FORBIDDEN,
                "OPERATOR_DISABLED",
                "Operator override is not enabled".to_string(),
            ),
        };
        let body = Json(ErrorBody {
            code: code.to_string(),
            message,
        });
        (status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

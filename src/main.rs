//! WINGO — timed-round betting game service
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the game database, starts the round scheduler and the HTTP API,
//! and runs until Ctrl+C with graceful shutdown.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use wingo::api::{self, routes::ApiState};
use wingo::clock::{Clock, SystemClock};
use wingo::config;
use wingo::engine::{BetIntake, Scheduler};
use wingo::storage::Store;

const BANNER: &str = r#"
__        _____ _   _  ____  ___
\ \      / /_ _| \ | |/ ___|/ _ \
 \ \ /\ / / | ||  \| | |  _| | | |
  \ V  V /  | || |\  | |_| | |_| |
   \_/\_/  |___|_| \_|\____|\___/

  Timed-round colour / number game
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        game = %cfg.game.name,
        round_secs = cfg.game.round_duration_secs,
        closing_margin_secs = cfg.game.closing_margin_secs,
        min_bet = %cfg.game.min_bet,
        max_bet = %cfg.game.max_bet,
        "WINGO starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Store::connect(&cfg.database, &cfg.game.name).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match store.find_open_round().await? {
        Some(round) => info!(round = %round, "Resuming open round"),
        None => info!("No open round, one will be created on the first tick"),
    }

    let scheduler = Arc::new(Scheduler::new(store.clone(), clock.clone(), cfg.game.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = scheduler.clone().spawn(shutdown_rx.clone());

    if cfg.server.enabled {
        let operator_token = cfg.server.operator_token_env.as_deref().and_then(|env| {
            match config::AppConfig::resolve_env(env) {
                Ok(token) if !token.is_empty() => Some(SecretString::new(token)),
                _ => {
                    warn!(env, "Operator token not set, override endpoint disabled");
                    None
                }
            }
        });
        let state = Arc::new(ApiState {
            scheduler: scheduler.clone(),
            intake: BetIntake::new(store.clone(), clock.clone(), &cfg.game),
            operator_token,
        });
        tasks.push(api::spawn_server(state, cfg.server.port, shutdown_rx).await?);
    } else {
        info!("API server disabled");
    }

    // -- Run until interrupted --------------------------------------------

    info!("Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task ended abnormally");
        }
    }

    if let Some(status) = scheduler.current_status().await? {
        info!(
            round_id = %status.round_id,
            status = %status.status,
            remaining_ms = status.time_remaining_ms,
            "Round left open; it will be finished after restart"
        );
    }
    store.close().await;
    info!("WINGO shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wingo=info"));

    let json_logging = std::env::var("WINGO_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

//! Tutorial payer service: entry point.
//!
//! Runs payout passes on a fixed interval in a background task and writes
//! each pass to SQLite. Alongside, it serves a small read-only REST API over
//! the live submissions and the payout audit log.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tutorial_payer::api::{self, ApiState};
use tutorial_payer::config::Config;
use tutorial_payer::db;
use tutorial_payer::ledger::rpc::RpcLedger;
use tutorial_payer::payer::{Payer, PayerSettings};
use tutorial_payer::registry::JsonFileRegistry;
use tutorial_payer::scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    info!("Network: {}", config.network);

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    let registry = JsonFileRegistry::new(&config.vars_path);
    let ledger = Arc::new(RpcLedger::connect(&config, &registry, config.signer_key.clone()).await?);

    // ─── Background payer ─────────────────────────────────
    let shutdown = CancellationToken::new();
    let payer = Payer::new(ledger.clone(), PayerSettings::from_config(&config));
    let scheduler = tokio::spawn(scheduler::run(
        payer,
        Duration::from_secs(config.poll_interval_secs),
        pool.clone(),
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(ApiState { pool, ledger });

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            stop.cancel();
        })
        .await?;

    shutdown.cancel();
    scheduler.await?;
    Ok(())
}

//! One payout pass over the current submissions, recorded in the audit log.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tutorial_payer::config::Config;
use tutorial_payer::db;
use tutorial_payer::ledger::rpc::RpcLedger;
use tutorial_payer::payer::{Payer, PayerSettings};
use tutorial_payer::registry::JsonFileRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    let registry = JsonFileRegistry::new(&config.vars_path);
    let ledger = RpcLedger::connect(&config, &registry, config.signer_key.clone()).await?;
    let pool = db::init_pool(&config.database_url).await?;

    let payer = Payer::new(Arc::new(ledger), PayerSettings::from_config(&config));
    let report = match payer.run_pass().await {
        Ok(report) => report,
        Err(e) => {
            // Transfers that went out before the abort still belong in the log.
            if let Some(partial) = e.partial_report() {
                db::record_pass(&pool, partial).await?;
            }
            return Err(e.into());
        }
    };
    let recorded = db::record_pass(&pool, &report).await?;

    info!(
        "Paid {} of {} submissions ({} rolled back, {recorded} attempts recorded)",
        report.paid(),
        report.fetched,
        report.rolled_back()
    );
    Ok(())
}

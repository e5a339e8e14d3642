//! One reviewer pass: every PENDING submission becomes VALID or INVALID.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tutorial_payer::config::Config;
use tutorial_payer::ledger::rpc::RpcLedger;
use tutorial_payer::registry::JsonFileRegistry;
use tutorial_payer::review::{Reviewer, Verdict};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    let registry = JsonFileRegistry::new(&config.vars_path);
    let ledger = Arc::new(RpcLedger::connect(&config, &registry, config.signer_key.clone()).await?);

    let report = Reviewer::new(ledger.clone(), ledger).run_pass().await?;
    info!(
        "Reviewed {} pending submissions: {} valid, {} invalid",
        report.verdicts.len(),
        report.count(&Verdict::Valid),
        report.count(&Verdict::Invalid)
    );
    Ok(())
}

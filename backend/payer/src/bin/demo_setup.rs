//! Bootstrap a demo: mint the recipient an NFT, add the tutorial category,
//! fund the payout pool and send the recipient some ETH.

use tracing::info;
use tracing_subscriber::EnvFilter;

use tutorial_payer::config::Config;
use tutorial_payer::demo;
use tutorial_payer::ledger::rpc::RpcLedger;
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

    let payout_address = ledger.contracts().payout.clone();
    let report = demo::run_setup(&ledger, &config.demo, &payout_address).await?;
    info!("Demo setup finished: {report:?}");
    Ok(())
}

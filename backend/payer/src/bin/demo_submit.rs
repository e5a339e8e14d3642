//! Submit the demo tutorial as the user identity.

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
    let user_key = config.require_user_key()?.clone();
    let registry = JsonFileRegistry::new(&config.vars_path);
    let ledger = RpcLedger::connect(&config, &registry, user_key).await?;

    demo::submit_demo_tutorial(&ledger, &registry, config.network.as_str(), &config.demo).await?;
    Ok(())
}

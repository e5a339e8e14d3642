//! One-shot bootstrap steps for local demos and fresh deployments.
//!
//! Every step tolerates "already done" failures: they are logged and the
//! script moves on. Any other ledger error stops the script.

use std::future::Future;

use tracing::info;

use crate::config::DemoConfig;
use crate::errors::{PayerError, Result};
use crate::ledger::{LedgerClient, LedgerResult};
use crate::registry::ContractRegistry;
use crate::types::Submission;

const WEI_DECIMALS: usize = 18;

/// Parse a decimal ETH amount ("0.1", "100") into wei.
pub fn parse_ether(amount: &str) -> Result<u128> {
    let invalid = || PayerError::Config(format!("Invalid ETH amount: {amount}"));

    let (whole, fraction) = amount.trim().split_once('.').unwrap_or((amount.trim(), ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > WEI_DECIMALS
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let fraction: u128 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<width$}", width = WEI_DECIMALS)
            .parse()
            .map_err(|_| invalid())?
    };

    whole
        .checked_mul(10u128.pow(WEI_DECIMALS as u32))
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(invalid)
}

/// Run one step, downgrading "already satisfied" errors to a log line.
async fn tolerate<T, F>(step: &str, fut: F) -> Result<Option<T>>
where
    F: Future<Output = LedgerResult<T>>,
{
    match fut.await {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_already_satisfied() => {
            info!("{step}: already done ({})", e.message());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn mint_for(ledger: &dyn LedgerClient, address: &str) -> Result<Option<u64>> {
    let token_id = tolerate("Mint NFT", ledger.mint(address)).await?;
    if let Some(id) = token_id {
        info!("Minted NFT with ID: {id}");
    }
    Ok(token_id)
}

pub async fn seed_category(ledger: &dyn LedgerClient, name: &str) -> Result<bool> {
    let added = tolerate("Add tutorial category", ledger.add_tutorial_category(name))
        .await?
        .is_some();
    if added {
        info!("Added tutorial category {name}");
    }
    Ok(added)
}

/// Send `amount` ETH to the payout contract.
pub async fn fund_pool(ledger: &dyn LedgerClient, payout_address: &str, amount: &str) -> Result<bool> {
    let wei = parse_ether(amount)?;
    let sent = tolerate("Fund payout pool", ledger.send_value(payout_address, wei))
        .await?
        .is_some();
    if sent {
        info!("Sent {amount} ETH to the payout contract");
    }
    Ok(sent)
}

pub async fn send_funds(ledger: &dyn LedgerClient, to: &str, amount: &str) -> Result<bool> {
    let wei = parse_ether(amount)?;
    let sent = tolerate("Send funds", ledger.send_value(to, wei))
        .await?
        .is_some();
    if sent {
        info!("Sent {amount} ETH to {to}");
    }
    Ok(sent)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub token_id: Option<u64>,
    pub category_added: bool,
    pub pool_funded: bool,
    pub funds_sent: bool,
}

/// Mint the recipient an NFT, seed the demo category, fund the payout pool
/// and send the recipient some ETH.
pub async fn run_setup(
    ledger: &dyn LedgerClient,
    demo: &DemoConfig,
    payout_address: &str,
) -> Result<SetupReport> {
    let recipient = demo.recipient.as_deref().ok_or_else(|| {
        PayerError::Config("NFT_RECIPIENT_ADDRESS is required for demo setup".into())
    })?;

    Ok(SetupReport {
        token_id: mint_for(ledger, recipient).await?,
        category_added: seed_category(ledger, &demo.category).await?,
        pool_funded: fund_pool(ledger, payout_address, &demo.fund_pool_eth).await?,
        funds_sent: send_funds(ledger, recipient, &demo.send_funds_eth).await?,
    })
}

/// Submit the demo tutorial as the user. The proof address is the contract
/// registered under the category name.
pub async fn submit_demo_tutorial(
    ledger: &dyn LedgerClient,
    registry: &dyn ContractRegistry,
    network: &str,
    demo: &DemoConfig,
) -> Result<Option<Submission>> {
    let artifact = registry.get(network, &demo.category).await?;
    let submission = tolerate(
        "Submit tutorial",
        ledger.submit_tutorial(demo.user_nft_id, &artifact.address, &demo.category),
    )
    .await?;
    if submission.is_some() {
        info!(
            "Submitted tutorial {} for POAP NFT {}",
            demo.category, demo.user_nft_id
        );
    }
    Ok(submission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::ledger::{LedgerError, LedgerErrorKind};
    use crate::registry::MemoryRegistry;
    use crate::types::{CategoryStatus, SubmissionStatus};

    const OWNER: &str = "0xowner";
    const USER: &str = "0xuser";
    const ETH: u128 = 1_000_000_000_000_000_000;

    fn demo(recipient: Option<&str>) -> DemoConfig {
        DemoConfig {
            recipient: recipient.map(str::to_string),
            category: "PoapMultiplier".into(),
            user_nft_id: 1,
            fund_pool_eth: "0.1".into(),
            send_funds_eth: "2".into(),
        }
    }

    #[test]
    fn parses_ether_amounts() {
        assert_eq!(parse_ether("1").unwrap(), ETH);
        assert_eq!(parse_ether("0.1").unwrap(), ETH / 10);
        assert_eq!(parse_ether("100").unwrap(), 100 * ETH);
        assert_eq!(parse_ether(".5").unwrap(), ETH / 2);
        assert_eq!(parse_ether("0.000000000000000001").unwrap(), 1);
        assert!(parse_ether("").is_err());
        assert!(parse_ether("1.2.3").is_err());
        assert!(parse_ether("-1").is_err());
        assert!(parse_ether("0.0000000000000000001").is_err());
    }

    #[tokio::test]
    async fn setup_mints_seeds_and_funds() {
        let ledger = InMemoryLedger::new(OWNER);
        ledger.credit(OWNER, 10 * ETH).await;

        let report = run_setup(&ledger, &demo(Some(USER)), ledger.payout_address())
            .await
            .unwrap();

        assert_eq!(report.token_id, Some(1));
        assert!(report.category_added && report.pool_funded && report.funds_sent);
        assert_eq!(ledger.owner_of(1).await.as_deref(), Some(USER));
        assert_eq!(
            ledger.category_status("PoapMultiplier").await.unwrap(),
            CategoryStatus::Active
        );
        assert_eq!(ledger.balance_of(ledger.payout_address()).await, ETH / 10);
        assert_eq!(ledger.balance_of(USER).await, 2 * ETH);
    }

    #[tokio::test]
    async fn setup_requires_a_recipient() {
        let ledger = InMemoryLedger::new(OWNER);
        let err = run_setup(&ledger, &demo(None), ledger.payout_address())
            .await
            .unwrap_err();
        assert!(matches!(err, PayerError::Config(_)));
    }

    #[tokio::test]
    async fn other_ledger_errors_are_fatal() {
        let ledger = InMemoryLedger::new(OWNER);
        // No funds to send.
        let err = run_setup(&ledger, &demo(Some(USER)), ledger.payout_address())
            .await
            .unwrap_err();
        match err {
            PayerError::Ledger(e) => assert_eq!(e.kind(), LedgerErrorKind::InsufficientFunds),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn already_satisfied_errors_are_tolerated() {
        let skipped = tolerate("Mint NFT", async {
            Err::<u64, _>(LedgerError::AlreadyExists("ERC721: token already minted".into()))
        })
        .await
        .unwrap();
        assert_eq!(skipped, None);

        let err = tolerate("Mint NFT", async {
            Err::<u64, _>(LedgerError::Unauthorized("Only the owner can call this function".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PayerError::Ledger(_)));
    }

    #[tokio::test]
    async fn demo_submission_uses_registered_artifact_and_tolerates_repeats() {
        let ledger = InMemoryLedger::new(OWNER);
        let user = ledger.connect(USER);
        let registry = MemoryRegistry::new();
        registry
            .upsert("test", "PoapMultiplier", "0xartifact")
            .await
            .unwrap();

        let created = submit_demo_tutorial(&user, &registry, "test", &demo(None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.deployed_testnet_address, "0xartifact");
        assert_eq!(created.status, SubmissionStatus::Pending);

        let again = submit_demo_tutorial(&user, &registry, "test", &demo(None))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(ledger.view_submissions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn demo_submission_needs_a_registered_artifact() {
        let ledger = InMemoryLedger::new(OWNER);
        let registry = MemoryRegistry::new();
        let err = submit_demo_tutorial(&ledger, &registry, "test", &demo(None))
            .await
            .unwrap_err();
        assert!(matches!(err, PayerError::ContractNotFound { .. }));
    }
}

//! Background task that runs a payout pass on a fixed interval and writes
//! each report to the audit log.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db;
use crate::errors::PayerError;
use crate::payer::Payer;

/// Run passes until `shutdown` is cancelled. The first pass starts
/// immediately. Pass errors are logged and the loop keeps going.
pub async fn run(payer: Payer, interval: Duration, pool: SqlitePool, shutdown: CancellationToken) {
    info!("Payout scheduler starting, interval {interval:?}");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Payout scheduler stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        match payer.run_pass().await {
            Ok(report) => {
                if let Err(e) = db::record_pass(&pool, &report).await {
                    error!("Failed to record payout pass: {e}");
                }
            }
            Err(PayerError::PassInProgress) => {
                warn!("Previous payout pass still running, skipping tick");
            }
            Err(e) => {
                if let Some(report) = e.partial_report() {
                    if let Err(db_err) = db::record_pass(&pool, report).await {
                        error!("Failed to record aborted payout pass: {db_err}");
                    }
                }
                error!("Payout pass failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::ledger::LedgerClient;
    use crate::payer::PayerSettings;
    use crate::types::SubmissionStatus;

    const OWNER: &str = "0xowner";
    const ETH: u128 = 1_000_000_000_000_000_000;

    #[tokio::test]
    async fn pays_on_first_tick_records_and_stops_on_cancel() {
        let ledger = InMemoryLedger::new(OWNER);
        ledger.credit(ledger.payout_address(), ETH).await;
        let nft = ledger.mint("0xuser").await.unwrap();
        ledger.add_tutorial_category("PoapMultiplier").await.unwrap();
        ledger
            .connect("0xuser")
            .submit_tutorial(nft, "0xartifact", "PoapMultiplier")
            .await
            .unwrap();
        ledger
            .update_submission_status(nft, "PoapMultiplier", &SubmissionStatus::Valid)
            .await
            .unwrap();

        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        let payer = Payer::new(Arc::new(ledger.clone()), PayerSettings::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(
            payer,
            Duration::from_secs(3600),
            pool.clone(),
            shutdown.clone(),
        ));

        // The first tick fires immediately; wait for its record to land.
        for _ in 0..100 {
            if !db::get_all_attempts(&pool).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        let attempts = db::get_all_attempts(&pool).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, "paid");
        assert_eq!(ledger.payout_count().await, 1);
    }
}

//! Payout pass: pays every approved submission once and rolls the status
//! back when the transfer fails.
//!
//! For each approved submission, in fetch order and one at a time:
//!
//! 1. mark it `PAID` so a concurrent scan skips it,
//! 2. call `payout`, retrying transient failures with back-off,
//! 3. on a final failure write `VALID` back and move on.
//!
//! A failure in step 1 or in the rollback of step 3 aborts the pass with
//! [`PayerError::PassAborted`], which still carries the attempts settled so
//! far. Passes
//! are serialised per [`Payer`]; a second concurrent call returns
//! [`PayerError::PassInProgress`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::{PayerError, Result};
use crate::ledger::{LedgerClient, LedgerError, LedgerResult};
use crate::policy;
use crate::types::{Submission, SubmissionKey, SubmissionStatus, TxReceipt};

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct PayerSettings {
    /// Upper bound on one `payout` call, confirmation included.
    pub payout_timeout: Duration,
    /// Total `payout` attempts per submission when failures are transient.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PayerSettings {
    fn default() -> Self {
        Self {
            payout_timeout: Duration::from_secs(120),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
        }
    }
}

impl PayerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            payout_timeout: config.payout_timeout(),
            max_attempts: config.payout_max_attempts.max(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Paid { tx_hash: String },
    RolledBack { error: LedgerError },
}

impl PayoutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid { .. } => "paid",
            Self::RolledBack { .. } => "rolled_back",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayoutAttempt {
    pub key: SubmissionKey,
    pub outcome: PayoutOutcome,
    /// `payout` calls made, retries included.
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    /// Submissions returned by the fetch.
    pub fetched: usize,
    pub attempts: Vec<PayoutAttempt>,
}

impl PassReport {
    pub fn paid(&self) -> usize {
        self.count(|o| matches!(o, PayoutOutcome::Paid { .. }))
    }

    pub fn rolled_back(&self) -> usize {
        self.count(|o| matches!(o, PayoutOutcome::RolledBack { .. }))
    }

    fn count(&self, pred: impl Fn(&PayoutOutcome) -> bool) -> usize {
        self.attempts.iter().filter(|a| pred(&a.outcome)).count()
    }
}

/// Drives payout passes against one ledger identity.
#[derive(Clone)]
pub struct Payer {
    ledger: Arc<dyn LedgerClient>,
    settings: PayerSettings,
    running: Arc<Mutex<()>>,
}

impl Payer {
    pub fn new(ledger: Arc<dyn LedgerClient>, settings: PayerSettings) -> Self {
        Self {
            ledger,
            settings,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Run one batch pass over all submissions.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| PayerError::PassInProgress)?;

        let started_at = Utc::now();
        let submissions = self.ledger.view_submissions().await?;
        let candidates = policy::payable(&submissions);
        info!(
            "Found {} valid submissions out of {}",
            candidates.len(),
            submissions.len()
        );

        let mut report = PassReport {
            started_at,
            fetched: submissions.len(),
            attempts: Vec::with_capacity(candidates.len()),
        };
        for submission in candidates {
            match self.settle(submission).await {
                Ok(attempt) => report.attempts.push(attempt),
                Err(source) => {
                    return Err(PayerError::PassAborted {
                        report: Box::new(report),
                        source: Box::new(source),
                    })
                }
            }
        }

        info!(
            "Payout pass finished: {} paid, {} rolled back",
            report.paid(),
            report.rolled_back()
        );
        Ok(report)
    }

    async fn settle(&self, submission: &Submission) -> Result<PayoutAttempt> {
        let key = submission.key();

        self.ledger
            .update_submission_status(key.poap_nft_id, &key.tutorial_name, &SubmissionStatus::Paid)
            .await
            .map_err(|source| PayerError::MarkPaid {
                key: key.clone(),
                source,
            })?;
        info!("Updated status for {key} to PAID");

        let (result, attempts) = self.pay_with_retry(&key).await;
        let outcome = match result {
            Ok(receipt) => {
                info!("Paid {key} in {}", receipt.tx_hash);
                PayoutOutcome::Paid {
                    tx_hash: receipt.tx_hash,
                }
            }
            Err(error) => {
                warn!("Error paying {key}: {error}");
                if let Err(source) = self
                    .ledger
                    .update_submission_status(
                        key.poap_nft_id,
                        &key.tutorial_name,
                        &SubmissionStatus::Valid,
                    )
                    .await
                {
                    return Err(PayerError::CompensationFailed {
                        key,
                        payout_error: error,
                        source,
                    });
                }
                info!("Updated status for {key} to VALID");
                PayoutOutcome::RolledBack { error }
            }
        };

        Ok(PayoutAttempt {
            key,
            outcome,
            attempts,
        })
    }

    async fn pay_with_retry(&self, key: &SubmissionKey) -> (LedgerResult<TxReceipt>, u32) {
        let mut backoff = self.settings.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.settings.payout_timeout,
                self.ledger.payout(key.poap_nft_id, &key.tutorial_name),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LedgerError::Timeout(format!(
                    "payout for {key} not confirmed within {:?}",
                    self.settings.payout_timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    warn!("Payout for {key} failed ({e}), retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                }
                other => return (other, attempt),
            }
        }
    }
}

//! Reviewer pass: checks each PENDING submission against the contract it
//! points at and records the verdict as VALID or INVALID.

use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::Result;
use crate::ledger::{ArtifactVerifier, LedgerClient, LedgerError};
use crate::types::{SubmissionKey, SubmissionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
    /// Verification or the status write failed; the submission stays PENDING.
    Skipped { error: LedgerError },
}

#[derive(Debug, Clone)]
pub struct ReviewReport {
    pub fetched: usize,
    pub verdicts: Vec<(SubmissionKey, Verdict)>,
}

impl ReviewReport {
    pub fn count(&self, verdict: &Verdict) -> usize {
        self.verdicts
            .iter()
            .filter(|(_, v)| std::mem::discriminant(v) == std::mem::discriminant(verdict))
            .count()
    }
}

pub struct Reviewer {
    ledger: Arc<dyn LedgerClient>,
    verifier: Arc<dyn ArtifactVerifier>,
}

impl Reviewer {
    pub fn new(ledger: Arc<dyn LedgerClient>, verifier: Arc<dyn ArtifactVerifier>) -> Self {
        Self { ledger, verifier }
    }

    /// Review every PENDING submission once. Only a failed fetch is fatal.
    pub async fn run_pass(&self) -> Result<ReviewReport> {
        let submissions = self.ledger.view_submissions().await?;
        let pending: Vec<_> = submissions
            .iter()
            .filter(|s| s.status == SubmissionStatus::Pending)
            .collect();
        info!(
            "Found {} pending submissions out of {}",
            pending.len(),
            submissions.len()
        );

        let mut verdicts = Vec::with_capacity(pending.len());
        for submission in pending {
            let key = submission.key();
            info!("Testing submission {key}...");

            let verdict = match self.verifier.verify(submission).await {
                Ok(passed) => {
                    let status = if passed {
                        SubmissionStatus::Valid
                    } else {
                        SubmissionStatus::Invalid
                    };
                    match self
                        .ledger
                        .update_submission_status(key.poap_nft_id, &key.tutorial_name, &status)
                        .await
                    {
                        Ok(_) => {
                            info!("Submission {key} is {status}");
                            if passed {
                                Verdict::Valid
                            } else {
                                Verdict::Invalid
                            }
                        }
                        Err(error) => {
                            warn!("Could not record {status} for {key}: {error}");
                            Verdict::Skipped { error }
                        }
                    }
                }
                Err(error) => {
                    warn!("Could not test {key}: {error}");
                    Verdict::Skipped { error }
                }
            };
            verdicts.push((key, verdict));
        }

        Ok(ReviewReport {
            fetched: submissions.len(),
            verdicts,
        })
    }
}

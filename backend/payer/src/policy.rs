//! Payout eligibility rules.
//!
//! The payout contract re-checks the category and the payout record on every
//! call, so the payer's local filter ([`payable`]) only narrows the batch.

use serde::Serialize;

use crate::ledger::{reasons, LedgerError};
use crate::types::{CategoryStatus, Submission, SubmissionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    NotApproved,
    CategoryInactive,
    AlreadyPaid,
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        self == Self::Eligible
    }
}

/// Full eligibility of a submission for disbursement.
pub fn evaluate(submission: &Submission, category: CategoryStatus, already_paid: bool) -> Eligibility {
    if !submission.status.is_approved() {
        return Eligibility::NotApproved;
    }
    match payout_gate(category, already_paid) {
        Ok(()) => Eligibility::Eligible,
        Err(LedgerError::AlreadyPaid(_)) => Eligibility::AlreadyPaid,
        Err(_) => Eligibility::CategoryInactive,
    }
}

/// The checks the payout contract applies to `(nft_id, category)`.
pub fn payout_gate(category: CategoryStatus, already_paid: bool) -> Result<(), LedgerError> {
    if !category.is_active() {
        return Err(LedgerError::CategoryInactive(
            reasons::CATEGORY_INACTIVE.to_string(),
        ));
    }
    if already_paid {
        return Err(LedgerError::AlreadyPaid(reasons::ALREADY_PAID.to_string()));
    }
    Ok(())
}

/// Submissions in the approved set, in fetch order.
pub fn payable(submissions: &[Submission]) -> Vec<&Submission> {
    submissions
        .iter()
        .filter(|s| is_payable_status(&s.status))
        .collect()
}

pub fn is_payable_status(status: &SubmissionStatus) -> bool {
    status.is_approved()
}

//! Application-wide error types.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::payer::PassReport;
use crate::types::SubmissionKey;

#[derive(Debug, Error)]
pub enum PayerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Contract {name} not found in deployed contracts for network {network}")]
    ContractNotFound { network: String, name: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Failed to mark {key} as PAID: {source}")]
    MarkPaid {
        key: SubmissionKey,
        #[source]
        source: LedgerError,
    },

    #[error("Failed to roll back {key} after payout error ({payout_error}): {source}")]
    CompensationFailed {
        key: SubmissionKey,
        payout_error: LedgerError,
        #[source]
        source: LedgerError,
    },

    #[error("Another payout pass is already running")]
    PassInProgress,

    /// A pass stopped early. `report` holds the attempts settled before the
    /// failure, transfers included.
    #[error("Payout pass aborted after {} attempts: {source}", .report.attempts.len())]
    PassAborted {
        report: Box<PassReport>,
        #[source]
        source: Box<PayerError>,
    },

    #[error("NFT id {0} is out of range for the audit log")]
    NftIdOutOfRange(u64),
}

impl PayerError {
    /// Attempts a failed pass settled before stopping.
    pub fn partial_report(&self) -> Option<&PassReport> {
        match self {
            Self::PassAborted { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }

    /// The failure underneath a [`PayerError::PassAborted`], or `self`.
    pub fn cause(&self) -> &PayerError {
        match self {
            Self::PassAborted { source, .. } => source.as_ref(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PayerError>;

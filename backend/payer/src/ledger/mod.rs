//! Ledger client boundary.
//!
//! Every read and write against the tutorial-submission registry, the payout
//! contract and the POAP NFT goes through [`LedgerClient`]. Writes resolve only
//! once the transaction is confirmed.
//!
//! Two implementations live here:
//!
//! * [`rpc::RpcLedger`] talks JSON-RPC to a signing relay in front of the chain.
//! * [`memory::InMemoryLedger`] re-derives the contract rules in process, for
//!   tests and local demos.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::types::{CategoryStatus, Submission, SubmissionStatus, TxReceipt};

pub mod memory;
pub mod rpc;

/// Revert reasons emitted by the contracts.
pub mod reasons {
    pub const DUPLICATE_SUBMISSION: &str = "Tutorial already submitted";
    pub const NOT_AUTHORIZED: &str = "Not authorized to call this function";
    pub const ONLY_OWNER: &str = "Only the owner can call this function";
    pub const ALREADY_PAID: &str = "Payout already made for this NFT ID and tutorial combination";
    pub const CATEGORY_INACTIVE: &str = "Tutorial category not found or inactive";
    pub const SUBMISSION_NOT_FOUND: &str = "Submission not found";
    pub const TOKEN_NOT_FOUND: &str = "Token does not exist";
    pub const INSUFFICIENT_BALANCE: &str = "Insufficient balance";
}

/// Structured failure of a ledger call. The original message is kept as the
/// payload of every variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("duplicate submission: {0}")]
    DuplicateSubmission(String),

    #[error("already paid: {0}")]
    AlreadyPaid(String),

    #[error("category inactive: {0}")]
    CategoryInactive(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerErrorKind {
    Unauthorized,
    DuplicateSubmission,
    AlreadyPaid,
    CategoryInactive,
    NotFound,
    AlreadyExists,
    InsufficientFunds,
    Reverted,
    Transient,
    Timeout,
    Protocol,
}

impl LedgerErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::DuplicateSubmission => "duplicate_submission",
            Self::AlreadyPaid => "already_paid",
            Self::CategoryInactive => "category_inactive",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::InsufficientFunds => "insufficient_funds",
            Self::Reverted => "reverted",
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
        }
    }
}

impl LedgerError {
    /// Classify a revert reason (or a node error message wrapping one).
    pub fn from_revert(message: impl Into<String>) -> Self {
        let message = message.into();
        let m = message.as_str();
        if m.contains(reasons::DUPLICATE_SUBMISSION) {
            Self::DuplicateSubmission(message)
        } else if m.contains(reasons::NOT_AUTHORIZED) || m.contains(reasons::ONLY_OWNER) {
            Self::Unauthorized(message)
        } else if m.contains(reasons::ALREADY_PAID) {
            Self::AlreadyPaid(message)
        } else if m.contains(reasons::CATEGORY_INACTIVE) {
            Self::CategoryInactive(message)
        } else if m.contains(reasons::SUBMISSION_NOT_FOUND) || m.contains(reasons::TOKEN_NOT_FOUND)
        {
            Self::NotFound(message)
        } else if m.contains(reasons::INSUFFICIENT_BALANCE) {
            Self::InsufficientFunds(message)
        } else if m.contains("already minted") || m.contains("already exists") {
            Self::AlreadyExists(message)
        } else {
            Self::Reverted(message)
        }
    }

    pub fn kind(&self) -> LedgerErrorKind {
        match self {
            Self::Unauthorized(_) => LedgerErrorKind::Unauthorized,
            Self::DuplicateSubmission(_) => LedgerErrorKind::DuplicateSubmission,
            Self::AlreadyPaid(_) => LedgerErrorKind::AlreadyPaid,
            Self::CategoryInactive(_) => LedgerErrorKind::CategoryInactive,
            Self::NotFound(_) => LedgerErrorKind::NotFound,
            Self::AlreadyExists(_) => LedgerErrorKind::AlreadyExists,
            Self::InsufficientFunds(_) => LedgerErrorKind::InsufficientFunds,
            Self::Reverted(_) => LedgerErrorKind::Reverted,
            Self::Transient(_) => LedgerErrorKind::Transient,
            Self::Timeout(_) => LedgerErrorKind::Timeout,
            Self::Protocol(_) => LedgerErrorKind::Protocol,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized(m)
            | Self::DuplicateSubmission(m)
            | Self::AlreadyPaid(m)
            | Self::CategoryInactive(m)
            | Self::NotFound(m)
            | Self::AlreadyExists(m)
            | Self::InsufficientFunds(m)
            | Self::Reverted(m)
            | Self::Transient(m)
            | Self::Timeout(m)
            | Self::Protocol(m) => m,
        }
    }

    /// Network-level failures worth retrying. A timeout is not: the
    /// transaction may still land.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Failures meaning the requested state is already in place.
    pub fn is_already_satisfied(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSubmission(_) | Self::AlreadyPaid(_) | Self::AlreadyExists(_)
        )
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Read/write access to the external contract state, bound to one signing
/// identity.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Create a PENDING submission for `(nft_id, tutorial_name)`.
    async fn submit_tutorial(
        &self,
        nft_id: u64,
        testnet_address: &str,
        tutorial_name: &str,
    ) -> LedgerResult<Submission>;

    /// All submissions in insertion order.
    async fn view_submissions(&self) -> LedgerResult<Vec<Submission>>;

    /// Privileged. Does not check transition legality.
    async fn update_submission_status(
        &self,
        nft_id: u64,
        tutorial_name: &str,
        status: &SubmissionStatus,
    ) -> LedgerResult<TxReceipt>;

    /// Privileged. Transfers the payout amount to the holder of `nft_id`.
    async fn payout(&self, nft_id: u64, category: &str) -> LedgerResult<TxReceipt>;

    /// Whether a payout for `(nft_id, category)` has already been made.
    async fn payout_made(&self, nft_id: u64, category: &str) -> LedgerResult<bool>;

    async fn add_tutorial_category(&self, name: &str) -> LedgerResult<TxReceipt>;

    async fn remove_tutorial_category(&self, name: &str) -> LedgerResult<TxReceipt>;

    async fn category_status(&self, name: &str) -> LedgerResult<CategoryStatus>;

    /// Privileged. Returns the new token id.
    async fn mint(&self, to: &str) -> LedgerResult<u64>;

    /// Native value transfer from the signing identity.
    async fn send_value(&self, to: &str, amount_wei: u128) -> LedgerResult<TxReceipt>;
}

/// Checks the contract a submitter deployed as proof of work.
#[async_trait]
pub trait ArtifactVerifier: Send + Sync {
    async fn verify(&self, submission: &Submission) -> LedgerResult<bool>;
}

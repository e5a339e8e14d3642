//! # Types
//!
//! Shared data structures mirroring the records kept by the submission
//! registry and the payout contract.
//!
//! ## Submission lifecycle
//!
//! ```text
//! Pending ──► Approved | Valid ──► Paid
//!     └──► Invalid          ▲        │
//!                           └────────┘  (compensation after a failed payout)
//! ```
//!
//! The registry stores the status as a free-form string and does not enforce
//! any of these edges itself; [`SubmissionStatus::can_transition_to`] is the
//! model the reviewer and the payer follow.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a tutorial submission.
///
/// `Approved` and `Valid` are both written by different historical callers
/// and both belong to the approved set. `Valid` is the canonical tag this
/// crate writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubmissionStatus {
    /// Submitted by the user, awaiting review.
    Pending,
    /// Approved by a privileged actor (legacy tag).
    Approved,
    /// Approved by a privileged actor or by the reviewer.
    Valid,
    /// Rejected by the reviewer.
    Invalid,
    /// Marked paid by the payer.
    Paid,
    /// A tag this crate does not recognise.
    Other(String),
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
            Self::Paid => "PAID",
            Self::Other(tag) => tag,
        }
    }

    /// `true` for the statuses the payer treats as ready for payout.
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved | Self::Valid)
    }

    /// Modelled transitions, including the `Paid -> Valid` compensation edge.
    pub fn can_transition_to(&self, next: &SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Valid)
                | (Self::Pending, Self::Invalid)
                | (Self::Approved, Self::Paid)
                | (Self::Valid, Self::Paid)
                | (Self::Paid, Self::Valid)
        )
    }
}

impl From<String> for SubmissionStatus {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "PENDING" => Self::Pending,
            "APPROVED" => Self::Approved,
            "VALID" => Self::Valid,
            "INVALID" => Self::Invalid,
            "PAID" => Self::Paid,
            _ => Self::Other(tag),
        }
    }
}

impl From<SubmissionStatus> for String {
    fn from(status: SubmissionStatus) -> Self {
        match status {
            SubmissionStatus::Other(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tutorial submission as returned by `viewSubmissions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// POAP credential token owned by the submitter.
    pub poap_nft_id: u64,
    /// Address of the contract the submitter deployed as proof of work.
    pub deployed_testnet_address: String,
    /// Tutorial category the submission belongs to.
    pub tutorial_name: String,
    pub status: SubmissionStatus,
}

impl Submission {
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(self.poap_nft_id, &self.tutorial_name)
    }
}

/// Unique key of a submission and of its payout record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionKey {
    pub poap_nft_id: u64,
    pub tutorial_name: String,
}

impl SubmissionKey {
    pub fn new(poap_nft_id: u64, tutorial_name: &str) -> Self {
        Self {
            poap_nft_id,
            tutorial_name: tutorial_name.to_string(),
        }
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NFT #{} / {}", self.poap_nft_id, self.tutorial_name)
    }
}

/// Status of a tutorial category in the payout contract.
///
/// Encoded on the wire as the contract's enum ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CategoryStatus {
    /// Never added.
    #[default]
    Unknown,
    Active,
    /// Removed; categories are never deleted.
    Inactive,
}

impl CategoryStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Active => 1,
            Self::Inactive => 2,
        }
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

impl TryFrom<u8> for CategoryStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Active),
            2 => Ok(Self::Inactive),
            other => Err(format!("invalid category status code {other}")),
        }
    }
}

impl From<CategoryStatus> for u8 {
    fn from(status: CategoryStatus) -> Self {
        status.code()
    }
}

/// Confirmation of a write that reached finality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
}

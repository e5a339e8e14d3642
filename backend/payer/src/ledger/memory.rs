//! In-process ledger simulation.
//!
//! Re-derives the rules of the three contracts the payer drives:
//!
//! | Contract             | State kept here                               |
//! |----------------------|-----------------------------------------------|
//! | `TutorialSubmission` | submissions in insertion order                |
//! | `Payout`             | category statuses, payout records, pool funds |
//! | `PoapNFT`            | token owners, next token id                   |
//!
//! Native balances are tracked per address. One deployer address owns every
//! contract and is the only privileged identity. Handles returned by
//! [`InMemoryLedger::connect`] share state and differ only in the caller.
//!
//! Faults can be injected per operation to exercise retry and compensation
//! paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{reasons, ArtifactVerifier, LedgerClient, LedgerError, LedgerResult};
use crate::policy;
use crate::types::{CategoryStatus, Submission, SubmissionStatus, TxReceipt};

/// Address the simulated payout contract holds its pool under.
pub const PAYOUT_CONTRACT_ADDRESS: &str = "0x00000000000000000000000000000000000000b0";

/// 0.001 ETH.
pub const DEFAULT_PAYOUT_AMOUNT_WEI: u128 = 1_000_000_000_000_000;

#[derive(Debug, Clone)]
pub struct LedgerRules {
    /// Amount transferred by a successful `payout`.
    pub payout_amount_wei: u128,
    /// Reject `submit_tutorial` unless the caller holds the NFT.
    pub require_nft_ownership: bool,
}

impl Default for LedgerRules {
    fn default() -> Self {
        Self {
            payout_amount_wei: DEFAULT_PAYOUT_AMOUNT_WEI,
            require_nft_ownership: false,
        }
    }
}

/// Operation a [`Fault`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    SubmitTutorial,
    ViewSubmissions,
    UpdateStatus,
    Payout,
    Mint,
    SendValue,
}

/// An injected failure or delay.
#[derive(Debug, Clone)]
pub struct Fault {
    op: LedgerOp,
    nft_id: Option<u64>,
    status: Option<SubmissionStatus>,
    error: Option<LedgerError>,
    delay: Option<Duration>,
    remaining: usize,
}

impl Fault {
    pub fn on(op: LedgerOp) -> Self {
        Self {
            op,
            nft_id: None,
            status: None,
            error: None,
            delay: None,
            remaining: 1,
        }
    }

    pub fn for_nft(mut self, nft_id: u64) -> Self {
        self.nft_id = Some(nft_id);
        self
    }

    /// Only status updates writing `status`.
    pub fn writing(mut self, status: SubmissionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn fail_with(mut self, error: LedgerError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.remaining = n;
        self
    }

    fn matches(&self, op: LedgerOp, nft_id: Option<u64>, status: Option<&SubmissionStatus>) -> bool {
        self.remaining > 0
            && self.op == op
            && self.nft_id.map_or(true, |id| Some(id) == nft_id)
            && self.status.as_ref().map_or(true, |s| Some(s) == status)
    }
}

#[derive(Debug)]
struct LedgerState {
    owner: String,
    rules: LedgerRules,
    submissions: Vec<Submission>,
    categories: HashMap<String, CategoryStatus>,
    payouts: HashSet<(u64, String)>,
    nft_owners: BTreeMap<u64, String>,
    next_token_id: u64,
    balances: HashMap<String, u128>,
    artifacts: HashMap<String, u64>,
    faults: Vec<Fault>,
    tx_count: u64,
}

impl LedgerState {
    fn receipt(&mut self) -> TxReceipt {
        self.tx_count += 1;
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&self.tx_count.to_be_bytes());
        TxReceipt {
            tx_hash: format!("0x{}", hex::encode(bytes)),
        }
    }

    fn balance(&self, address: &str) -> u128 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    fn transfer(&mut self, from: &str, to: &str, amount: u128) -> LedgerResult<()> {
        let available = self.balance(from);
        if available < amount {
            return Err(LedgerError::InsufficientFunds(format!(
                "{}: {from} holds {available} wei, needs {amount}",
                reasons::INSUFFICIENT_BALANCE
            )));
        }
        self.balances.insert(from.to_string(), available - amount);
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        Ok(())
    }
}

/// A handle on the simulated ledger bound to one caller identity.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    caller: String,
}

impl InMemoryLedger {
    /// A fresh ledger whose contracts are owned by `owner`. The returned
    /// handle calls as `owner`.
    pub fn new(owner: &str) -> Self {
        Self::with_rules(owner, LedgerRules::default())
    }

    pub fn with_rules(owner: &str, rules: LedgerRules) -> Self {
        let state = LedgerState {
            owner: owner.to_string(),
            rules,
            submissions: Vec::new(),
            categories: HashMap::new(),
            payouts: HashSet::new(),
            nft_owners: BTreeMap::new(),
            next_token_id: 1,
            balances: HashMap::new(),
            artifacts: HashMap::new(),
            faults: Vec::new(),
            tx_count: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            caller: owner.to_string(),
        }
    }

    /// Same ledger, different signing identity.
    pub fn connect(&self, caller: &str) -> Self {
        Self {
            state: Arc::clone(&self.state),
            caller: caller.to_string(),
        }
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn payout_address(&self) -> &'static str {
        PAYOUT_CONTRACT_ADDRESS
    }

    /// Give `address` native funds out of thin air.
    pub async fn credit(&self, address: &str, amount_wei: u128) {
        let mut state = self.state.lock().await;
        *state.balances.entry(address.to_string()).or_insert(0) += amount_wei;
    }

    pub async fn balance_of(&self, address: &str) -> u128 {
        self.state.lock().await.balance(address)
    }

    pub async fn owner_of(&self, token_id: u64) -> Option<String> {
        self.state.lock().await.nft_owners.get(&token_id).cloned()
    }

    /// Number of payout records.
    pub async fn payout_count(&self) -> usize {
        self.state.lock().await.payouts.len()
    }

    /// Deploy a tutorial contract whose `getValue(1)` returns `value`.
    pub async fn deploy_artifact(&self, address: &str, value: u64) {
        self.state
            .lock()
            .await
            .artifacts
            .insert(address.to_string(), value);
    }

    pub async fn inject(&self, fault: Fault) {
        self.state.lock().await.faults.push(fault);
    }

    /// Apply the first matching fault. Delays run without holding the lock.
    async fn trip(
        &self,
        op: LedgerOp,
        nft_id: Option<u64>,
        status: Option<&SubmissionStatus>,
    ) -> LedgerResult<()> {
        let fault = {
            let mut state = self.state.lock().await;
            let found = state
                .faults
                .iter_mut()
                .find(|f| f.matches(op, nft_id, status));
            match found {
                Some(f) => {
                    f.remaining -= 1;
                    Some((f.delay, f.error.clone()))
                }
                None => None,
            }
        };
        if let Some((delay, error)) = fault {
            debug!("Injected fault on {op:?} (nft {nft_id:?})");
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = error {
                return Err(error);
            }
        }
        Ok(())
    }

    fn require_owner(&self, state: &LedgerState, reason: &str) -> LedgerResult<()> {
        if self.caller != state.owner {
            return Err(LedgerError::Unauthorized(reason.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit_tutorial(
        &self,
        nft_id: u64,
        testnet_address: &str,
        tutorial_name: &str,
    ) -> LedgerResult<Submission> {
        self.trip(LedgerOp::SubmitTutorial, Some(nft_id), None).await?;
        let mut state = self.state.lock().await;

        if state.rules.require_nft_ownership
            && state.nft_owners.get(&nft_id).map(String::as_str) != Some(self.caller.as_str())
        {
            return Err(LedgerError::Unauthorized(format!(
                "{}: caller does not own NFT #{nft_id}",
                reasons::NOT_AUTHORIZED
            )));
        }
        if state
            .submissions
            .iter()
            .any(|s| s.poap_nft_id == nft_id && s.tutorial_name == tutorial_name)
        {
            return Err(LedgerError::DuplicateSubmission(
                reasons::DUPLICATE_SUBMISSION.to_string(),
            ));
        }

        let submission = Submission {
            poap_nft_id: nft_id,
            deployed_testnet_address: testnet_address.to_string(),
            tutorial_name: tutorial_name.to_string(),
            status: SubmissionStatus::Pending,
        };
        state.submissions.push(submission.clone());
        state.receipt();
        Ok(submission)
    }

    async fn view_submissions(&self) -> LedgerResult<Vec<Submission>> {
        self.trip(LedgerOp::ViewSubmissions, None, None).await?;
        Ok(self.state.lock().await.submissions.clone())
    }

    async fn update_submission_status(
        &self,
        nft_id: u64,
        tutorial_name: &str,
        status: &SubmissionStatus,
    ) -> LedgerResult<TxReceipt> {
        self.trip(LedgerOp::UpdateStatus, Some(nft_id), Some(status))
            .await?;
        let mut state = self.state.lock().await;
        self.require_owner(&state, reasons::NOT_AUTHORIZED)?;

        let submission = state
            .submissions
            .iter_mut()
            .find(|s| s.poap_nft_id == nft_id && s.tutorial_name == tutorial_name)
            .ok_or_else(|| LedgerError::NotFound(reasons::SUBMISSION_NOT_FOUND.to_string()))?;
        submission.status = status.clone();
        Ok(state.receipt())
    }

    async fn payout(&self, nft_id: u64, category: &str) -> LedgerResult<TxReceipt> {
        self.trip(LedgerOp::Payout, Some(nft_id), None).await?;
        let mut state = self.state.lock().await;
        self.require_owner(&state, reasons::ONLY_OWNER)?;

        let category_status = state.categories.get(category).copied().unwrap_or_default();
        let already_paid = state.payouts.contains(&(nft_id, category.to_string()));
        policy::payout_gate(category_status, already_paid)?;

        let recipient = state
            .nft_owners
            .get(&nft_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(reasons::TOKEN_NOT_FOUND.to_string()))?;
        let amount = state.rules.payout_amount_wei;
        state.transfer(PAYOUT_CONTRACT_ADDRESS, &recipient, amount)?;
        state.payouts.insert((nft_id, category.to_string()));
        Ok(state.receipt())
    }

    async fn payout_made(&self, nft_id: u64, category: &str) -> LedgerResult<bool> {
        let state = self.state.lock().await;
        Ok(state.payouts.contains(&(nft_id, category.to_string())))
    }

    async fn add_tutorial_category(&self, name: &str) -> LedgerResult<TxReceipt> {
        let mut state = self.state.lock().await;
        self.require_owner(&state, reasons::ONLY_OWNER)?;
        state
            .categories
            .insert(name.to_string(), CategoryStatus::Active);
        Ok(state.receipt())
    }

    async fn remove_tutorial_category(&self, name: &str) -> LedgerResult<TxReceipt> {
        let mut state = self.state.lock().await;
        self.require_owner(&state, reasons::ONLY_OWNER)?;
        if let Some(status) = state.categories.get_mut(name) {
            *status = CategoryStatus::Inactive;
        }
        Ok(state.receipt())
    }

    async fn category_status(&self, name: &str) -> LedgerResult<CategoryStatus> {
        let state = self.state.lock().await;
        Ok(state.categories.get(name).copied().unwrap_or_default())
    }

    async fn mint(&self, to: &str) -> LedgerResult<u64> {
        self.trip(LedgerOp::Mint, None, None).await?;
        let mut state = self.state.lock().await;
        self.require_owner(&state, reasons::ONLY_OWNER)?;
        let token_id = state.next_token_id;
        state.next_token_id += 1;
        state.nft_owners.insert(token_id, to.to_string());
        state.receipt();
        Ok(token_id)
    }

    async fn send_value(&self, to: &str, amount_wei: u128) -> LedgerResult<TxReceipt> {
        self.trip(LedgerOp::SendValue, None, None).await?;
        let mut state = self.state.lock().await;
        state.transfer(&self.caller, to, amount_wei)?;
        Ok(state.receipt())
    }
}

#[async_trait]
impl ArtifactVerifier for InMemoryLedger {
    async fn verify(&self, submission: &Submission) -> LedgerResult<bool> {
        let state = self.state.lock().await;
        let value = state
            .artifacts
            .get(&submission.deployed_testnet_address)
            .ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "no contract deployed at {}",
                    submission.deployed_testnet_address
                ))
            })?;
        Ok(*value == submission.poap_nft_id)
    }
}

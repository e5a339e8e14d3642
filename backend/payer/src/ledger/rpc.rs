//! JSON-RPC ledger client.
//!
//! Calls go to a signing relay in front of the chain. Every request names the
//! target contract and the contract method:
//!
//! ```json
//! {"jsonrpc":"2.0","id":7,"method":"payout","params":{"contract":"0x…","args":[1,"Tutorial"]}}
//! ```
//!
//! Reads return their value in `result`. Writes return `{"txHash":"0x…"}` and
//! the client then polls `getTransactionReceipt` until the relay reports the
//! transaction `confirmed` or `reverted`.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied when the relay is unreachable, rate
//!   limits, or answers with a soft error, up to [`MAX_BACKOFF_SECS`] seconds
//!   and [`MAX_RPC_ATTEMPTS`] attempts. Exhausting them yields
//!   [`LedgerError::Transient`].
//! * Write sends are at-most-once. A send is retried only when the relay
//!   cannot have seen it (connection refused, rate limit) or rejected it
//!   with a JSON-RPC error. Any other transport failure or a 5xx answer
//!   leaves the outcome unknown and yields [`LedgerError::Timeout`].
//! * Receipt polling is bounded by the configured receipt timeout. Failed
//!   polls are retried until that deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ArtifactVerifier, LedgerClient, LedgerError, LedgerResult};
use crate::config::{Config, SignerKey};
use crate::errors::{PayerError, Result};
use crate::registry::ContractRegistry;
use crate::types::{CategoryStatus, Submission, SubmissionStatus, TxReceipt};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_MS: u64 = 2_000;
const MAX_RPC_ATTEMPTS: u32 = 5;
const RECEIPT_POLL_MS: u64 = 1_000;

/// Node error code for a reverted `eth_call` / `eth_estimateGas`.
const EXECUTION_REVERTED: i64 = 3;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentTransaction {
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    status: String,
    revert_reason: Option<String>,
    return_value: Option<Value>,
}

// ─────────────────────────────────────────────────────────
// Contracts
// ─────────────────────────────────────────────────────────

/// Addresses of the deployed contracts the client talks to.
#[derive(Debug, Clone)]
pub struct LedgerContracts {
    pub submissions: String,
    pub payout: String,
    pub poap_nft: String,
}

impl LedgerContracts {
    pub const SUBMISSIONS: &'static str = "TutorialSubmission";
    pub const PAYOUT: &'static str = "Payout";
    pub const POAP_NFT: &'static str = "PoapNFT";

    /// Look the three contracts up in the deployed-contract registry.
    pub async fn resolve(registry: &dyn ContractRegistry, network: &str) -> Result<Self> {
        Ok(Self {
            submissions: registry.get(network, Self::SUBMISSIONS).await?.address,
            payout: registry.get(network, Self::PAYOUT).await?.address,
            poap_nft: registry.get(network, Self::POAP_NFT).await?.address,
        })
    }
}

/// Tunables for [`RpcLedger`].
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub receipt_timeout: Duration,
    pub receipt_poll: Duration,
    pub initial_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(120),
            receipt_poll: Duration::from_millis(RECEIPT_POLL_MS),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_attempts: MAX_RPC_ATTEMPTS,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct RpcLedger {
    client: Client,
    rpc_url: String,
    contracts: LedgerContracts,
    signer: SignerKey,
    settings: RpcSettings,
    next_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(
        client: Client,
        rpc_url: &str,
        contracts: LedgerContracts,
        signer: SignerKey,
        settings: RpcSettings,
    ) -> Self {
        Self {
            client,
            rpc_url: rpc_url.to_string(),
            contracts,
            signer,
            settings,
            next_id: AtomicU64::new(1),
        }
    }

    /// Build a client for `config.network`, resolving contract addresses from
    /// `registry` and signing as `signer`.
    pub async fn connect(
        config: &Config,
        registry: &dyn ContractRegistry,
        signer: SignerKey,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PayerError::Config(format!("HTTP client: {e}")))?;
        let contracts = LedgerContracts::resolve(registry, config.network.as_str()).await?;
        let settings = RpcSettings {
            receipt_timeout: config.receipt_timeout(),
            ..RpcSettings::default()
        };
        Ok(Self::new(client, &config.rpc_url, contracts, signer, settings))
    }

    pub fn contracts(&self) -> &LedgerContracts {
        &self.contracts
    }

    /// Issue one JSON-RPC call, retrying transport and soft errors as
    /// `delivery` allows.
    async fn call(&self, method: &str, params: Value, delivery: Delivery) -> LedgerResult<Value> {
        let mut backoff = self.settings.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let response = self
                .client
                .post(&self.rpc_url)
                .bearer_auth(self.signer.expose())
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": method,
                    "params": params,
                }))
                .send()
                .await;

            let retry_reason = match response {
                Err(e) if delivery == Delivery::AtMostOnce && !e.is_connect() => {
                    return Err(LedgerError::Timeout(format!(
                        "{method}: outcome unknown, request failed: {e}"
                    )));
                }
                Err(e) => format!("RPC request failed: {e}"),
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    "Rate-limited by RPC".to_string()
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if delivery == Delivery::AtMostOnce {
                        return Err(LedgerError::Timeout(format!(
                            "{method}: outcome unknown, RPC server error {}",
                            resp.status()
                        )));
                    }
                    format!("RPC server error {}", resp.status())
                }
                Ok(resp) => {
                    let body: RpcResponse = resp
                        .json()
                        .await
                        .map_err(|e| LedgerError::Protocol(format!("{method}: {e}")))?;

                    match body.error {
                        Some(err) => match classify_rpc_error(err) {
                            RpcFailure::Hard(e) => return Err(e),
                            RpcFailure::Soft(reason) => reason,
                        },
                        None => {
                            debug!("{method} answered (attempt {attempt})");
                            return Ok(body.result.unwrap_or(Value::Null));
                        }
                    }
                }
            };

            if attempt >= self.settings.max_attempts {
                return Err(LedgerError::Transient(format!(
                    "{method}: {retry_reason} (gave up after {attempt} attempts)"
                )));
            }
            warn!("{retry_reason} (will retry {method} in {backoff:?})");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
        }
    }

    async fn read(&self, contract: &str, method: &str, args: Value) -> LedgerResult<Value> {
        self.call(method, build_params(contract, args), Delivery::Retry)
            .await
    }

    /// Send a write and wait for it to reach finality.
    async fn transact(
        &self,
        contract: &str,
        method: &str,
        args: Value,
    ) -> LedgerResult<(TxReceipt, Receipt)> {
        let sent = self
            .call(method, build_params(contract, args), Delivery::AtMostOnce)
            .await?;
        let sent: SentTransaction = serde_json::from_value(sent)
            .map_err(|e| LedgerError::Protocol(format!("{method}: missing txHash: {e}")))?;
        debug!("{method} sent as {}", sent.tx_hash);
        let receipt = self.wait_for_receipt(&sent.tx_hash).await?;
        Ok((
            TxReceipt {
                tx_hash: sent.tx_hash,
            },
            receipt,
        ))
    }

    async fn write(&self, contract: &str, method: &str, args: Value) -> LedgerResult<TxReceipt> {
        let (tx, _) = self.transact(contract, method, args).await?;
        Ok(tx)
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> LedgerResult<Receipt> {
        let deadline = Instant::now() + self.settings.receipt_timeout;
        let mut last_error = None;
        loop {
            let raw = match self
                .call("getTransactionReceipt", json!({ "txHash": tx_hash }), Delivery::Retry)
                .await
            {
                Ok(raw) => raw,
                // The transaction is out; only the deadline ends the wait.
                Err(e) if e.is_transient() => {
                    warn!("Receipt poll for {tx_hash} failed: {e}");
                    last_error = Some(e);
                    Value::Null
                }
                Err(e) => return Err(e),
            };
            if !raw.is_null() {
                let receipt: Receipt = serde_json::from_value(raw).map_err(|e| {
                    LedgerError::Protocol(format!("receipt for {tx_hash}: {e}"))
                })?;
                match receipt.status.as_str() {
                    "confirmed" => return Ok(receipt),
                    "reverted" => {
                        let reason = receipt
                            .revert_reason
                            .unwrap_or_else(|| format!("transaction {tx_hash} reverted"));
                        return Err(LedgerError::from_revert(reason));
                    }
                    _ => {}
                }
            }
            if Instant::now() >= deadline {
                let detail = last_error
                    .map(|e| format!(" (last poll error: {e})"))
                    .unwrap_or_default();
                return Err(LedgerError::Timeout(format!(
                    "transaction {tx_hash} not confirmed within {:?}{detail}",
                    self.settings.receipt_timeout
                )));
            }
            tokio::time::sleep(self.settings.receipt_poll).await;
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn submit_tutorial(
        &self,
        nft_id: u64,
        testnet_address: &str,
        tutorial_name: &str,
    ) -> LedgerResult<Submission> {
        self.write(
            &self.contracts.submissions,
            "submitTutorial",
            json!([nft_id, testnet_address, tutorial_name]),
        )
        .await?;
        Ok(Submission {
            poap_nft_id: nft_id,
            deployed_testnet_address: testnet_address.to_string(),
            tutorial_name: tutorial_name.to_string(),
            status: SubmissionStatus::Pending,
        })
    }

    async fn view_submissions(&self) -> LedgerResult<Vec<Submission>> {
        let raw = self
            .read(&self.contracts.submissions, "viewSubmissions", json!([]))
            .await?;
        decode_submissions(&raw)
    }

    async fn update_submission_status(
        &self,
        nft_id: u64,
        tutorial_name: &str,
        status: &SubmissionStatus,
    ) -> LedgerResult<TxReceipt> {
        self.write(
            &self.contracts.submissions,
            "updateSubmissionStatus",
            json!([nft_id, tutorial_name, status.as_str()]),
        )
        .await
    }

    async fn payout(&self, nft_id: u64, category: &str) -> LedgerResult<TxReceipt> {
        self.write(&self.contracts.payout, "payout", json!([nft_id, category]))
            .await
    }

    async fn payout_made(&self, nft_id: u64, category: &str) -> LedgerResult<bool> {
        let raw = self
            .read(&self.contracts.payout, "payouts", json!([nft_id, category]))
            .await?;
        raw.as_bool()
            .ok_or_else(|| LedgerError::Protocol(format!("payouts: expected bool, got {raw}")))
    }

    async fn add_tutorial_category(&self, name: &str) -> LedgerResult<TxReceipt> {
        self.write(&self.contracts.payout, "addTutorialCategory", json!([name]))
            .await
    }

    async fn remove_tutorial_category(&self, name: &str) -> LedgerResult<TxReceipt> {
        self.write(&self.contracts.payout, "removeTutorialCategory", json!([name]))
            .await
    }

    async fn category_status(&self, name: &str) -> LedgerResult<CategoryStatus> {
        let raw = self
            .read(&self.contracts.payout, "tutorialStatuses", json!([name]))
            .await?;
        let code = parse_u64(&raw)
            .and_then(|c| u8::try_from(c).ok())
            .ok_or_else(|| LedgerError::Protocol(format!("tutorialStatuses: bad value {raw}")))?;
        CategoryStatus::try_from(code).map_err(LedgerError::Protocol)
    }

    async fn mint(&self, to: &str) -> LedgerResult<u64> {
        let (_, receipt) = self
            .transact(&self.contracts.poap_nft, "mint", json!([to]))
            .await?;
        if let Some(id) = receipt.return_value.as_ref().and_then(parse_u64) {
            return Ok(id);
        }
        // Relays that do not echo return values: ask the NFT contract.
        let raw = self
            .read(&self.contracts.poap_nft, "tokenOfOwnerByIndex", json!([to, 0]))
            .await?;
        parse_u64(&raw)
            .ok_or_else(|| LedgerError::Protocol(format!("tokenOfOwnerByIndex: bad value {raw}")))
    }

    async fn send_value(&self, to: &str, amount_wei: u128) -> LedgerResult<TxReceipt> {
        self.write(to, "sendValue", json!([amount_wei.to_string()]))
            .await
    }
}

/// Calls `getValue(1)` on the submitted contract; a valid tutorial returns
/// the submitter's NFT id.
#[async_trait]
impl ArtifactVerifier for RpcLedger {
    async fn verify(&self, submission: &Submission) -> LedgerResult<bool> {
        let raw = self
            .read(&submission.deployed_testnet_address, "getValue", json!([1]))
            .await?;
        let value = parse_u64(&raw)
            .ok_or_else(|| LedgerError::Protocol(format!("getValue: bad value {raw}")))?;
        Ok(value == submission.poap_nft_id)
    }
}

// ─────────────────────────────────────────────────────────
// Decoding helpers
// ─────────────────────────────────────────────────────────

enum RpcFailure {
    Hard(LedgerError),
    Soft(String),
}

/// How far a failed call may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Reads and receipt polls: safe to resend.
    Retry,
    /// Write sends: resent only when the relay cannot have acted on them.
    AtMostOnce,
}

fn classify_rpc_error(err: RpcError) -> RpcFailure {
    // Invalid request / unknown method never succeed on retry.
    if err.code == -32600 || err.code == -32601 {
        return RpcFailure::Hard(LedgerError::Protocol(format!(
            "RPC hard error {}: {}",
            err.code, err.message
        )));
    }
    if err.code == EXECUTION_REVERTED || err.message.contains("execution reverted") {
        let detail = err
            .data
            .as_ref()
            .and_then(|d| d.get("revertReason").unwrap_or(d).as_str())
            .map(str::to_string);
        let reason = match detail {
            Some(detail) => format!("{}: {detail}", err.message),
            None => err.message,
        };
        return RpcFailure::Hard(LedgerError::from_revert(reason));
    }
    RpcFailure::Soft(format!("RPC soft error {}: {}", err.code, err.message))
}

fn build_params(contract: &str, args: Value) -> Value {
    json!({
        "contract": contract,
        "args": args,
    })
}

/// Integers arrive as JSON numbers, decimal strings or `0x` hex strings.
fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        Value::Object(map) => map.get("hex").and_then(parse_u64),
        _ => None,
    }
}

/// Decode `viewSubmissions`. Entries are either objects with the contract's
/// field names or positional tuples `[poapNftId, address, tutorialName, status]`.
fn decode_submissions(raw: &Value) -> LedgerResult<Vec<Submission>> {
    let entries = raw.as_array().ok_or_else(|| {
        LedgerError::Protocol(format!("viewSubmissions: expected array, got {raw}"))
    })?;
    entries.iter().map(decode_submission).collect()
}

fn decode_submission(entry: &Value) -> LedgerResult<Submission> {
    let bad = || LedgerError::Protocol(format!("viewSubmissions: bad entry {entry}"));
    let (id, address, name, status) = match entry {
        Value::Array(fields) if fields.len() == 4 => {
            (&fields[0], &fields[1], &fields[2], &fields[3])
        }
        Value::Object(map) => (
            map.get("poapNftId").ok_or_else(bad)?,
            map.get("deployedTestnetAddress").ok_or_else(bad)?,
            map.get("tutorialName").ok_or_else(bad)?,
            map.get("status").ok_or_else(bad)?,
        ),
        _ => return Err(bad()),
    };
    Ok(Submission {
        poap_nft_id: parse_u64(id).ok_or_else(bad)?,
        deployed_testnet_address: address.as_str().ok_or_else(bad)?.to_string(),
        tutorial_name: name.as_str().ok_or_else(bad)?.to_string(),
        status: SubmissionStatus::from(status.as_str().ok_or_else(bad)?.to_string()),
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

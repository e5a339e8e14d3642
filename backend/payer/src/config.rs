//! Application configuration loaded from environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{PayerError, Result};

const LOCAL_RPC_URL: &str = "http://127.0.0.1:8011";

/// Network the drivers operate on, selected by `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Test,
    Localnet,
    Testnet,
    Mainnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Localnet => "localnet",
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }

    /// Suffix of the per-network environment variables.
    fn env_suffix(self) -> &'static str {
        match self {
            Self::Test => "TEST",
            Self::Localnet => "LOCALNET",
            Self::Testnet => "TESTNET",
            Self::Mainnet => "MAINNET",
        }
    }

    fn is_local(self) -> bool {
        matches!(self, Self::Test | Self::Localnet)
    }
}

impl FromStr for Network {
    type Err = PayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" => Ok(Self::Test),
            "localnet" => Ok(Self::Localnet),
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            other => Err(PayerError::Config(format!("Unknown network: {other}"))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential handed to the signing relay. Never printed.
#[derive(Clone)]
pub struct SignerKey(String);

impl SignerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignerKey(<redacted>)")
    }
}

/// Parameters of the demo scripts.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Receives the minted NFT and the sent funds.
    pub recipient: Option<String>,
    pub category: String,
    pub user_nft_id: u64,
    /// ETH sent to the payout contract.
    pub fund_pool_eth: String,
    /// ETH sent to the recipient.
    pub send_funds_eth: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    /// Signing relay / node endpoint.
    pub rpc_url: String,
    /// Privileged identity: approves, pays, manages categories, mints.
    pub signer_key: SignerKey,
    /// Submitter identity, only needed by `demo-submit`.
    pub user_key: Option<SignerKey>,
    /// Deployed-contract registry (`vars.json` layout).
    pub vars_path: PathBuf,
    /// SQLite database for the payout audit log.
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Seconds between scheduled payout passes
    pub poll_interval_secs: u64,
    pub payout_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
    pub payout_max_attempts: u32,
    pub demo: DemoConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = |key: &str| -> Result<String> {
            lookup(key).ok_or_else(|| PayerError::Config(format!("Missing env var: {key}")))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let network: Network = or_default("NODE_ENV", "test").parse()?;
        let suffix = network.env_suffix();

        let rpc_url = match lookup(&format!("L2_RPC_URL_{suffix}")) {
            Some(url) => url,
            None if network.is_local() => LOCAL_RPC_URL.to_string(),
            None => {
                return Err(PayerError::Config(format!(
                    "L2_RPC_URL_{suffix} environment variable is required for {network}"
                )))
            }
        };

        let signer_key = env_var(&format!("WALLET_PRIVATE_KEY_{suffix}")).map_err(|_| {
            PayerError::Config(format!(
                "Private key not detected! Set WALLET_PRIVATE_KEY_{suffix} in the .env file"
            ))
        })?;

        Ok(Config {
            network,
            rpc_url,
            signer_key: SignerKey::new(signer_key),
            user_key: lookup(&format!("WALLET_USER_PRIVATE_KEY_{suffix}")).map(SignerKey::new),
            vars_path: PathBuf::from(or_default("VARS_PATH", "deploy/vars.json")),
            database_url: or_default("DATABASE_URL", "sqlite:./payer.db"),
            api_port: parse(&or_default("API_PORT", "3001"), "API_PORT")?,
            poll_interval_secs: parse(&or_default("POLL_INTERVAL_SECS", "30"), "POLL_INTERVAL_SECS")?,
            payout_timeout_secs: parse(
                &or_default("PAYOUT_TIMEOUT_SECS", "120"),
                "PAYOUT_TIMEOUT_SECS",
            )?,
            receipt_timeout_secs: parse(
                &or_default("RECEIPT_TIMEOUT_SECS", "120"),
                "RECEIPT_TIMEOUT_SECS",
            )?,
            payout_max_attempts: parse(
                &or_default("PAYOUT_MAX_ATTEMPTS", "3"),
                "PAYOUT_MAX_ATTEMPTS",
            )?,
            demo: DemoConfig {
                recipient: lookup("NFT_RECIPIENT_ADDRESS"),
                category: or_default("TUTORIAL_CATEGORY", "PoapMultiplier"),
                user_nft_id: parse(&or_default("USER_NFT_ID", "1"), "USER_NFT_ID")?,
                fund_pool_eth: or_default("FUND_POOL_ETH", "0.1"),
                send_funds_eth: or_default("SEND_FUNDS_ETH", "100"),
            },
        })
    }

    pub fn require_user_key(&self) -> Result<&SignerKey> {
        self.user_key.as_ref().ok_or_else(|| {
            PayerError::Config(format!(
                "User private key not detected! Set WALLET_USER_PRIVATE_KEY_{} in the .env file",
                self.network.env_suffix()
            ))
        })
    }

    pub fn payout_timeout(&self) -> Duration {
        Duration::from_secs(self.payout_timeout_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

fn parse<T: FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| PayerError::Config(format!("Invalid {key}: {raw}")))
}

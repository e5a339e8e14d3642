//! Deployed-contract registry: `network → [{name, address}]`.
//!
//! Deploy tooling writes here and every driver resolves contract addresses
//! from it. `upsert` updates a record in place by name, else appends it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::errors::{PayerError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeployedContract {
    pub name: String,
    pub address: String,
}

#[async_trait]
pub trait ContractRegistry: Send + Sync {
    /// Fails with [`PayerError::ContractNotFound`] when no record exists.
    async fn get(&self, network: &str, name: &str) -> Result<DeployedContract>;

    async fn upsert(&self, network: &str, name: &str, address: &str) -> Result<()>;

    async fn list(&self, network: &str) -> Result<Vec<DeployedContract>>;
}

fn not_found(network: &str, name: &str) -> PayerError {
    PayerError::ContractNotFound {
        network: network.to_string(),
        name: name.to_string(),
    }
}

/// Update-in-place by name, else append. Returns `true` when appended.
fn upsert_record(records: &mut Vec<DeployedContract>, name: &str, address: &str) -> bool {
    match records.iter_mut().find(|c| c.name == name) {
        Some(existing) => {
            existing.address = address.to_string();
            false
        }
        None => {
            records.push(DeployedContract {
                name: name.to_string(),
                address: address.to_string(),
            });
            true
        }
    }
}

// ─────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    networks: RwLock<BTreeMap<String, Vec<DeployedContract>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContractRegistry for MemoryRegistry {
    async fn get(&self, network: &str, name: &str) -> Result<DeployedContract> {
        let networks = self.networks.read().await;
        networks
            .get(network)
            .and_then(|records| records.iter().find(|c| c.name == name))
            .cloned()
            .ok_or_else(|| not_found(network, name))
    }

    async fn upsert(&self, network: &str, name: &str, address: &str) -> Result<()> {
        let mut networks = self.networks.write().await;
        upsert_record(networks.entry(network.to_string()).or_default(), name, address);
        Ok(())
    }

    async fn list(&self, network: &str) -> Result<Vec<DeployedContract>> {
        let networks = self.networks.read().await;
        Ok(networks.get(network).cloned().unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────
// JSON file (`vars.json`)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct NetworkContracts {
    #[serde(default)]
    deployed: Vec<DeployedContract>,
    /// Other per-network keys, written back untouched.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

type VarsFile = BTreeMap<String, NetworkContracts>;

/// Registry persisted as
/// `{ "<network>": { "deployed": [ { "name": …, "address": … } ] } }`.
///
/// Writes go to a sibling temp file and are renamed into place.
#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<VarsFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VarsFile::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, vars: &VarsFile) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(vars)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ContractRegistry for JsonFileRegistry {
    async fn get(&self, network: &str, name: &str) -> Result<DeployedContract> {
        let vars = self.load().await?;
        vars.get(network)
            .and_then(|n| n.deployed.iter().find(|c| c.name == name))
            .cloned()
            .ok_or_else(|| not_found(network, name))
    }

    async fn upsert(&self, network: &str, name: &str, address: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut vars = self.load().await?;
        let appended = upsert_record(
            &mut vars.entry(network.to_string()).or_default().deployed,
            name,
            address,
        );
        if appended {
            info!("Adding {name} to {}", self.path.display());
        } else {
            info!("Updating {name} in {}", self.path.display());
        }
        self.store(&vars).await
    }

    async fn list(&self, network: &str) -> Result<Vec<DeployedContract>> {
        let vars = self.load().await?;
        Ok(vars.get(network).map(|n| n.deployed.clone()).unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────
// SQLite
// ─────────────────────────────────────────────────────────

/// Registry stored in the `deployed_contracts` table; upserts run as one
/// read-modify-write transaction.
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContractRegistry for SqliteRegistry {
    async fn get(&self, network: &str, name: &str) -> Result<DeployedContract> {
        let row = sqlx::query_as::<_, DeployedContract>(
            "SELECT name, address FROM deployed_contracts WHERE network = ?1 AND name = ?2",
        )
        .bind(network)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| not_found(network, name))
    }

    async fn upsert(&self, network: &str, name: &str, address: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT position FROM deployed_contracts WHERE network = ?1 AND name = ?2",
        )
        .bind(network)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            sqlx::query(
                r#"
                UPDATE deployed_contracts
                SET    address = ?3, updated_at = strftime('%s','now')
                WHERE  network = ?1 AND name = ?2
                "#,
            )
            .bind(network)
            .bind(name)
            .bind(address)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO deployed_contracts (network, name, address, position)
                VALUES (?1, ?2, ?3,
                        (SELECT COALESCE(MAX(position), -1) + 1
                         FROM deployed_contracts WHERE network = ?1))
                "#,
            )
            .bind(network)
            .bind(name)
            .bind(address)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, network: &str) -> Result<Vec<DeployedContract>> {
        let rows = sqlx::query_as::<_, DeployedContract>(
            "SELECT name, address FROM deployed_contracts WHERE network = ?1 ORDER BY position ASC",
        )
        .bind(network)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

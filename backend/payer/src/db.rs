//! Database layer: migrations and the payout audit log.

use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::{PayerError, Result};
use crate::payer::{PassReport, PayoutOutcome};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Each connection to an in-memory database sees its own empty database.
    let in_memory = url.contains(":memory:");
    let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
    if in_memory {
        options = options.idle_timeout(None).max_lifetime(None);
    }

    let url = if in_memory || url.contains("mode=") {
        url
    } else if url.contains('?') {
        format!("{url}&mode=rwc")
    } else {
        format!("{url}?mode=rwc")
    };

    let pool = options.connect(&url).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// A row of the `payout_attempts` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PayoutAttemptRecord {
    pub id: i64,
    pub pass_started_at: i64,
    pub poap_nft_id: i64,
    pub tutorial_name: String,
    pub outcome: String,
    pub tx_hash: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub attempts: i64,
    pub created_at: i64,
}

// ─────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────

/// Persist every attempt of a finished pass in one transaction.
pub async fn record_pass(pool: &SqlitePool, report: &PassReport) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let started_at = report.started_at.timestamp();

    for attempt in &report.attempts {
        let (tx_hash, error_kind, error_message) = match &attempt.outcome {
            PayoutOutcome::Paid { tx_hash } => (Some(tx_hash.as_str()), None, None),
            PayoutOutcome::RolledBack { error } => {
                (None, Some(error.kind().as_str()), Some(error.message()))
            }
        };

        sqlx::query(
            r#"
            INSERT INTO payout_attempts
                (pass_started_at, poap_nft_id, tutorial_name, outcome,
                 tx_hash, error_kind, error_message, attempts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(started_at)
        .bind(db_nft_id(attempt.key.poap_nft_id)?)
        .bind(&attempt.key.tutorial_name)
        .bind(attempt.outcome.as_str())
        .bind(tx_hash)
        .bind(error_kind)
        .bind(error_message)
        .bind(i64::from(attempt.attempts))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(report.attempts.len())
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

/// All recorded attempts, newest first.
pub async fn get_all_attempts(pool: &SqlitePool) -> Result<Vec<PayoutAttemptRecord>> {
    let rows = sqlx::query_as::<_, PayoutAttemptRecord>(
        r#"
        SELECT id, pass_started_at, poap_nft_id, tutorial_name, outcome,
               tx_hash, error_kind, error_message, attempts, created_at
        FROM   payout_attempts
        ORDER  BY id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Attempts for one NFT, oldest first.
pub async fn get_attempts_for_nft(pool: &SqlitePool, nft_id: u64) -> Result<Vec<PayoutAttemptRecord>> {
    // No stored row can carry an id above i64::MAX.
    let Ok(nft_id) = i64::try_from(nft_id) else {
        return Ok(Vec::new());
    };
    let rows = sqlx::query_as::<_, PayoutAttemptRecord>(
        r#"
        SELECT id, pass_started_at, poap_nft_id, tutorial_name, outcome,
               tx_hash, error_kind, error_message, attempts, created_at
        FROM   payout_attempts
        WHERE  poap_nft_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(nft_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// SQLite integers are signed 64-bit.
fn db_nft_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| PayerError::NftIdOutOfRange(id))
}

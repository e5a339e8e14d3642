//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::{self, PayoutAttemptRecord};
use crate::ledger::{LedgerClient, LedgerResult};
use crate::policy::{self, Eligibility};
use crate::types::Submission;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub ledger: Arc<dyn LedgerClient>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/submissions", get(get_submissions))
        .route("/payouts", get(get_all_payouts))
        .route("/payouts/:nft_id", get(get_nft_payouts))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct SubmissionView {
    #[serde(flatten)]
    pub submission: Submission,
    pub category_active: bool,
    pub already_paid: bool,
    pub eligibility: Eligibility,
}

#[derive(Serialize)]
pub struct SubmissionsResponse {
    pub count: usize,
    pub submissions: Vec<SubmissionView>,
}

#[derive(Serialize)]
pub struct PayoutsResponse {
    pub count: usize,
    pub payouts: Vec<PayoutAttemptRecord>,
}

#[derive(Serialize)]
pub struct NftPayoutsResponse {
    pub nft_id: u64,
    pub count: usize,
    pub payouts: Vec<PayoutAttemptRecord>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /submissions`
///
/// Reads the ledger live and annotates each submission with whether the next
/// pass would pay it.
pub async fn get_submissions(State(state): State<Arc<ApiState>>) -> Response {
    match annotate(state.ledger.as_ref()).await {
        Ok(submissions) => Json(SubmissionsResponse {
            count: submissions.len(),
            submissions,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

async fn annotate(ledger: &dyn LedgerClient) -> LedgerResult<Vec<SubmissionView>> {
    let submissions = ledger.view_submissions().await?;
    let mut views = Vec::with_capacity(submissions.len());
    for submission in submissions {
        let category = ledger.category_status(&submission.tutorial_name).await?;
        let already_paid = ledger
            .payout_made(submission.poap_nft_id, &submission.tutorial_name)
            .await?;
        views.push(SubmissionView {
            eligibility: policy::evaluate(&submission, category, already_paid),
            category_active: category.is_active(),
            already_paid,
            submission,
        });
    }
    Ok(views)
}

/// `GET /payouts`
///
/// Returns every recorded payout attempt, newest first.
pub async fn get_all_payouts(State(state): State<Arc<ApiState>>) -> Response {
    match db::get_all_attempts(&state.pool).await {
        Ok(payouts) => Json(PayoutsResponse {
            count: payouts.len(),
            payouts,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// `GET /payouts/:nft_id`
pub async fn get_nft_payouts(
    State(state): State<Arc<ApiState>>,
    Path(nft_id): Path<u64>,
) -> Response {
    match db::get_attempts_for_nft(&state.pool, nft_id).await {
        Ok(payouts) => Json(NftPayoutsResponse {
            nft_id,
            count: payouts.len(),
            payouts,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::ledger::memory::{Fault, InMemoryLedger, LedgerOp};
    use crate::ledger::LedgerError;
    use crate::payer::{Payer, PayerSettings};
    use crate::types::SubmissionStatus;

    const OWNER: &str = "0xowner";
    const ETH: u128 = 1_000_000_000_000_000_000;

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn seeded() -> (InMemoryLedger, SqlitePool) {
        let ledger = InMemoryLedger::new(OWNER);
        ledger.credit(ledger.payout_address(), ETH).await;
        ledger.add_tutorial_category("PoapMultiplier").await.unwrap();
        for holder in ["0xa", "0xb"] {
            let nft = ledger.mint(holder).await.unwrap();
            ledger
                .connect(holder)
                .submit_tutorial(nft, "0xartifact", "PoapMultiplier")
                .await
                .unwrap();
        }
        ledger
            .update_submission_status(1, "PoapMultiplier", &SubmissionStatus::Valid)
            .await
            .unwrap();
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        (ledger, pool)
    }

    fn app(ledger: &InMemoryLedger, pool: &SqlitePool) -> Router {
        router(ApiState {
            pool: pool.clone(),
            ledger: Arc::new(ledger.clone()),
        })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (ledger, pool) = seeded().await;
        let (status, body) = get(app(&ledger, &pool), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn submissions_are_annotated_with_eligibility() {
        let (ledger, pool) = seeded().await;
        let (status, body) = get(app(&ledger, &pool), "/submissions").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        let first = &body["submissions"][0];
        assert_eq!(first["poapNftId"], 1);
        assert_eq!(first["status"], "VALID");
        assert_eq!(first["category_active"], true);
        assert_eq!(first["eligibility"], "eligible");
        assert_eq!(body["submissions"][1]["eligibility"], "not_approved");
    }

    #[tokio::test]
    async fn ledger_failure_is_a_bad_gateway() {
        let (ledger, pool) = seeded().await;
        ledger
            .inject(
                Fault::on(LedgerOp::ViewSubmissions)
                    .fail_with(LedgerError::Transient("relay unavailable".into())),
            )
            .await;
        let (status, body) = get(app(&ledger, &pool), "/submissions").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("relay unavailable"));
    }

    #[tokio::test]
    async fn payouts_expose_the_audit_log() {
        let (ledger, pool) = seeded().await;
        let payer = Payer::new(Arc::new(ledger.clone()), PayerSettings::default());
        let report = payer.run_pass().await.unwrap();
        db::record_pass(&pool, &report).await.unwrap();

        let (status, body) = get(app(&ledger, &pool), "/payouts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["payouts"][0]["outcome"], "paid");

        let (_, body) = get(app(&ledger, &pool), "/payouts/1").await;
        assert_eq!(body["nft_id"], 1);
        assert_eq!(body["count"], 1);

        let (_, body) = get(app(&ledger, &pool), "/payouts/2").await;
        assert_eq!(body["count"], 0);

        let (_, body) = get(app(&ledger, &pool), "/submissions").await;
        assert_eq!(body["submissions"][0]["status"], "PAID");
        assert_eq!(body["submissions"][0]["eligibility"], "not_approved");
        assert_eq!(body["submissions"][0]["already_paid"], true);
    }
}

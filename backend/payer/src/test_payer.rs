use std::sync::Arc;
use std::time::Duration;

use crate::db;
use crate::errors::PayerError;
use crate::ledger::memory::{Fault, InMemoryLedger, LedgerOp, DEFAULT_PAYOUT_AMOUNT_WEI};
use crate::ledger::{LedgerClient, LedgerError, LedgerErrorKind};
use crate::payer::{Payer, PayerSettings, PayoutOutcome};
use crate::review::Reviewer;
use crate::types::SubmissionStatus;

const OWNER: &str = "0xowner";
const ETH: u128 = 1_000_000_000_000_000_000;
const USER: &str = "0xuser";
const TUTORIAL: &str = "Tutorial 1";

fn fast_settings() -> PayerSettings {
    PayerSettings {
        payout_timeout: Duration::from_millis(200),
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

/// A ledger with a funded pool and an active `TUTORIAL` category.
async fn setup() -> InMemoryLedger {
    let ledger = InMemoryLedger::new(OWNER);
    ledger.credit(ledger.payout_address(), ETH).await;
    ledger.add_tutorial_category(TUTORIAL).await.unwrap();
    ledger
}

fn payer(ledger: &InMemoryLedger) -> Payer {
    Payer::new(Arc::new(ledger.clone()), fast_settings())
}

/// Mint an NFT to `USER` and submit `tutorial` with it.
async fn submit(ledger: &InMemoryLedger, tutorial: &str) -> u64 {
    let nft = ledger.mint(USER).await.unwrap();
    ledger
        .connect(USER)
        .submit_tutorial(nft, "0x0000000000", tutorial)
        .await
        .unwrap();
    nft
}

async fn set_status(ledger: &InMemoryLedger, nft: u64, tutorial: &str, status: SubmissionStatus) {
    ledger
        .update_submission_status(nft, tutorial, &status)
        .await
        .unwrap();
}

async fn status_of(ledger: &InMemoryLedger, nft: u64) -> SubmissionStatus {
    ledger
        .view_submissions()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.poap_nft_id == nft)
        .map(|s| s.status)
        .unwrap()
}

#[tokio::test]
async fn test_submit_review_and_pay_once() {
    let ledger = setup().await;
    let nft = submit(&ledger, TUTORIAL).await;
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Pending);

    ledger.deploy_artifact("0x0000000000", nft).await;
    let review = Reviewer::new(Arc::new(ledger.clone()), Arc::new(ledger.clone()))
        .run_pass()
        .await
        .unwrap();
    assert_eq!(review.verdicts.len(), 1);
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Valid);

    let payer = payer(&ledger);
    let report = payer.run_pass().await.unwrap();
    assert_eq!(report.paid(), 1);
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Paid);
    assert_eq!(ledger.balance_of(USER).await, DEFAULT_PAYOUT_AMOUNT_WEI);

    // Nothing left to pay on the next pass.
    let again = payer.run_pass().await.unwrap();
    assert!(again.attempts.is_empty());
    assert_eq!(again.fetched, 1);
    assert_eq!(ledger.payout_count().await, 1);
    assert_eq!(ledger.balance_of(USER).await, DEFAULT_PAYOUT_AMOUNT_WEI);
}

#[tokio::test]
async fn test_inactive_category_rolls_back_to_valid() {
    let ledger = setup().await;
    let nft = submit(&ledger, "Inactive Tutorial").await;
    set_status(&ledger, nft, "Inactive Tutorial", SubmissionStatus::Valid).await;

    let report = payer(&ledger).run_pass().await.unwrap();

    assert_eq!(report.rolled_back(), 1);
    match &report.attempts[0].outcome {
        PayoutOutcome::RolledBack { error } => {
            assert_eq!(error.kind(), LedgerErrorKind::CategoryInactive)
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    assert_eq!(report.attempts[0].attempts, 1);
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Valid);
    assert_eq!(ledger.payout_count().await, 0);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_batch() {
    let ledger = setup().await;
    let failing = submit(&ledger, "Inactive Tutorial").await;
    let paying = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, failing, "Inactive Tutorial", SubmissionStatus::Valid).await;
    set_status(&ledger, paying, TUTORIAL, SubmissionStatus::Valid).await;

    let report = payer(&ledger).run_pass().await.unwrap();

    assert_eq!(report.attempts.len(), 2);
    assert_eq!(report.rolled_back(), 1);
    assert_eq!(report.paid(), 1);
    assert_eq!(status_of(&ledger, failing).await, SubmissionStatus::Valid);
    assert_eq!(status_of(&ledger, paying).await, SubmissionStatus::Paid);
}

#[tokio::test]
async fn test_transient_payout_errors_are_retried() {
    let ledger = setup().await;
    let nft = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, nft, TUTORIAL, SubmissionStatus::Valid).await;
    ledger
        .inject(
            Fault::on(LedgerOp::Payout)
                .fail_with(LedgerError::Transient("429 Too Many Requests".into()))
                .times(2),
        )
        .await;

    let report = payer(&ledger).run_pass().await.unwrap();

    assert_eq!(report.paid(), 1);
    assert_eq!(report.attempts[0].attempts, 3);
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Paid);
    assert_eq!(ledger.payout_count().await, 1);
}

#[tokio::test]
async fn test_exhausted_retries_roll_back() {
    let ledger = setup().await;
    let nft = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, nft, TUTORIAL, SubmissionStatus::Valid).await;
    ledger
        .inject(
            Fault::on(LedgerOp::Payout)
                .fail_with(LedgerError::Transient("connection refused".into()))
                .times(3),
        )
        .await;

    let report = payer(&ledger).run_pass().await.unwrap();

    assert_eq!(report.rolled_back(), 1);
    assert_eq!(report.attempts[0].attempts, 3);
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Valid);

    // The next pass picks it up again.
    let report = payer(&ledger).run_pass().await.unwrap();
    assert_eq!(report.paid(), 1);
}

#[tokio::test]
async fn test_permanent_errors_are_not_retried() {
    let ledger = setup().await;
    let nft = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, nft, TUTORIAL, SubmissionStatus::Valid).await;
    ledger
        .inject(
            Fault::on(LedgerOp::Payout)
                .fail_with(LedgerError::from_revert(
                    "execution reverted: Payout already made for this NFT ID and tutorial combination",
                ))
                .times(5),
        )
        .await;

    let report = payer(&ledger).run_pass().await.unwrap();

    assert_eq!(report.attempts[0].attempts, 1);
    match &report.attempts[0].outcome {
        PayoutOutcome::RolledBack { error } => assert_eq!(error.kind(), LedgerErrorKind::AlreadyPaid),
        other => panic!("expected rollback, got {other:?}"),
    }
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Valid);
}

#[tokio::test]
async fn test_payout_timeout_rolls_back_without_retry() {
    let ledger = setup().await;
    let nft = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, nft, TUTORIAL, SubmissionStatus::Valid).await;
    ledger
        .inject(Fault::on(LedgerOp::Payout).delay(Duration::from_secs(5)))
        .await;

    let settings = PayerSettings {
        payout_timeout: Duration::from_millis(50),
        ..fast_settings()
    };
    let report = Payer::new(Arc::new(ledger.clone()), settings)
        .run_pass()
        .await
        .unwrap();

    assert_eq!(report.attempts[0].attempts, 1);
    match &report.attempts[0].outcome {
        PayoutOutcome::RolledBack { error } => assert_eq!(error.kind(), LedgerErrorKind::Timeout),
        other => panic!("expected rollback, got {other:?}"),
    }
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Valid);
    assert_eq!(ledger.payout_count().await, 0);
}

#[tokio::test]
async fn test_failed_rollback_aborts_the_pass() {
    let ledger = setup().await;
    let first = submit(&ledger, TUTORIAL).await;
    let second = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, first, TUTORIAL, SubmissionStatus::Valid).await;
    set_status(&ledger, second, TUTORIAL, SubmissionStatus::Valid).await;
    ledger
        .inject(
            Fault::on(LedgerOp::Payout)
                .for_nft(first)
                .fail_with(LedgerError::Reverted("out of gas".into())),
        )
        .await;
    ledger
        .inject(
            Fault::on(LedgerOp::UpdateStatus)
                .for_nft(first)
                .writing(SubmissionStatus::Valid)
                .fail_with(LedgerError::Transient("relay unavailable".into())),
        )
        .await;

    let err = payer(&ledger).run_pass().await.unwrap_err();

    assert!(err.partial_report().unwrap().attempts.is_empty());
    match err.cause() {
        PayerError::CompensationFailed {
            key,
            payout_error,
            source,
        } => {
            assert_eq!(key.poap_nft_id, first);
            assert_eq!(payout_error.kind(), LedgerErrorKind::Reverted);
            assert_eq!(source.kind(), LedgerErrorKind::Transient);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Left PAID without a payout, and the rest of the batch untouched.
    assert_eq!(status_of(&ledger, first).await, SubmissionStatus::Paid);
    assert_eq!(status_of(&ledger, second).await, SubmissionStatus::Valid);
    assert_eq!(ledger.payout_count().await, 0);
}

#[tokio::test]
async fn test_aborted_pass_keeps_settled_payouts_for_the_audit_log() {
    let ledger = setup().await;
    let first = submit(&ledger, TUTORIAL).await;
    let second = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, first, TUTORIAL, SubmissionStatus::Valid).await;
    set_status(&ledger, second, TUTORIAL, SubmissionStatus::Valid).await;
    ledger
        .inject(
            Fault::on(LedgerOp::Payout)
                .for_nft(second)
                .fail_with(LedgerError::Reverted("out of gas".into())),
        )
        .await;
    ledger
        .inject(
            Fault::on(LedgerOp::UpdateStatus)
                .for_nft(second)
                .writing(SubmissionStatus::Valid)
                .fail_with(LedgerError::Transient("relay unavailable".into())),
        )
        .await;

    let err = payer(&ledger).run_pass().await.unwrap_err();
    assert!(matches!(
        err.cause(),
        PayerError::CompensationFailed { key, .. } if key.poap_nft_id == second
    ));

    let report = err.partial_report().unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.paid(), 1);
    assert_eq!(ledger.payout_count().await, 1);

    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    assert_eq!(db::record_pass(&pool, report).await.unwrap(), 1);
    let rows = db::get_all_attempts(&pool).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].poap_nft_id, first as i64);
    assert_eq!(rows[0].outcome, "paid");
    assert!(rows[0].tx_hash.is_some());
}

#[tokio::test]
async fn test_unprivileged_payer_cannot_mark_paid() {
    let ledger = setup().await;
    let nft = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, nft, TUTORIAL, SubmissionStatus::Valid).await;

    let user = ledger.connect(USER);
    let err = Payer::new(Arc::new(user), fast_settings())
        .run_pass()
        .await
        .unwrap_err();

    match err.cause() {
        PayerError::MarkPaid { key, source } => {
            assert_eq!(key.poap_nft_id, nft);
            assert_eq!(source.kind(), LedgerErrorKind::Unauthorized);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(status_of(&ledger, nft).await, SubmissionStatus::Valid);
    assert_eq!(ledger.payout_count().await, 0);
}

#[tokio::test]
async fn test_failed_fetch_aborts_the_pass() {
    let ledger = setup().await;
    ledger
        .inject(
            Fault::on(LedgerOp::ViewSubmissions)
                .fail_with(LedgerError::Transient("relay unavailable".into())),
        )
        .await;

    let err = payer(&ledger).run_pass().await.unwrap_err();
    assert!(matches!(err, PayerError::Ledger(LedgerError::Transient(_))));
}

#[tokio::test]
async fn test_concurrent_pass_is_rejected() {
    let ledger = setup().await;
    let nft = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, nft, TUTORIAL, SubmissionStatus::Valid).await;
    ledger
        .inject(Fault::on(LedgerOp::Payout).delay(Duration::from_millis(100)))
        .await;

    let payer = payer(&ledger);
    let (first, second) = tokio::join!(payer.run_pass(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        payer.run_pass().await
    });

    assert_eq!(first.unwrap().paid(), 1);
    assert!(matches!(second, Err(PayerError::PassInProgress)));
    assert_eq!(ledger.payout_count().await, 1);
}

#[tokio::test]
async fn test_only_the_approved_set_is_paid() {
    let ledger = setup().await;
    let approved = submit(&ledger, TUTORIAL).await;
    let pending = submit(&ledger, TUTORIAL).await;
    let invalid = submit(&ledger, TUTORIAL).await;
    let paid = submit(&ledger, TUTORIAL).await;
    set_status(&ledger, approved, TUTORIAL, SubmissionStatus::Approved).await;
    set_status(&ledger, invalid, TUTORIAL, SubmissionStatus::Invalid).await;
    set_status(&ledger, paid, TUTORIAL, SubmissionStatus::Paid).await;

    let report = payer(&ledger).run_pass().await.unwrap();

    assert_eq!(report.fetched, 4);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].key.poap_nft_id, approved);
    assert_eq!(status_of(&ledger, approved).await, SubmissionStatus::Paid);
    assert_eq!(status_of(&ledger, pending).await, SubmissionStatus::Pending);
    assert_eq!(status_of(&ledger, invalid).await, SubmissionStatus::Invalid);
    assert_eq!(status_of(&ledger, paid).await, SubmissionStatus::Paid);
    assert_eq!(ledger.payout_count().await, 1);
}

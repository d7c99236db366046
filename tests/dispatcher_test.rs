mod common;

use std::sync::Arc;

use common::{test_config, ClickFault, FakeFactory, PASSWORD, USERNAME};
use fasih_review::error::{AppError, SessionError};
use fasih_review::services::{ActionDispatcher, SessionController};
use tokio_util::sync::CancellationToken;

const REVIEW_URL: &str =
    "https://fasih-sm.bps.go.id/survey-collection/survey-review/a1/t1/p1/a/1";

async fn logged_in(dir: &std::path::Path) -> (Arc<FakeFactory>, ActionDispatcher) {
    let config = test_config(dir);
    let factory = FakeFactory::new(&config);
    let session = Arc::new(SessionController::new(&config, factory.clone()));
    session.start_login(USERNAME, PASSWORD).await.unwrap();
    (factory, ActionDispatcher::new(&config, session))
}

#[tokio::test]
async fn test_click_succeeds_and_confirms_dialogs() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    factory.with_site(|s| s.confirm_dialogs = 2);

    let outcome = dispatcher
        .perform_action(REVIEW_URL, "buttonApprove", 5, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message, "buttonApprove clicked successfully");
    let clicks = factory.with_site(|s| s.clicks.clone());
    assert_eq!(clicks.len(), 1 + 1 + 2);
    assert!(clicks[2..].iter().all(|c| c.starts_with("xpath:")));
}

#[tokio::test]
async fn test_transient_errors_below_limit_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    factory.with_site(|s| {
        s.fault(
            "buttonApprove",
            &[ClickFault::Stale, ClickFault::Intercepted, ClickFault::Stale],
        )
    });

    let outcome = dispatcher
        .perform_action(REVIEW_URL, "buttonApprove", 5, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(factory.with_site(|s| s.clicks_on("buttonApprove")), 1);
}

#[tokio::test]
async fn test_attempts_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    factory.with_site(|s| s.fault("buttonRevoke", &[ClickFault::Stale; 3]));

    let outcome = dispatcher
        .perform_action(REVIEW_URL, "buttonRevoke", 3, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.message, "Failed to click buttonRevoke after 3 attempts");
    assert_eq!(factory.with_site(|s| s.clicks_on("buttonRevoke")), 0);
}

#[tokio::test]
async fn test_missing_button_times_out_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    factory.with_site(|s| {
        s.hidden.insert("#buttonReject".to_string());
    });

    let outcome = dispatcher
        .perform_action(REVIEW_URL, "buttonReject", 5, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.message.contains("timed out"));
    assert!(outcome.message.contains("#buttonReject"));
}

#[tokio::test]
async fn test_browser_closed_during_retry_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    factory.with_site(|s| s.fault("buttonApprove", &[ClickFault::CloseBrowser]));

    let outcome = dispatcher
        .perform_action(REVIEW_URL, "buttonApprove", 5, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(factory.opens(), 2);
    // 恢复后重新打开审阅页面
    let navigations = factory.with_site(|s| s.navigations.clone());
    assert_eq!(navigations.iter().filter(|u| *u == REVIEW_URL).count(), 2);
}

#[tokio::test]
async fn test_browser_closed_during_retry_without_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    factory.with_site(|s| {
        s.fault("buttonApprove", &[ClickFault::CloseBrowser]);
        s.session_valid = false;
        s.require_otp = true;
    });

    let err = dispatcher
        .perform_action(REVIEW_URL, "buttonApprove", 5, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Session(SessionError::ClosedDuringRetry)));
    assert!(err.is_run_fatal());
}

#[tokio::test]
async fn test_dead_session_without_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let factory = FakeFactory::new(&config);
    let session = Arc::new(SessionController::new(&config, factory.clone()));
    let dispatcher = ActionDispatcher::new(&config, session);

    let err = dispatcher
        .perform_action(REVIEW_URL, "buttonApprove", 5, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Session(SessionError::RecoveryFailed)));
    assert!(err.to_string().contains("Please login again"));
}

#[tokio::test]
async fn test_cancelled_before_click() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = dispatcher
        .perform_action(REVIEW_URL, "buttonApprove", 5, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    assert_eq!(factory.with_site(|s| s.clicks_on("buttonApprove")), 0);
}

#[tokio::test]
async fn test_single_attempt_does_not_retry() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    factory.with_site(|s| s.fault("buttonApprove", &[ClickFault::Intercepted]));

    let outcome = dispatcher
        .perform_action(REVIEW_URL, "buttonApprove", 1, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Failed to click buttonApprove after 1 attempts");

    // 故障已用完，下一次单次尝试直接成功
    let outcome = dispatcher
        .perform_action(REVIEW_URL, "buttonApprove", 1, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(factory.with_site(|s| s.clicks_on("buttonApprove")), 1);
}

#[tokio::test]
async fn test_more_faults_than_attempts_stops_at_limit() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, dispatcher) = logged_in(dir.path()).await;
    factory.with_site(|s| s.fault("buttonReject", &[ClickFault::Stale; 5]));

    let outcome = dispatcher
        .perform_action(REVIEW_URL, "buttonReject", 3, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.message, "Failed to click buttonReject after 3 attempts");
    let remaining = factory.with_site(|s| {
        s.click_faults
            .values()
            .map(|queue| queue.len())
            .sum::<usize>()
    });
    assert_eq!(remaining, 2);
}

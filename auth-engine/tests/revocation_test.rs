mod common;

use auth_engine::{
    models::{LegacyRole, TokenClass, DEFAULT_REVOCATION_REASON},
    services::{RevocationSweeper, SECURITY_MEASURE_REASON},
    utils::Clock,
};
use chrono::Duration;
use common::TestApp;

#[tokio::test]
async fn test_revocation_lives_until_expiry_then_is_swept() {
    let app = TestApp::spawn().await;
    let expires_at = app.clock.now() + Duration::minutes(10);

    let record = app
        .state
        .revocations
        .revoke("some-token", TokenClass::Access, Some("owner-1"), Some(expires_at), None)
        .await
        .unwrap();
    assert_eq!(record.reason, DEFAULT_REVOCATION_REASON);
    assert!(app.state.revocations.is_revoked("some-token").await.unwrap());
    assert!(!app.state.revocations.is_revoked("other-token").await.unwrap());

    assert_eq!(app.state.revocations.sweep_expired().await.unwrap(), 0);

    app.clock.advance(Duration::minutes(11));
    assert!(!app.state.revocations.is_revoked("some-token").await.unwrap());
    assert_eq!(app.state.revocations.sweep_expired().await.unwrap(), 1);
    assert_eq!(app.store.revocation_count().unwrap(), 0);
}

#[tokio::test]
async fn test_revoke_all_sessions_annotates_records_and_drops_refresh() {
    let app = TestApp::spawn().await;
    let principal = app.create_user("forced@example.com", LegacyRole::User).await;
    let tokens = app.state.auth.issue_session(&principal).await.unwrap();
    app.state
        .auth
        .end_session(&principal.id, Some(&tokens.access_token))
        .await
        .unwrap();
    app.state.auth.issue_session(&principal).await.unwrap();

    let annotated = app
        .state
        .auth
        .revoke_all_sessions(&principal.id, None)
        .await
        .unwrap();
    assert_eq!(annotated, 1);
    assert!(app.user(&principal.id).await.refresh_token.is_none());

    let records = app.store.revocations_for_owner(&principal.id).unwrap();
    assert!(records.iter().all(|r| r.reason == SECURITY_MEASURE_REASON));
}

#[tokio::test]
async fn test_sweeper_stops_on_shutdown() {
    let app = TestApp::spawn().await;
    let sweeper = RevocationSweeper::new(
        app.state.revocations.clone(),
        std::time::Duration::from_millis(10),
    );
    let shutdown = sweeper.shutdown_token();
    let handle = sweeper.start();

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    shutdown.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("sweeper exits after cancellation")
        .expect("sweeper task did not panic");
}

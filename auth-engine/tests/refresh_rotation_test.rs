mod common;

use auth_engine::{
    models::{LegacyRole, TokenClass},
    services::{ServiceError, REFRESH_REUSE_REASON},
};
use chrono::Duration;
use common::TestApp;

#[tokio::test]
async fn test_rotation_invalidates_previous_secret() {
    let app = TestApp::spawn().await;
    let principal = app.create_user("rotate@example.com", LegacyRole::User).await;

    let first = app.state.auth.issue_session(&principal).await.unwrap();
    let second = app
        .state
        .auth
        .rotate(&principal.id, &first.refresh_token)
        .await
        .expect("first rotation succeeds");
    assert_ne!(first.refresh_token, second.refresh_token);

    let third = app
        .state
        .auth
        .rotate(&principal.id, &second.refresh_token)
        .await
        .expect("rotating the current secret succeeds");
    assert_ne!(second.refresh_token, third.refresh_token);
}

#[tokio::test]
async fn test_replayed_secret_kills_the_session() {
    let app = TestApp::spawn().await;
    let principal = app.create_user("replay@example.com", LegacyRole::User).await;

    let first = app.state.auth.issue_session(&principal).await.unwrap();
    let second = app
        .state
        .auth
        .rotate(&principal.id, &first.refresh_token)
        .await
        .unwrap();

    let replay = app.state.auth.rotate(&principal.id, &first.refresh_token).await;
    assert!(matches!(replay, Err(ServiceError::InvalidRefreshToken)));

    // The legitimate holder is signed out as well.
    let legit = app.state.auth.rotate(&principal.id, &second.refresh_token).await;
    assert!(matches!(legit, Err(ServiceError::InvalidRefreshToken)));
    assert!(app.user(&principal.id).await.refresh_token.is_none());

    let records = app.store.revocations_for_owner(&principal.id).unwrap();
    assert!(records
        .iter()
        .any(|r| r.token_class == TokenClass::Refresh && r.reason == REFRESH_REUSE_REASON));
}

#[tokio::test]
async fn test_expired_refresh_is_rejected() {
    let app = TestApp::spawn().await;
    let principal = app.create_user("stale@example.com", LegacyRole::User).await;

    let tokens = app.state.auth.issue_session(&principal).await.unwrap();
    app.clock.advance(Duration::days(31));

    let result = app.state.auth.rotate(&principal.id, &tokens.refresh_token).await;
    assert!(matches!(result, Err(ServiceError::InvalidRefreshToken)));
    assert!(app.user(&principal.id).await.refresh_token.is_none());
}

#[tokio::test]
async fn test_logout_revokes_bearer_and_refresh() {
    let app = TestApp::spawn().await;
    let principal = app.create_user("logout@example.com", LegacyRole::User).await;

    let tokens = app.state.auth.issue_session(&principal).await.unwrap();
    app.state
        .auth
        .validate_bearer(&tokens.access_token)
        .await
        .expect("fresh bearer is valid");

    app.state
        .auth
        .end_session(&principal.id, Some(&tokens.access_token))
        .await
        .unwrap();

    let bearer = app.state.auth.validate_bearer(&tokens.access_token).await;
    assert!(matches!(bearer, Err(ServiceError::InvalidToken)));

    let refresh = app.state.auth.rotate(&principal.id, &tokens.refresh_token).await;
    assert!(matches!(refresh, Err(ServiceError::InvalidRefreshToken)));
}

#[tokio::test]
async fn test_bearer_expires_after_an_hour() {
    let app = TestApp::spawn().await;
    let principal = app.create_user("expiry@example.com", LegacyRole::User).await;

    let tokens = app.state.auth.issue_session(&principal).await.unwrap();
    app.clock.advance(Duration::minutes(61));

    let result = app.state.auth.validate_bearer(&tokens.access_token).await;
    assert!(matches!(result, Err(ServiceError::InvalidToken)));
}

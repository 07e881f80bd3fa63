mod common;

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::storage::SecureStore;
use chrono::Duration as ChronoDuration;
use common::{token, FakeAuthService, Harness, Renewal, CREDENTIAL_KEY};
use core_auth::{AuthError, AuthState, Credential, CredentialStore, LoginRequest};
use core_runtime::events::{AuthEvent, CoreEvent};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

struct BrokenStore;

#[async_trait]
impl SecureStore for BrokenStore {
    async fn set_secret(&self, _key: &str, _value: &[u8]) -> BridgeResult<()> {
        Err(BridgeError::NotAvailable("keychain locked".to_string()))
    }

    async fn get_secret(&self, _key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Err(BridgeError::NotAvailable("keychain locked".to_string()))
    }

    async fn delete_secret(&self, _key: &str) -> BridgeResult<()> {
        Err(BridgeError::NotAvailable("keychain locked".to_string()))
    }
}

async fn seed(h: &Harness, ttl_secs: i64) -> Credential {
    let now = h.clock.base();
    let credential = Credential::new(
        token(now, ttl_secs, "A"),
        now + ChronoDuration::seconds(ttl_secs),
        "A",
    );
    CredentialStore::new(Arc::clone(&h.store), CREDENTIAL_KEY)
        .set(credential.clone())
        .await
        .unwrap();
    credential
}

#[tokio::test(start_paused = true)]
async fn test_init_restores_valid_credential() {
    let h = Harness::new();
    let credential = seed(&h, 600).await;

    assert_eq!(h.controller.init().await.unwrap(), AuthState::Authenticated);
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 0);
    assert_eq!(h.controller.credential(), Some(credential.clone()));
    assert_eq!(
        h.controller.renewal_armed_at(),
        Some(credential.expires_at - ChronoDuration::seconds(60))
    );

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.session_id.as_deref(), Some("A"));
    assert_eq!(snapshot.user.map(|u| u.id), Some("u1".to_string()));
    assert!(h.controller.csrf_token().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_init_renews_expired_credential() {
    let h = Harness::new();
    let stale = seed(&h, 600).await;
    sleep(Duration::from_secs(601)).await;

    assert_eq!(h.controller.init().await.unwrap(), AuthState::Authenticated);
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
    let renewed = h.controller.credential().unwrap();
    assert_ne!(renewed, stale);
    assert_eq!(renewed.issued_session_id, "A");
}

#[tokio::test(start_paused = true)]
async fn test_init_without_session_stays_signed_out() {
    let mut h = Harness::new();
    h.service
        .script_renewals([Renewal::Fail(AuthError::SessionExpired)]);

    assert_eq!(h.controller.init().await.unwrap(), AuthState::Unauthenticated);
    assert!(h.controller.credential().is_none());

    // Nothing was held, so nothing is reported as signed out.
    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, CoreEvent::Auth(AuthEvent::SignedOut { .. }))));
}

#[tokio::test(start_paused = true)]
async fn test_init_with_rejected_profile_renews() {
    let h = Harness::new();
    seed(&h, 600).await;
    h.service.fail_profile(AuthError::SessionExpired);
    h.service
        .script_renewals([Renewal::Fail(AuthError::SessionExpired)]);

    assert_eq!(h.controller.init().await.unwrap(), AuthState::Unauthenticated);
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
    assert!(h.stored_credential().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_init_with_broken_storage_enters_error() {
    let h = Harness::with_store(Arc::new(BrokenStore));

    let err = h.controller.init().await.unwrap_err();
    assert!(matches!(err, AuthError::SecureStorageUnavailable(_)));
    assert_eq!(h.controller.state(), AuthState::Error);

    // Error is recoverable through a fresh attempt.
    let err = h
        .controller
        .login(LoginRequest::new("ada@example.com", "hunter22"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SecureStorageUnavailable(_)));
    assert_eq!(h.controller.state(), AuthState::Error);
}

#[tokio::test(start_paused = true)]
async fn test_init_twice_is_rejected() {
    let h = Harness::new();
    seed(&h, 600).await;
    h.controller.init().await.unwrap();

    let err = h.controller.init().await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidTransition { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_login_then_logout_round_trip() {
    let mut h = Harness::new();
    h.login().await;

    assert_eq!(h.controller.state(), AuthState::Authenticated);
    assert!(h.stored_credential().await.is_some());
    let events = h.drain_events();
    assert!(matches!(events.first(), Some(CoreEvent::Auth(AuthEvent::StateChanged { .. }))));
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::Auth(AuthEvent::SignedIn { session_id, .. }) if session_id == "A")));

    h.controller.logout().await.unwrap();
    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
    assert!(h.stored_credential().await.is_none());
    assert!(h.controller.csrf_token().is_none());
    assert!(h.controller.sessions().is_empty());
    assert!(h.controller.renewal_armed_at().is_none());
    assert_eq!(h.controller.snapshot().user, None);
    assert_eq!(FakeAuthService::count(&h.service.logout_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_logout_is_idempotent() {
    let mut h = Harness::new();
    h.controller.logout().await.unwrap();
    assert!(h.drain_events().is_empty());
    assert_eq!(FakeAuthService::count(&h.service.logout_calls), 0);

    h.login().await;
    h.drain_events();
    h.controller.logout().await.unwrap();
    h.controller.logout().await.unwrap();

    let signed_out = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, CoreEvent::Auth(AuthEvent::SignedOut { forced: false, .. })))
        .count();
    assert_eq!(signed_out, 1);
    assert_eq!(FakeAuthService::count(&h.service.logout_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_login_returns_to_unauthenticated() {
    let mut h = Harness::new();
    h.service.fail_login(AuthError::InvalidCredentials);

    let err = h
        .controller
        .login(LoginRequest::new("ada@example.com", "wrong-pass"))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
    assert!(h.stored_credential().await.is_none());
    assert_eq!(FakeAuthService::count(&h.service.login_calls), 1);

    // Wrong credentials will not fix themselves on retry.
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        CoreEvent::Auth(AuthEvent::AuthError { recoverable: false, .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_offline_login_failure_is_recoverable() {
    let mut h = Harness::new();
    h.service
        .fail_login(AuthError::NetworkUnavailable("offline".to_string()));

    let err = h
        .controller
        .login(LoginRequest::new("ada@example.com", "hunter22"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        CoreEvent::Auth(AuthEvent::AuthError { recoverable: true, .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_watchers_see_sign_in() {
    let h = Harness::new();
    let mut watcher = h.controller.subscribe();

    let controller = h.controller.clone();
    let login = tokio::spawn(async move {
        controller
            .login(LoginRequest::new("ada@example.com", "hunter22"))
            .await
    });

    loop {
        watcher.changed().await.unwrap();
        if watcher.borrow_and_update().state == AuthState::Authenticated {
            break;
        }
    }
    login.await.unwrap().unwrap();
    assert_eq!(watcher.borrow().session_id.as_deref(), Some("A"));
}

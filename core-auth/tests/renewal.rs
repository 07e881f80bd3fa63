mod common;

use common::{FakeAuthService, Harness, Renewal};
use core_auth::{AuthError, AuthState};
use core_runtime::events::{AuthEvent, CoreEvent};
use futures::future::join_all;
use tokio::time::{sleep, Duration};

fn refreshed_count(events: &[CoreEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CoreEvent::Auth(AuthEvent::TokenRefreshed { .. })))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_renewal_rearms_from_new_expiry() {
    let h = Harness::new();
    h.service.set_login_ttl(120);
    h.login().await;

    let t0 = h.clock.base().timestamp();
    assert_eq!(h.controller.renewal_armed_at().unwrap().timestamp(), t0 + 60);

    h.service.script_renewals([Renewal::Issue(3660)]);
    sleep(Duration::from_secs(59)).await;
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);

    let issued = h.service.last_issue().unwrap().timestamp();
    assert_eq!(issued, t0 + 60);
    assert_eq!(
        h.controller.renewal_armed_at().unwrap().timestamp(),
        issued + 3600
    );
    assert_eq!(h.controller.state(), AuthState::Authenticated);
    assert_eq!(
        h.controller.credential().unwrap().expires_at.timestamp(),
        issued + 3660
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_renewal_signs_out_and_cancels_timer() {
    let mut h = Harness::new();
    h.service.set_login_ttl(120);
    h.login().await;
    h.drain_events();

    h.service
        .script_renewals([Renewal::Fail(AuthError::SessionExpired)]);
    sleep(Duration::from_secs(61)).await;

    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
    assert!(h.controller.credential().is_none());
    assert!(h.stored_credential().await.is_none());
    assert!(h.controller.renewal_armed_at().is_none());
    assert!(h.controller.csrf_token().is_none());

    sleep(Duration::from_secs(300)).await;
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);

    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::Auth(AuthEvent::SessionExpired { .. }))));
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::Auth(AuthEvent::SignedOut { forced: true, .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_without_leaving_authenticated() {
    let mut h = Harness::new();
    h.service.set_login_ttl(120);
    h.login().await;
    let original = h.controller.credential().unwrap();
    h.drain_events();

    h.service
        .script_renewals([Renewal::Hang, Renewal::Hang, Renewal::Issue(900)]);

    // First attempt is cut off by the 15 s request timeout at t0+75.
    sleep(Duration::from_secs(70)).await;
    assert!(h.controller.state().is_authenticated());
    assert_eq!(h.controller.credential(), Some(original.clone()));

    sleep(Duration::from_secs(10)).await;
    assert!(h.controller.state().is_authenticated());
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 2);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(h.controller.state(), AuthState::Authenticated);
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 3);
    assert_ne!(h.controller.credential(), Some(original));

    let events = h.drain_events();
    assert_eq!(refreshed_count(&events), 1);
    assert!(!events.iter().any(|e| matches!(
        e,
        CoreEvent::Auth(AuthEvent::StateChanged { to, .. }) if to == "unauthenticated" || to == "error"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_defer_to_expiry() {
    let mut h = Harness::new();
    h.service.set_login_ttl(120);
    h.login().await;
    let expires_at = h.controller.credential().unwrap().expires_at;
    h.drain_events();

    let offline = || Renewal::Fail(AuthError::NetworkUnavailable("offline".to_string()));
    h.service.script_renewals([offline(), offline(), offline()]);

    sleep(Duration::from_secs(65)).await;
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 3);
    assert_eq!(h.controller.state(), AuthState::Authenticated);
    assert_eq!(h.controller.renewal_armed_at(), Some(expires_at));
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        CoreEvent::Auth(AuthEvent::AuthError { recoverable: true, .. })
    )));

    // Back online by the time the credential expires.
    sleep(Duration::from_secs(60)).await;
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 4);
    assert_eq!(h.controller.state(), AuthState::Authenticated);
    assert!(h.controller.credential().unwrap().expires_at > expires_at);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_after_expiry_sign_out() {
    let h = Harness::new();
    h.service.set_login_ttl(1);
    h.service.set_refresh_delay(Duration::from_secs(2));
    let offline = || Renewal::Fail(AuthError::NetworkUnavailable("offline".to_string()));
    h.service.script_renewals([offline(), offline(), offline()]);
    h.login().await;

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
    assert!(h.stored_credential().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_refresh_is_single_flight() {
    let h = Harness::new();
    h.login().await;
    h.service.set_refresh_delay(Duration::from_secs(2));

    let results = join_all((0..5).map(|_| h.controller.refresh())).await;

    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
    let first = results[0].clone().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), &first);
    }
    assert_eq!(h.controller.credential(), Some(first));

    h.controller.refresh().await.unwrap();
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_failure() {
    let h = Harness::new();
    h.login().await;
    h.service.set_refresh_delay(Duration::from_secs(1));
    h.service
        .script_renewals([Renewal::Fail(AuthError::InvalidCredentials)]);

    let results = join_all((0..3).map(|_| h.controller.refresh())).await;
    for result in results {
        assert_eq!(result.unwrap_err(), AuthError::InvalidCredentials);
    }
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn test_logout_wins_over_inflight_renewal() {
    let h = Harness::new();
    h.login().await;
    h.service.set_refresh_delay(Duration::from_secs(5));

    let controller = h.controller.clone();
    let renewal = tokio::spawn(async move { controller.refresh().await });

    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.controller.state(), AuthState::Refreshing);
    h.controller.logout().await.unwrap();

    assert_eq!(renewal.await.unwrap().unwrap_err(), AuthError::NotAuthenticated);
    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
    assert!(h.controller.credential().is_none());
    assert!(h.stored_credential().await.is_none());
    assert!(h.controller.renewal_armed_at().is_none());

    sleep(Duration::from_secs(3600)).await;
    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_renewal_refetches_csrf() {
    let h = Harness::new();
    h.login().await;
    assert_eq!(h.controller.csrf_token().unwrap().value, "csrf-1");

    h.controller.refresh().await.unwrap();
    assert!(h
        .controller
        .csrf_token()
        .unwrap()
        .value
        .starts_with("csrf-fetched-"));
}

#[tokio::test(start_paused = true)]
async fn test_already_expired_token_is_rejected() {
    let h = Harness::new();
    h.login().await;
    h.service.script_renewals([Renewal::Issue(-5)]);

    let err = h.controller.refresh().await.unwrap_err();
    assert!(matches!(err, AuthError::MalformedToken(_)));
    assert_eq!(h.controller.state(), AuthState::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn test_timer_fire_and_manual_refresh_share_one_call() {
    let h = Harness::new();
    h.service.set_login_ttl(120);
    h.login().await;
    h.service.set_refresh_delay(Duration::from_secs(2));

    // Timer fires at t0+60; the manual call lands while it is in flight.
    sleep(Duration::from_millis(60_500)).await;
    assert_eq!(h.controller.state(), AuthState::Refreshing);

    let credential = h.controller.refresh().await.unwrap();
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
    assert_eq!(h.controller.credential(), Some(credential));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_after_relogin_does_not_join_previous_session() {
    let h = Harness::new();
    h.login().await;
    h.service.set_refresh_delay(Duration::from_secs(5));

    let controller = h.controller.clone();
    let stale = tokio::spawn(async move { controller.refresh().await });
    sleep(Duration::from_secs(1)).await;

    h.controller.logout().await.unwrap();
    h.login().await;
    h.service.set_refresh_delay(Duration::ZERO);

    let renewed = h.controller.refresh().await.unwrap();
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 2);
    assert_eq!(h.controller.credential(), Some(renewed.clone()));

    assert_eq!(stale.await.unwrap().unwrap_err(), AuthError::NotAuthenticated);
    assert_eq!(h.controller.state(), AuthState::Authenticated);
    assert_eq!(h.controller.credential(), Some(renewed));
    assert!(h.controller.renewal_armed_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_new_session_timer_renews_while_old_renewal_runs() {
    let h = Harness::new();
    let t0 = h.clock.base().timestamp();
    h.login().await;
    h.service.set_refresh_delay(Duration::from_secs(5));

    let controller = h.controller.clone();
    let stale = tokio::spawn(async move { controller.refresh().await });
    sleep(Duration::from_secs(1)).await;

    h.controller.logout().await.unwrap();
    // Expires at t0+63, so the new timer fires at t0+3 while the old
    // renewal is still waiting on the server.
    h.service.set_login_ttl(62);
    h.login().await;
    assert_eq!(h.controller.renewal_armed_at().unwrap().timestamp(), t0 + 3);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(stale.await.unwrap().unwrap_err(), AuthError::NotAuthenticated);
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 2);
    assert_eq!(h.controller.state(), AuthState::Authenticated);

    let issued = h.service.last_issue().unwrap().timestamp();
    assert_eq!(issued, t0 + 8);
    assert_eq!(
        h.controller.credential().unwrap().expires_at.timestamp(),
        issued + 900
    );
    assert_eq!(
        h.controller.renewal_armed_at().unwrap().timestamp(),
        issued + 840
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_inflight_renewal_from_rearming() {
    let h = Harness::new();
    h.login().await;
    h.service.set_refresh_delay(Duration::from_secs(5));

    let controller = h.controller.clone();
    let renewal = tokio::spawn(async move { controller.refresh().await });
    sleep(Duration::from_secs(1)).await;
    h.controller.shutdown();

    let credential = renewal.await.unwrap().unwrap();
    assert_eq!(h.controller.credential(), Some(credential));
    assert!(h.controller.renewal_armed_at().is_none());

    sleep(Duration::from_secs(3600)).await;
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
    assert!(h.controller.renewal_armed_at().is_none());

    assert_eq!(h.controller.refresh().await.unwrap_err(), AuthError::ShutDown);
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_backoff_stops_retrying() {
    let h = Harness::new();
    h.service.set_login_ttl(120);
    h.login().await;
    let expires_at = h.controller.credential().unwrap().expires_at;

    let offline = || Renewal::Fail(AuthError::NetworkUnavailable("offline".to_string()));
    h.service.script_renewals([offline(), offline(), offline()]);

    // First attempt fails at t0+60 and the retry waits out its backoff.
    sleep(Duration::from_millis(60_100)).await;
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
    h.controller.shutdown();

    sleep(Duration::from_secs(600)).await;
    assert_eq!(FakeAuthService::count(&h.service.refresh_calls), 1);
    assert!(h.controller.renewal_armed_at().is_none());
    assert_eq!(h.controller.credential().unwrap().expires_at, expires_at);
    assert_eq!(h.controller.state(), AuthState::Authenticated);
}

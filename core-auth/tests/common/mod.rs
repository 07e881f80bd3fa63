#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::{MemorySecureStore, SecureStore};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_auth::claims::encode_unsigned;
use core_auth::{
    AuthError, DeviceTrust, LoginRequest, LoginResponse, RefreshResponse, RegisterRequest, Result,
    Session, SessionController, User,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration, Instant};

pub const CREDENTIAL_KEY: &str = "session_credential";

/// Wall clock driven by the paused Tokio timer.
pub struct PausedClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl PausedClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            start: Instant::now(),
        })
    }

    pub fn base(&self) -> DateTime<Utc> {
        self.base
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
    }
}

/// Unsigned access token expiring `ttl_secs` after `now`.
pub fn token(now: DateTime<Utc>, ttl_secs: i64, session_id: &str) -> String {
    encode_unsigned(&json!({
        "exp": now.timestamp() + ttl_secs,
        "sid": session_id,
        "sub": "u1",
    }))
}

pub fn user() -> User {
    User {
        id: "u1".to_string(),
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        email_verified: true,
        role: Some("member".to_string()),
    }
}

pub fn session(id: &str, is_current: bool) -> Session {
    let at = DateTime::<Utc>::from_timestamp(1_699_990_000, 0).unwrap();
    Session {
        id: id.to_string(),
        device_descriptor: format!("Browser on {id}"),
        ip_address: Some("203.0.113.7".to_string()),
        created_at: at,
        last_activity_at: at,
        is_current,
        remember_me: false,
        trusted: false,
    }
}

/// One scripted answer to a renewal request.
pub enum Renewal {
    /// Fresh token valid for this many seconds
    Issue(i64),
    Fail(AuthError),
    /// Never answers; the controller's request timeout cuts it off
    Hang,
}

/// Scripted Auth Service. Unscripted renewals issue a 15 minute token.
pub struct FakeAuthService {
    clock: Arc<PausedClock>,
    session_id: String,
    login_ttl: Mutex<i64>,
    login_error: Mutex<Option<AuthError>>,
    renewals: Mutex<VecDeque<Renewal>>,
    refresh_delay: Mutex<Duration>,
    sessions: Mutex<Vec<Session>>,
    terminate_error: Mutex<Option<AuthError>>,
    profile_error: Mutex<Option<AuthError>>,
    trust_delay: Mutex<Duration>,
    password_error: Mutex<Option<AuthError>>,
    last_issue: Mutex<Option<DateTime<Utc>>>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub terminate_calls: AtomicUsize,
    pub csrf_calls: AtomicUsize,
}

impl FakeAuthService {
    pub fn new(clock: Arc<PausedClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            session_id: "A".to_string(),
            login_ttl: Mutex::new(900),
            login_error: Mutex::new(None),
            renewals: Mutex::new(VecDeque::new()),
            refresh_delay: Mutex::new(Duration::ZERO),
            sessions: Mutex::new(vec![session("A", true), session("B", false)]),
            terminate_error: Mutex::new(None),
            profile_error: Mutex::new(None),
            trust_delay: Mutex::new(Duration::ZERO),
            password_error: Mutex::new(None),
            last_issue: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            terminate_calls: AtomicUsize::new(0),
            csrf_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_login_ttl(&self, secs: i64) {
        *self.login_ttl.lock().unwrap() = secs;
    }

    pub fn fail_login(&self, error: AuthError) {
        *self.login_error.lock().unwrap() = Some(error);
    }

    pub fn script_renewals(&self, script: impl IntoIterator<Item = Renewal>) {
        self.renewals.lock().unwrap().extend(script);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn fail_terminate(&self, error: AuthError) {
        *self.terminate_error.lock().unwrap() = Some(error);
    }

    pub fn fail_profile(&self, error: AuthError) {
        *self.profile_error.lock().unwrap() = Some(error);
    }

    pub fn set_trust_delay(&self, delay: Duration) {
        *self.trust_delay.lock().unwrap() = delay;
    }

    pub fn fail_change_password(&self, error: AuthError) {
        *self.password_error.lock().unwrap() = Some(error);
    }

    /// When the last renewal token was issued.
    pub fn last_issue(&self) -> Option<DateTime<Utc>> {
        *self.last_issue.lock().unwrap()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl core_auth::AuthService for FakeAuthService {
    async fn login(&self, _request: &LoginRequest) -> Result<LoginResponse> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.login_error.lock().unwrap().clone() {
            return Err(error);
        }
        let ttl = *self.login_ttl.lock().unwrap();
        Ok(LoginResponse {
            access_token: token(self.clock.now(), ttl, &self.session_id),
            session_id: self.session_id.clone(),
            csrf_token: "csrf-1".to_string(),
            user: user(),
            device_trust: None,
        })
    }

    async fn refresh(&self) -> Result<RefreshResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let next = self.renewals.lock().unwrap().pop_front();
        let ttl = match next {
            None => 900,
            Some(Renewal::Issue(ttl)) => ttl,
            Some(Renewal::Fail(error)) => return Err(error),
            Some(Renewal::Hang) => {
                sleep(Duration::from_secs(24 * 3600)).await;
                return Err(AuthError::NetworkUnavailable("hung".to_string()));
            }
        };

        let now = self.clock.now();
        *self.last_issue.lock().unwrap() = Some(now);
        Ok(RefreshResponse {
            access_token: token(now, ttl, &self.session_id),
            user: Some(user()),
            session_id: None,
        })
    }

    async fn logout(&self, _: &str, _: Option<String>, _: Option<String>) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_profile(&self, _access_token: &str) -> Result<User> {
        match self.profile_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(user()),
        }
    }

    async fn list_sessions(&self, _access_token: &str) -> Result<Vec<Session>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn terminate_session(&self, _: &str, _: &str, session_id: &str) -> Result<()> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.terminate_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.sessions.lock().unwrap().retain(|s| s.id != session_id);
        Ok(())
    }

    async fn terminate_all_other_sessions(&self, _: &str, _: &str) -> Result<()> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.terminate_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.sessions.lock().unwrap().retain(|s| s.is_current);
        Ok(())
    }

    async fn trust_device(&self, _: &str, _: &str, device_name: &str) -> Result<DeviceTrust> {
        let delay = *self.trust_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(DeviceTrust {
            trusted: true,
            device_name: Some(device_name.to_string()),
        })
    }

    async fn fetch_csrf_token(&self) -> Result<String> {
        let n = self.csrf_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("csrf-fetched-{n}"))
    }

    async fn register(&self, _: &RegisterRequest) -> Result<()> {
        Ok(())
    }

    async fn forgot_password(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn reset_password(&self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn verify_email(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn resend_verification(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn change_password(&self, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
        match self.password_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct UnreachableHttp;

#[async_trait]
impl HttpClient for UnreachableHttp {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Err(BridgeError::OperationFailed("no network in tests".to_string()))
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub service: Arc<FakeAuthService>,
    pub store: Arc<dyn SecureStore>,
    pub clock: Arc<PausedClock>,
    pub events: broadcast::Receiver<CoreEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemorySecureStore::new()))
    }

    pub fn with_store(store: Arc<dyn SecureStore>) -> Self {
        let clock = PausedClock::new();
        let service = FakeAuthService::new(Arc::clone(&clock));
        let config = CoreConfig::builder()
            .api_base_url("https://auth.example.com")
            .http_client(Arc::new(UnreachableHttp))
            .secure_store(Arc::clone(&store))
            .clock(clock.clone())
            .credential_key(CREDENTIAL_KEY)
            .build()
            .unwrap();
        let event_bus = EventBus::new(256);
        let events = event_bus.subscribe();
        let controller = SessionController::new(&config, service.clone(), event_bus);

        Self {
            controller,
            service,
            store,
            clock,
            events,
        }
    }

    pub async fn login(&self) {
        self.controller
            .login(LoginRequest::new("ada@example.com", "hunter22"))
            .await
            .unwrap();
    }

    pub async fn stored_credential(&self) -> Option<Vec<u8>> {
        self.store.get_secret(CREDENTIAL_KEY).await.unwrap()
    }

    /// Every event emitted so far.
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

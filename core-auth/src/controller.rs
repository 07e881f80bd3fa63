//! # Session Lifecycle Controller
//!
//! Drives the authentication state machine for one client.
//!
//! ## Overview
//!
//! The controller owns the [`CredentialStore`], the [`CsrfCache`], the
//! [`SessionRegistry`] and the [`RenewalScheduler`], talks to the
//! [`AuthService`], and publishes every change as an [`AuthSnapshot`] (watch
//! channel) and as [`CoreEvent`]s on the event bus.
//!
//! ## Concurrency
//!
//! - Commits (credential writes, timer arming, machine transitions) happen
//!   under one async state lock.
//! - Renewal is single-flight: concurrent callers share one spawned task and
//!   one network call.
//! - Logout bumps a generation counter; a renewal or login whose generation
//!   no longer matches discards its result, so logout always wins. A
//!   renewal left over from an ended session is never joined by callers of
//!   the next one.
//! - After [`SessionController::shutdown`] nothing arms a timer again and
//!   no new renewal starts.
//! - The renewal timer holds a `Weak` handle and never keeps a dropped
//!   controller alive.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{LoginRequest, SessionController};
//! use core_runtime::{config::CoreConfig, events::EventBus};
//!
//! # async fn example(config: CoreConfig) -> core_auth::Result<()> {
//! let controller = SessionController::with_http(config, EventBus::default());
//! controller.init().await?;
//!
//! if !controller.state().is_authenticated() {
//!     controller
//!         .login(LoginRequest::new("ada@example.com", "correct horse 1"))
//!         .await?;
//! }
//!
//! let sessions = controller.refresh_sessions().await?;
//! println!("{} active sessions", sessions.len());
//! # Ok(())
//! # }
//! ```

use crate::api::{AuthService, HttpAuthService};
use crate::claims::decode_claims;
use crate::credential_store::CredentialStore;
use crate::csrf::CsrfCache;
use crate::error::{AuthError, Result};
use crate::registry::SessionRegistry;
use crate::scheduler::{fire_time, RenewalScheduler};
use crate::state::{self, AuthInput, AuthMachine};
use crate::types::{
    AuthSnapshot, AuthState, Credential, CsrfToken, DeviceTrust, LoginRequest, RegisterRequest,
    Session, User,
};
use crate::validation;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_async::sync::{broadcast, watch, Mutex};
use core_async::time::{sleep, timeout, Duration};
use core_runtime::config::{CoreConfig, RenewalPolicy};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, SessionEvent};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

type RenewalFuture = Shared<BoxFuture<'static, Result<Credential>>>;

/// The renewal every concurrent caller is waiting on.
struct InFlight {
    id: u64,
    /// Session generation the renewal was started under
    generation: u64,
    future: RenewalFuture,
}

/// Everything guarded by the state lock.
struct ControllerState {
    machine: AuthMachine,
    /// Bumped whenever a session ends or a new one starts
    generation: u64,
    user: Option<User>,
    device_trust: Option<DeviceTrust>,
}

struct Inner {
    service: Arc<dyn AuthService>,
    credentials: CredentialStore,
    csrf: CsrfCache,
    registry: SessionRegistry,
    scheduler: RenewalScheduler,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    snapshot: watch::Sender<AuthSnapshot>,
    state: Mutex<ControllerState>,
    inflight: std::sync::Mutex<Option<InFlight>>,
    next_flight: AtomicU64,
    shut_down: AtomicBool,
    request_timeout: Duration,
    renewal_margin: Duration,
    policy: RenewalPolicy,
}

/// Cheaply cloneable handle to one client's session lifecycle.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Creates a controller over an explicit [`AuthService`].
    pub fn new(config: &CoreConfig, service: Arc<dyn AuthService>, event_bus: EventBus) -> Self {
        let (snapshot, _) = watch::channel(AuthSnapshot::default());
        let inner = Inner {
            credentials: CredentialStore::new(
                Arc::clone(&config.secure_store),
                config.credential_key.clone(),
            ),
            csrf: CsrfCache::new(),
            registry: SessionRegistry::new(Arc::clone(&service)),
            scheduler: RenewalScheduler::new(Arc::clone(&config.clock)),
            clock: Arc::clone(&config.clock),
            service,
            event_bus,
            snapshot,
            state: Mutex::new(ControllerState {
                machine: AuthMachine::new(),
                generation: 0,
                user: None,
                device_trust: None,
            }),
            inflight: std::sync::Mutex::new(None),
            next_flight: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            request_timeout: config.request_timeout,
            renewal_margin: config.renewal_margin,
            policy: config.renewal_policy,
        };

        debug!(
            request_timeout_ms = config.request_timeout.as_millis() as u64,
            renewal_margin_s = config.renewal_margin.as_secs(),
            "SessionController created"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates a controller talking HTTP to `config.api_base_url`.
    pub fn with_http(config: CoreConfig, event_bus: EventBus) -> Self {
        let service: Arc<dyn AuthService> = Arc::new(HttpAuthService::new(config.clone()));
        Self::new(&config, service, event_bus)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Restore a session at startup.
    ///
    /// A stored, unexpired credential is restored directly and its renewal
    /// armed. An expired or missing one triggers a silent renewal through the
    /// ambient refresh cookie; if that fails the client ends unauthenticated.
    /// Only a secure-storage failure is returned as an error.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<AuthState> {
        let inner = &self.inner;
        {
            let st = inner.state.lock().await;
            let current = state::current(&st.machine);
            if !matches!(current, AuthState::Unauthenticated | AuthState::Error) {
                return Err(AuthError::InvalidTransition {
                    state: current.to_string(),
                    action: "initialize".to_string(),
                });
            }
        }

        inner.refetch_csrf(None).await;

        let mut st = inner.state.lock().await;
        let loaded = match inner.credentials.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Credential storage unavailable at startup");
                inner.transition(&mut st, AuthInput::Fault, "initialize")?;
                inner.emit(AuthEvent::AuthError {
                    session_id: None,
                    message: e.to_string(),
                    recoverable: false,
                });
                return Err(e);
            }
        };

        match loaded {
            Some(credential) if !credential.is_expired_at(inner.clock.now()) => {
                inner.transition(&mut st, AuthInput::Restore, "initialize")?;
                st.generation += 1;
                let generation = st.generation;
                inner.arm_renewal(&credential);
                drop(st);
                info!(
                    session_id = %credential.issued_session_id,
                    expires_at = credential.expires_at.timestamp(),
                    "Session restored"
                );

                match inner.call(inner.service.get_profile(&credential.access_token)).await {
                    Ok(user) => {
                        let mut st = inner.state.lock().await;
                        if st.generation == generation {
                            st.user = Some(user);
                            inner.publish(&st);
                        }
                    }
                    Err(e) if e.is_terminal() => {
                        info!(error = %e, "Restored credential rejected, renewing");
                        if let Err(renewal) = self.refresh().await {
                            debug!(error = %renewal, "Renewal after profile rejection failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to load profile for restored session"),
                }
            }
            stale => {
                drop(st);
                debug!(had_credential = stale.is_some(), "No valid credential, trying silent renewal");
                if let Err(e) = self.refresh().await {
                    info!(error = %e, "Silent renewal failed, continuing signed out");
                }
            }
        }

        Ok(self.state())
    }

    /// Sign in with email and password.
    ///
    /// Input is validated locally first and the state is left untouched on a
    /// validation error. Any remote failure returns to `Unauthenticated`
    /// without retrying.
    #[instrument(skip(self, request), fields(remember_me = request.remember_me))]
    pub async fn login(&self, request: LoginRequest) -> Result<AuthSnapshot> {
        validation::validate_login(&request)?;
        let inner = &self.inner;

        let generation = {
            let mut st = inner.state.lock().await;
            inner.transition(&mut st, AuthInput::LoginAttempt, "log in")?;
            st.generation += 1;
            st.generation
        };
        inner.emit(AuthEvent::SigningIn);
        info!("Signing in");

        let result = inner.call(inner.service.login(&request)).await;

        let mut st = inner.state.lock().await;
        if st.generation != generation {
            debug!("Login finished after logout, discarding response");
            return Err(AuthError::NotAuthenticated);
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Login failed");
                inner.transition(&mut st, AuthInput::LoginFailed, "log in")?;
                inner.emit(AuthEvent::AuthError {
                    session_id: None,
                    message: e.to_string(),
                    recoverable: !e.is_terminal(),
                });
                return Err(e);
            }
        };

        let credential =
            match inner.credential_from(&response.access_token, Some(response.session_id), None) {
                Ok(credential) => credential,
                Err(e) => {
                    warn!(error = %e, "Login returned an unusable token");
                    inner.transition(&mut st, AuthInput::LoginFailed, "log in")?;
                    return Err(e);
                }
            };

        if let Err(e) = inner.credentials.set(credential.clone()).await {
            warn!(error = %e, "Could not persist credential");
            inner.transition(&mut st, AuthInput::Fault, "log in")?;
            inner.emit(AuthEvent::AuthError {
                session_id: Some(credential.issued_session_id.clone()),
                message: e.to_string(),
                recoverable: false,
            });
            return Err(e);
        }

        inner
            .csrf
            .set(CsrfToken::new(response.csrf_token, inner.clock.now()));
        let user_id = response.user.id.clone();
        st.user = Some(response.user);
        st.device_trust = response.device_trust;
        inner.arm_renewal(&credential);
        inner.transition(&mut st, AuthInput::LoginSucceeded, "log in")?;

        info!(
            session_id = %credential.issued_session_id,
            expires_at = credential.expires_at.timestamp(),
            "Signed in"
        );
        inner.emit(AuthEvent::SignedIn {
            user_id,
            session_id: credential.issued_session_id.clone(),
        });

        Ok(inner.snapshot_of(&st))
    }

    /// Renew the access credential.
    ///
    /// Single-flight: callers arriving while a renewal is in progress join it
    /// and receive the same outcome. Transient failures are retried per the
    /// [`RenewalPolicy`]; any other failure signs the client out. A renewal
    /// still running for a session that has since ended is not joined.
    pub async fn refresh(&self) -> Result<Credential> {
        if self.inner.is_shut_down() {
            return Err(AuthError::ShutDown);
        }
        let generation = self.inner.state.lock().await.generation;

        let future = {
            let mut slot = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match slot.as_ref() {
                Some(flight) if flight.generation == generation => {
                    debug!(flight = flight.id, "Joining in-flight renewal");
                    flight.future.clone()
                }
                stale => {
                    if let Some(flight) = stale {
                        debug!(flight = flight.id, "Detaching renewal of an ended session");
                    }
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let handle = core_async::spawn(async move {
                        let outcome = inner.run_renewal(generation).await;
                        inner.finish_flight(id);
                        outcome
                    });
                    let future = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(AuthError::Other(format!("renewal task failed: {e}"))))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        generation,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }

    /// Sign out. Idempotent: while unauthenticated this does nothing.
    ///
    /// Local state is cleared before the server is told, and the server call
    /// is best effort.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let inner = &self.inner;

        let (credential, csrf) = {
            let mut st = inner.state.lock().await;
            if state::current(&st.machine) == AuthState::Unauthenticated {
                debug!("Already signed out");
                return Ok(());
            }

            let credential = inner.credentials.get();
            let csrf = inner.csrf.get();
            st.generation += 1;
            inner.end_session(&mut st).await;
            inner.transition(&mut st, AuthInput::LogoutRequested, "log out")?;
            inner.emit(AuthEvent::SignedOut {
                session_id: credential.as_ref().map(|c| c.issued_session_id.clone()),
                forced: false,
            });
            info!("Signed out");
            (credential, csrf)
        };

        if let Some(credential) = credential {
            let notify = inner.service.logout(
                &credential.access_token,
                csrf.map(|token| token.value),
                Some(credential.issued_session_id.clone()),
            );
            if let Err(e) = inner.call(notify).await {
                warn!(error = %e, "Server logout failed, local state already cleared");
            }
        }
        Ok(())
    }

    /// Stop all background renewal. Safe to call repeatedly.
    ///
    /// The timer is canceled, a renewal already in flight may still commit
    /// its credential but never arms a new timer, and later calls to
    /// [`refresh`](Self::refresh) fail with [`AuthError::ShutDown`].
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.scheduler.cancel();
        self.inner
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        debug!("SessionController shut down");
    }

    // ------------------------------------------------------------------
    // Session registry
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn refresh_sessions(&self) -> Result<Vec<Session>> {
        let credential = self.inner.authorized().await?;
        match self
            .inner
            .call(
                self.inner
                    .registry
                    .refresh(&credential.access_token, &credential.issued_session_id),
            )
            .await
        {
            Ok(sessions) => {
                self.inner
                    .emit_session(SessionEvent::RegistryRefreshed {
                        count: sessions.len(),
                        current_session_id: Some(credential.issued_session_id),
                    });
                Ok(sessions)
            }
            Err(e) => Err(self.recover(e).await),
        }
    }

    #[instrument(skip(self))]
    pub async fn terminate_session(&self, session_id: &str) -> Result<Vec<Session>> {
        let credential = self.inner.authorized().await?;
        let csrf = self.inner.csrf.require()?;
        let result = self
            .inner
            .call(self.inner.registry.terminate(
                &credential.access_token,
                &csrf.value,
                &credential.issued_session_id,
                session_id,
            ))
            .await;

        match result {
            Ok(sessions) => {
                self.inner.emit_session(SessionEvent::SessionTerminated {
                    session_id: session_id.to_string(),
                });
                Ok(sessions)
            }
            Err(e) => Err(self.recover(e).await),
        }
    }

    #[instrument(skip(self))]
    pub async fn terminate_all_other_sessions(&self) -> Result<Vec<Session>> {
        let credential = self.inner.authorized().await?;
        let csrf = self.inner.csrf.require()?;
        let result = self
            .inner
            .call(self.inner.registry.terminate_all_others(
                &credential.access_token,
                &csrf.value,
                &credential.issued_session_id,
            ))
            .await;

        match result {
            Ok(sessions) => {
                self.inner
                    .emit_session(SessionEvent::OtherSessionsTerminated {
                        remaining: sessions.len(),
                    });
                Ok(sessions)
            }
            Err(e) => Err(self.recover(e).await),
        }
    }

    /// Mark this device as trusted. Additive metadata: the lifecycle state
    /// does not change.
    #[instrument(skip(self))]
    pub async fn trust_device(&self, device_name: &str) -> Result<DeviceTrust> {
        validation::require_non_empty("device name", device_name)?;
        let inner = &self.inner;
        let credential = inner.authorized().await?;
        let csrf = inner.csrf.require()?;
        let generation = inner.state.lock().await.generation;

        let trust = match inner
            .call(
                inner
                    .service
                    .trust_device(&credential.access_token, &csrf.value, device_name),
            )
            .await
        {
            Ok(trust) => trust,
            Err(e) => return Err(self.recover(e).await),
        };

        let mut st = inner.state.lock().await;
        if st.generation != generation {
            debug!("Device trust answered after the session ended, discarding");
            return Err(AuthError::NotAuthenticated);
        }
        st.device_trust = Some(trust.clone());
        inner.publish(&st);
        info!(device_name = %device_name, "Device trusted");
        inner.emit(AuthEvent::DeviceTrusted {
            device_name: device_name.to_string(),
        });
        Ok(trust)
    }

    // ------------------------------------------------------------------
    // Relayed account flows
    // ------------------------------------------------------------------

    #[instrument(skip(self, request))]
    pub async fn register(&self, request: RegisterRequest) -> Result<()> {
        validation::validate_registration(&request)?;
        self.inner.call(self.inner.service.register(&request)).await
    }

    #[instrument(skip(self, email))]
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        validation::validate_email(email)?;
        self.inner
            .call(self.inner.service.forgot_password(email.trim()))
            .await
    }

    #[instrument(skip(self, token, password))]
    pub async fn reset_password(&self, token: &str, password: &str) -> Result<()> {
        validation::require_non_empty("reset token", token)?;
        validation::validate_password(password)?;
        self.inner
            .call(self.inner.service.reset_password(token, password))
            .await
    }

    #[instrument(skip(self, token))]
    pub async fn verify_email(&self, token: &str) -> Result<()> {
        validation::require_non_empty("verification token", token)?;
        self.inner.call(self.inner.service.verify_email(token)).await
    }

    #[instrument(skip(self, email))]
    pub async fn resend_verification(&self, email: &str) -> Result<()> {
        validation::validate_email(email)?;
        self.inner
            .call(self.inner.service.resend_verification(email.trim()))
            .await
    }

    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        validation::require_non_empty("current password", current_password)?;
        validation::validate_password(new_password)?;
        if current_password == new_password {
            return Err(AuthError::Validation(
                "new password must differ from the current one".to_string(),
            ));
        }

        let credential = self.inner.authorized().await?;
        let csrf = self.inner.csrf.require()?;
        match self
            .inner
            .call(self.inner.service.change_password(
                &credential.access_token,
                &csrf.value,
                current_password,
                new_password,
            ))
            .await
        {
            Ok(()) => {
                info!("Password changed");
                Ok(())
            }
            Err(e) => Err(self.recover(e).await),
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn state(&self) -> AuthState {
        self.inner.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Latest-value channel for the UI layer.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Every lifecycle event from now on.
    pub fn events(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.event_bus.subscribe()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.credentials.get()
    }

    pub fn csrf_token(&self) -> Option<CsrfToken> {
        self.inner.csrf.get()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.registry.sessions()
    }

    /// Fire time of the armed renewal, if any.
    pub fn renewal_armed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.scheduler.armed_at()
    }

    /// A server answer of `SessionExpired` means the credential was revoked
    /// early: renew before surfacing the error.
    async fn recover(&self, error: AuthError) -> AuthError {
        if error == AuthError::SessionExpired {
            info!("Request rejected as expired, renewing credential");
            if let Err(renewal) = self.refresh().await {
                debug!(error = %renewal, "Renewal after rejection failed");
            }
        }
        error
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .field("renewal_armed_at", &self.renewal_armed_at())
            .finish()
    }
}

impl Inner {
    /// One renewal, including transient retries. Runs inside its own task.
    async fn run_renewal(self: &Arc<Self>, generation: u64) -> Result<Credential> {
        let previous = {
            let mut st = self.state.lock().await;
            if st.generation != generation {
                debug!("Session ended before the renewal started");
                return Err(AuthError::NotAuthenticated);
            }
            let input = match state::current(&st.machine) {
                AuthState::Authenticated => AuthInput::RenewalStarted,
                _ => AuthInput::SilentRefresh,
            };
            self.transition(&mut st, input, "refresh")?;
            self.credentials.get()
        };

        let session_id = previous.as_ref().map(|c| c.issued_session_id.clone());
        self.emit(AuthEvent::TokenRefreshing {
            session_id: session_id.clone(),
        });

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.call(self.service.refresh()).await {
                Ok(response) => break Ok(response),
                Err(e)
                    if e.is_transient()
                        && attempt < self.policy.max_attempts
                        && !self.is_shut_down() =>
                {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Renewal failed, retrying"
                    );
                    sleep(delay).await;
                    if self.state.lock().await.generation != generation {
                        debug!("Session ended during renewal backoff");
                        return Err(AuthError::NotAuthenticated);
                    }
                    if self.is_shut_down() {
                        debug!("Shut down during renewal backoff");
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let mut st = self.state.lock().await;
        if st.generation != generation {
            debug!("Renewal finished after the session ended, discarding result");
            return Err(AuthError::NotAuthenticated);
        }

        let error = match outcome.and_then(|response| {
            self.credential_from(&response.access_token, response.session_id, previous.as_ref())
                .map(|credential| (credential, response.user))
        }) {
            Ok((credential, user)) => {
                if let Err(e) = self.credentials.set(credential.clone()).await {
                    warn!(error = %e, "Could not persist renewed credential");
                    self.end_session(&mut st).await;
                    self.transition(&mut st, AuthInput::Fault, "refresh")?;
                    self.emit(AuthEvent::AuthError {
                        session_id,
                        message: e.to_string(),
                        recoverable: false,
                    });
                    return Err(e);
                }

                if let Some(user) = user {
                    st.user = Some(user);
                }
                self.arm_renewal(&credential);
                self.transition(&mut st, AuthInput::RenewalSucceeded, "refresh")?;
                info!(
                    session_id = %credential.issued_session_id,
                    expires_at = credential.expires_at.timestamp(),
                    attempts = attempt,
                    "Credential renewed"
                );
                self.emit(AuthEvent::TokenRefreshed {
                    session_id: credential.issued_session_id.clone(),
                    expires_at: credential.expires_at.timestamp(),
                });
                drop(st);

                self.refetch_csrf(Some(generation)).await;
                return Ok(credential);
            }
            Err(e) => e,
        };

        let still_valid = previous
            .as_ref()
            .filter(|credential| !credential.is_expired_at(self.clock.now()));

        match still_valid {
            Some(credential) if error.is_transient() => {
                warn!(
                    attempts = attempt,
                    error = %error,
                    expires_at = credential.expires_at.timestamp(),
                    "Renewal deferred, credential still valid"
                );
                self.arm_renewal_at(credential.expires_at);
                self.transition(&mut st, AuthInput::RenewalDeferred, "refresh")?;
                self.emit(AuthEvent::AuthError {
                    session_id,
                    message: error.to_string(),
                    recoverable: true,
                });
            }
            _ => {
                warn!(error = %error, "Renewal rejected, signing out");
                st.generation += 1;
                self.end_session(&mut st).await;
                self.transition(&mut st, AuthInput::RenewalRejected, "refresh")?;
                if previous.is_some() {
                    self.emit(AuthEvent::SessionExpired {
                        session_id: session_id.clone(),
                    });
                    self.emit(AuthEvent::SignedOut {
                        session_id,
                        forced: true,
                    });
                }
            }
        }
        Err(error)
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn finish_flight(&self, id: u64) {
        let mut slot = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().map(|flight| flight.id) == Some(id) {
            *slot = None;
        }
    }

    /// Drop every piece of local session state. The machine transition is
    /// left to the caller.
    async fn end_session(&self, st: &mut ControllerState) {
        self.scheduler.cancel();
        self.credentials.clear().await;
        self.csrf.clear();
        self.registry.clear();
        st.user = None;
        st.device_trust = None;
    }

    /// The live credential, or `NotAuthenticated`.
    async fn authorized(&self) -> Result<Credential> {
        let st = self.state.lock().await;
        if !state::current(&st.machine).is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }
        self.credentials.get().ok_or(AuthError::NotAuthenticated)
    }

    /// Build a credential from a freshly issued token.
    ///
    /// The session id comes from the response, then the token's `sid` claim,
    /// then the credential being replaced.
    fn credential_from(
        &self,
        access_token: &str,
        response_session_id: Option<String>,
        previous: Option<&Credential>,
    ) -> Result<Credential> {
        if access_token.is_empty() {
            return Err(AuthError::MalformedToken("empty access token".to_string()));
        }
        let claims = decode_claims(access_token)?;
        if claims.expires_at <= self.clock.now() {
            return Err(AuthError::MalformedToken("token is already expired".to_string()));
        }

        let session_id = response_session_id
            .filter(|id| !id.is_empty())
            .or(claims.session_id)
            .or_else(|| previous.map(|c| c.issued_session_id.clone()))
            .ok_or_else(|| AuthError::MalformedToken("no session id for token".to_string()))?;

        Ok(Credential::new(access_token, claims.expires_at, session_id))
    }

    fn arm_renewal(self: &Arc<Self>, credential: &Credential) {
        self.arm_renewal_at(fire_time(credential.expires_at, self.renewal_margin));
    }

    fn arm_renewal_at(self: &Arc<Self>, fire_at: DateTime<Utc>) {
        if self.is_shut_down() {
            debug!(fire_at = %fire_at, "Controller shut down, not arming renewal");
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.scheduler.arm(fire_at, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let controller = SessionController { inner };
            if let Err(e) = controller.refresh().await {
                debug!(error = %e, "Scheduled renewal did not succeed");
            }
        });
    }

    /// Fetch a fresh CSRF token, best effort. With a generation, the token is
    /// only stored if no logout happened meanwhile.
    async fn refetch_csrf(&self, generation: Option<u64>) {
        match self.call(self.service.fetch_csrf_token()).await {
            Ok(value) => {
                if let Some(generation) = generation {
                    if self.state.lock().await.generation != generation {
                        return;
                    }
                }
                self.csrf.set(CsrfToken::new(value, self.clock.now()));
            }
            Err(e) => warn!(error = %e, "Could not fetch CSRF token"),
        }
    }

    /// Run one Auth Service call under the request timeout. A timeout counts
    /// as a transient network failure.
    async fn call<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::NetworkUnavailable(format!(
                "auth service did not answer within {:?}",
                self.request_timeout
            ))),
        }
    }

    fn transition(&self, st: &mut ControllerState, input: AuthInput, action: &str) -> Result<()> {
        let (from, to) = state::apply(&mut st.machine, input, action)?;
        if from != to {
            debug!(from = %from, to = %to, input = ?input, "Auth state changed");
            self.emit(AuthEvent::StateChanged {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.publish(st);
        Ok(())
    }

    fn snapshot_of(&self, st: &ControllerState) -> AuthSnapshot {
        let credential = self.credentials.get();
        AuthSnapshot {
            state: state::current(&st.machine),
            user: st.user.clone(),
            session_id: credential.as_ref().map(|c| c.issued_session_id.clone()),
            expires_at: credential.map(|c| c.expires_at),
            device_trust: st.device_trust.clone(),
        }
    }

    fn publish(&self, st: &ControllerState) {
        self.snapshot.send_replace(self.snapshot_of(st));
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.event_bus.emit(CoreEvent::Auth(event));
    }

    fn emit_session(&self, event: SessionEvent) {
        let _ = self.event_bus.emit(CoreEvent::Session(event));
    }
}

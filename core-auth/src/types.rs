//! Session Domain Types
//!
//! Value types shared by the credential store, the session registry and the
//! lifecycle controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the session controller.
///
/// # State Transitions
///
/// ```text
///                 LoginAttempt              LoginSucceeded
/// Unauthenticated ------------> Authenticating ------------> Authenticated
///      ^   |                                                   |      ^
///      |   | SilentRefresh                       RenewalStarted |      | RenewalSucceeded
///      |   +----------------------> Refreshing <---------------+      | RenewalDeferred
///      |                                |  +---------------------------+
///      +---------- RenewalRejected -----+
///
/// Fault (storage failure) -> Error;  LogoutRequested -> Unauthenticated
/// ```
///
/// # Examples
///
/// ```
/// use core_auth::AuthState;
///
/// assert!(!AuthState::Unauthenticated.is_authenticated());
/// assert!(AuthState::Refreshing.is_authenticated());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AuthState {
    /// No credential is held
    #[default]
    Unauthenticated,
    /// A login request is in flight
    Authenticating,
    /// A live credential is held
    Authenticated,
    /// A renewal call is in flight
    Refreshing,
    /// Local persistence failed while establishing a session
    Error,
}

impl AuthState {
    /// Returns `true` for `Authenticated` and `Refreshing`, the states that
    /// hold a live credential.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Refreshing)
    }

    /// Returns `true` while a login or renewal call is outstanding.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, AuthState::Authenticating | AuthState::Refreshing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated => "authenticated",
            AuthState::Refreshing => "refreshing",
            AuthState::Error => "error",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The live access credential.
///
/// `expires_at` comes from the token's `exp` claim and is used for scheduling
/// only. A credential is never mutated in place: login and renewal replace it
/// wholesale.
///
/// # Security
///
/// The `Debug` implementation redacts the token.
///
/// # Examples
///
/// ```
/// use core_auth::Credential;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let credential = Credential::new("eyJ...", now + Duration::minutes(5), "sess-1");
///
/// assert!(!credential.is_expired_at(now));
/// assert!(!format!("{credential:?}").contains("eyJ"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Server-side id of the session this credential belongs to
    pub issued_session_id: String,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        issued_session_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
            issued_session_id: issued_session_id.into(),
        }
    }

    /// Whether the credential is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, or `None` once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if self.is_expired_at(now) {
            None
        } else {
            Some(self.expires_at - now)
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("issued_session_id", &self.issued_session_id)
            .finish()
    }
}

/// One entry of the server's active-session list.
///
/// Sourced entirely from the Auth Service; never edited locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Browser / OS summary reported by the server
    #[serde(default)]
    pub device_descriptor: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub trusted: bool,
}

/// Anti-forgery token attached to every state-mutating request.
#[derive(Clone, PartialEq, Eq)]
pub struct CsrfToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

impl CsrfToken {
    pub fn new(value: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            issued_at,
        }
    }
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfToken")
            .field("value", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Profile of the signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub role: Option<String>,
}

/// Whether the current device has been marked trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTrust {
    pub trusted: bool,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// Credentials entered by the user.
///
/// `remember_me` is relayed to the server untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub remember_me: bool,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            remember_me: false,
        }
    }

    pub fn remember_me(mut self, remember: bool) -> Self {
        self.remember_me = remember;
        self
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

/// Account creation request.
#[derive(Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// What the UI layer observes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub user: Option<User>,
    pub session_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub device_trust: Option<DeviceTrust>,
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }
}

use thiserror::Error;

/// Failures surfaced by the session core.
///
/// `Clone` so one renewal outcome can be handed to every caller that joined
/// the in-flight attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session expired")]
    SessionExpired,

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("CSRF token missing or stale")]
    CsrfMismatch,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Cannot {action} while {state}")]
    InvalidTransition { state: String, action: String },

    #[error("Malformed access token: {0}")]
    MalformedToken(String),

    #[error("Invalid response from auth service: {0}")]
    InvalidResponse(String),

    #[error("Auth service answered {status}: {message}")]
    Unexpected { status: u16, message: String },

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Session controller has been shut down")]
    ShutDown,

    #[error("Stored credential corrupted: {0}")]
    TokenCorrupted(String),

    #[error("{0}")]
    Other(String),
}

impl AuthError {
    /// Connectivity-level failures that may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::NetworkUnavailable(_) | AuthError::InvalidResponse(_)
        )
    }

    /// Failures that prove the held credential can no longer be used.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials | AuthError::SessionExpired | AuthError::MalformedToken(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

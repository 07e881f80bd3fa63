//! CSRF Token Cache
//!
//! Holds the anti-forgery token owned by one controller. Populated at
//! startup, overwritten by the login response and by the refetch after every
//! renewal, cleared on logout.

use crate::error::{AuthError, Result};
use crate::types::CsrfToken;
use std::sync::RwLock;
use tracing::debug;

/// Header every state-mutating request carries.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, Default)]
pub struct CsrfCache {
    token: RwLock<Option<CsrfToken>>,
}

impl CsrfCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: CsrfToken) {
        debug!(issued_at = %token.issued_at, "CSRF token rotated");
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);
    }

    pub fn get(&self) -> Option<CsrfToken> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// The cached token, or [`AuthError::CsrfMismatch`] when none is held.
    ///
    /// Sending a mutating request without a token is guaranteed to be
    /// rejected, so callers fail fast instead.
    pub fn require(&self) -> Result<CsrfToken> {
        self.get().ok_or(AuthError::CsrfMismatch)
    }
}

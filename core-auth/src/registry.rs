//! Session Registry
//!
//! Client-side mirror of the server's active-session list. The list is only
//! ever replaced by a full re-fetch; mutations go to the server and are
//! followed by a mandatory refresh instead of being applied locally.

use crate::api::AuthService;
use crate::error::{AuthError, Result};
use crate::types::Session;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument, warn};

pub struct SessionRegistry {
    service: Arc<dyn AuthService>,
    sessions: RwLock<Vec<Session>>,
}

impl SessionRegistry {
    pub fn new(service: Arc<dyn AuthService>) -> Self {
        Self {
            service,
            sessions: RwLock::new(Vec::new()),
        }
    }

    /// Re-fetch the list and replace the local copy wholesale.
    #[instrument(skip(self, access_token))]
    pub async fn refresh(&self, access_token: &str, issued_session_id: &str) -> Result<Vec<Session>> {
        let sessions = self.service.list_sessions(access_token).await?;
        check_current(&sessions, issued_session_id);

        debug!(count = sessions.len(), "Session registry refreshed");
        *self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = sessions.clone();
        Ok(sessions)
    }

    /// End one other session. The caller's own session is ended through logout.
    #[instrument(skip(self, access_token, csrf))]
    pub async fn terminate(
        &self,
        access_token: &str,
        csrf: &str,
        issued_session_id: &str,
        session_id: &str,
    ) -> Result<Vec<Session>> {
        if session_id.trim().is_empty() {
            return Err(AuthError::Validation("session id must not be empty".to_string()));
        }
        if session_id == issued_session_id {
            return Err(AuthError::Validation(
                "cannot terminate the current session, log out instead".to_string(),
            ));
        }

        self.service
            .terminate_session(access_token, csrf, session_id)
            .await?;
        info!(session_id = %session_id, "Session terminated");

        self.refresh(access_token, issued_session_id).await
    }

    /// End every session except the current one.
    #[instrument(skip(self, access_token, csrf))]
    pub async fn terminate_all_others(
        &self,
        access_token: &str,
        csrf: &str,
        issued_session_id: &str,
    ) -> Result<Vec<Session>> {
        self.service
            .terminate_all_other_sessions(access_token, csrf)
            .await?;
        info!("Other sessions terminated");

        self.refresh(access_token, issued_session_id).await
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn current(&self) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|session| session.is_current)
            .cloned()
    }

    pub fn clear(&self) {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

/// The server is authoritative; a list that disagrees with the held
/// credential is logged, not rejected.
fn check_current(sessions: &[Session], issued_session_id: &str) {
    if sessions.is_empty() {
        return;
    }

    let current: Vec<&Session> = sessions.iter().filter(|s| s.is_current).collect();
    match current.as_slice() {
        [only] if only.id == issued_session_id => {}
        [only] => warn!(
            expected = %issued_session_id,
            reported = %only.id,
            "Server marks a different session as current"
        ),
        [] => warn!(expected = %issued_session_id, "Server list has no current session"),
        many => warn!(
            expected = %issued_session_id,
            count = many.len(),
            "Server list has several current sessions"
        ),
    }
}

//! Credential Store
//!
//! Durable, single-writer holder of the current access credential. The store
//! is pure data access: it knows nothing about renewal or state transitions.
//!
//! ## Security Features
//!
//! - The credential is serialized to JSON and handed to the host `SecureStore`
//!   (Keychain, Credential Manager, Secret Service)
//! - Token values are never logged
//! - Corrupted entries are erased on load
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{Credential, CredentialStore};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let store = CredentialStore::new(secure_store, "session_credential");
//!
//! let credential = Credential::new("eyJ...", chrono::Utc::now(), "sess-1");
//! store.set(credential).await?;
//! assert!(store.get().is_some());
//!
//! store.clear().await;
//! assert!(store.get().is_none());
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::Credential;
use bridge_traits::storage::SecureStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Secure storage for the session credential.
///
/// Reads are served from an in-memory copy; writes go to durable storage first
/// and only then replace the cached value, so the cache never holds a
/// credential that failed to persist.
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
    key: String,
    cached: RwLock<Option<Credential>>,
}

/// On-disk form. `expires_at` is kept as epoch seconds.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
    expires_at: i64,
    issued_session_id: String,
}

impl CredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        debug!(key = %key, "Initializing CredentialStore");
        Self {
            secure_store,
            key,
            cached: RwLock::new(None),
        }
    }

    /// Read the persisted credential into the cache.
    ///
    /// Returns:
    /// - `Ok(Some(credential))` if a valid entry exists
    /// - `Ok(None)` if nothing is stored, or the entry was corrupted (it is deleted)
    /// - `Err(SecureStorageUnavailable)` if the host store cannot be read
    pub async fn load(&self) -> Result<Option<Credential>> {
        let data = self
            .secure_store
            .get_secret(&self.key)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to read credential from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        let Some(data) = data else {
            debug!("No stored credential");
            self.replace_cached(None);
            return Ok(None);
        };

        let credential = match Self::decode(&data) {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Stored credential is corrupted, erasing it");
                if let Err(delete_err) = self.secure_store.delete_secret(&self.key).await {
                    warn!(error = %delete_err, "Failed to erase corrupted credential");
                }
                self.replace_cached(None);
                return Ok(None);
            }
        };

        info!(
            session_id = %credential.issued_session_id,
            expires_at = credential.expires_at.timestamp(),
            "Credential loaded"
        );
        self.replace_cached(Some(credential.clone()));
        Ok(Some(credential))
    }

    /// The cached credential, if any.
    pub fn get(&self) -> Option<Credential> {
        self.cached
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persist `credential` and make it the live one.
    pub async fn set(&self, credential: Credential) -> Result<()> {
        let stored = StoredCredential {
            access_token: credential.access_token.clone(),
            expires_at: credential.expires_at.timestamp(),
            issued_session_id: credential.issued_session_id.clone(),
        };

        let json = serde_json::to_vec(&stored).map_err(|e| {
            warn!(error = %e, "Failed to serialize credential");
            AuthError::Other(format!("credential serialization: {e}"))
        })?;

        self.secure_store
            .set_secret(&self.key, &json)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to write credential to secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            session_id = %credential.issued_session_id,
            expires_at = stored.expires_at,
            "Credential stored securely"
        );
        self.replace_cached(Some(credential));
        Ok(())
    }

    /// Drop the credential. The cache is always cleared; a failed durable
    /// delete is logged and otherwise ignored.
    pub async fn clear(&self) {
        self.replace_cached(None);
        match self.secure_store.delete_secret(&self.key).await {
            Ok(()) => info!("Credential cleared"),
            Err(e) => warn!(error = %e, "Failed to delete credential from secure storage"),
        }
    }

    pub fn is_expired(credential: &Credential, now: DateTime<Utc>) -> bool {
        credential.is_expired_at(now)
    }

    fn decode(data: &[u8]) -> Result<Credential> {
        let stored: StoredCredential = serde_json::from_slice(data)
            .map_err(|e| AuthError::TokenCorrupted(e.to_string()))?;
        let expires_at = DateTime::<Utc>::from_timestamp(stored.expires_at, 0).ok_or_else(|| {
            AuthError::TokenCorrupted(format!("expiry out of range: {}", stored.expires_at))
        })?;
        if stored.access_token.is_empty() {
            return Err(AuthError::TokenCorrupted("empty access token".to_string()));
        }
        Ok(Credential::new(
            stored.access_token,
            expires_at,
            stored.issued_session_id,
        ))
    }

    fn replace_cached(&self, credential: Option<Credential>) {
        *self
            .cached
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = credential;
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("key", &self.key)
            .field("has_credential", &self.get().is_some())
            .finish()
    }
}

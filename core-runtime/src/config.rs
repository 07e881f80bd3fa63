//! # Core Configuration Module
//!
//! Configuration for the session client core.
//!
//! ## Overview
//!
//! A builder assembles a [`CoreConfig`] holding the host bridges and the
//! tunables of the session lifecycle (request timeout, renewal margin, retry
//! policy). `build()` fails fast with an actionable message when a required
//! bridge is missing or a value is out of range.
//!
//! ## Required Dependencies
//!
//! - API base URL of the Auth Service
//! - `HttpClient` - transport (desktop default: reqwest with a cookie jar)
//! - `SecureStore` - credential persistence (desktop default: OS keychain)
//!
//! `Clock` defaults to [`SystemClock`]. Defaults for the two bridges are
//! injected only when the `desktop-shims` feature is enabled.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RenewalPolicy};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .http_client(Arc::new(MyHttpClient))
//!     .secure_store(Arc::new(MySecureStore))
//!     .request_timeout(Duration::from_secs(10))
//!     .renewal_policy(RenewalPolicy::default().with_max_attempts(5))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, HttpClient, SecureStore, SystemClock};
use core_async::time::backoff_delay;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default bound on every Auth Service call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default interval between scheduled renewal and credential expiry.
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(60);

/// Secure store key under which the session credential is persisted.
pub const DEFAULT_CREDENTIAL_KEY: &str = "session_credential";

const MAX_RENEWAL_MARGIN: Duration = Duration::from_secs(3600);

/// Retry policy for transient renewal failures.
///
/// Attempts are counted including the first call; delays grow exponentially
/// from `base_delay` and never exceed `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RenewalPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.max_delay)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Renewal policy needs at least one attempt".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::Config(format!(
                "Renewal base delay ({:?}) exceeds max delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Core configuration for the session client.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL every Auth Service route is joined onto
    pub api_base_url: Url,

    pub http_client: Arc<dyn HttpClient>,

    /// Durable credential storage
    pub secure_store: Arc<dyn SecureStore>,

    /// Wall-clock source for expiry and scheduling
    pub clock: Arc<dyn Clock>,

    /// Upper bound for a single Auth Service call
    pub request_timeout: Duration,

    /// How long before expiry the renewal task fires
    pub renewal_margin: Duration,

    pub renewal_policy: RenewalPolicy,

    /// Events buffered per event bus subscriber
    pub event_buffer_size: usize,

    /// Secure store key for the persisted credential
    pub credential_key: String,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("clock", &"Clock { ... }")
            .field("request_timeout", &self.request_timeout)
            .field("renewal_margin", &self.renewal_margin)
            .field("renewal_policy", &self.renewal_policy)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("credential_key", &self.credential_key)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The base URL is http(s)
    /// - The request timeout is non-zero
    /// - The renewal margin is below one hour
    /// - The retry policy has at least one attempt and ordered delays
    /// - The credential key and event buffer are non-empty
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "API base URL must use http or https, got '{}'",
                self.api_base_url.scheme()
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.renewal_margin >= MAX_RENEWAL_MARGIN {
            return Err(Error::Config(format!(
                "Renewal margin {:?} must be below {:?}",
                self.renewal_margin, MAX_RENEWAL_MARGIN
            )));
        }

        self.renewal_policy.validate()?;

        if self.credential_key.trim().is_empty() {
            return Err(Error::Config("Credential key cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolves an Auth Service route against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the path cannot be joined.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let url = config.endpoint("/auth/login")?;
    /// assert_eq!(url.as_str(), "https://api.example.com/v1/auth/login");
    /// ```
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.api_base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {}", path, e)))
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, hint: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} Desktop: enable the 'desktop-shims' feature for the default implementation.",
            hint
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(capability_missing(
        "SecureStore",
        "SecureStore implementation is required for credential persistence. \
         Mobile: inject Keychain/Keystore storage.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout).map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: e.to_string(),
    })?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "HttpClient implementation is required to reach the Auth Service. \
         Mobile: inject a URLSession/OkHttp adapter that keeps cookies.",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_base_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    clock: Option<Arc<dyn Clock>>,
    request_timeout: Option<Duration>,
    renewal_margin: Option<Duration>,
    renewal_policy: Option<RenewalPolicy>,
    event_buffer_size: Option<usize>,
    credential_key: Option<String>,
}

impl CoreConfigBuilder {
    /// Sets the Auth Service base URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().api_base_url("https://api.example.com");
    /// ```
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Replaces the wall clock, typically with a test clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Default: 15 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Default: 60 seconds
    pub fn renewal_margin(mut self, margin: Duration) -> Self {
        self.renewal_margin = Some(margin);
        self
    }

    /// Default: 3 attempts, 500 ms base delay, 5 s cap
    pub fn renewal_policy(mut self, policy: RenewalPolicy) -> Self {
        self.renewal_policy = Some(policy);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Default: `session_credential`
    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = Some(key.into());
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The base URL is missing or unparsable
    /// - A required bridge is missing and no desktop default is compiled in
    /// - A tunable is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let raw_url = self.api_base_url.ok_or_else(|| {
            Error::Config("API base URL is required. Use .api_base_url() to set it.".to_string())
        })?;
        let api_base_url = Url::parse(&raw_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL '{}': {}", raw_url, e)))?;

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(request_timeout)?,
        };
        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let config = CoreConfig {
            api_base_url,
            http_client,
            secure_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            request_timeout,
            renewal_margin: self.renewal_margin.unwrap_or(DEFAULT_RENEWAL_MARGIN),
            renewal_policy: self.renewal_policy.unwrap_or_default(),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            credential_key: self
                .credential_key
                .unwrap_or_else(|| DEFAULT_CREDENTIAL_KEY.to_string()),
        };

        config.validate()?;
        Ok(config)
    }
}

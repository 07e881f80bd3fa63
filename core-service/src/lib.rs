//! Core service façade and bootstrap helpers.
//!
//! Wires a [`CoreConfig`] (host bridges plus tunables) into one
//! [`SessionController`] and the shared [`EventBus`]. Desktop apps typically
//! enable the `desktop-shims` feature so the config builder can fall back to
//! the reqwest client and the OS keychain from `bridge-desktop`.

pub mod error;

pub use error::{CoreError, Result};

pub use core_auth::{AuthSnapshot, AuthState, SessionController};
pub use core_runtime::config::{CoreConfig, CoreConfigBuilder, RenewalPolicy};
pub use core_runtime::events::{CoreEvent, EventBus, EventStream};
pub use core_runtime::logging::{init_logging, LoggingConfig};

use std::sync::Arc;

use core_async::sync::broadcast;
use core_auth::AuthService;
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    event_bus: EventBus,
    controller: SessionController,
}

impl CoreService {
    /// Create a service talking HTTP to `config.api_base_url`.
    pub fn new(config: CoreConfig) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        let controller = SessionController::with_http(config.clone(), event_bus.clone());
        Self {
            config: Arc::new(config),
            event_bus,
            controller,
        }
    }

    /// Create a service over a caller-supplied Auth Service implementation.
    pub fn with_auth_service(config: CoreConfig, service: Arc<dyn AuthService>) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        let controller = SessionController::new(&config, service, event_bus.clone());
        Self {
            config: Arc::new(config),
            event_bus,
            controller,
        }
    }

    /// Restore any persisted session. Call once after construction.
    #[instrument(skip(self), fields(api = %self.config.api_base_url))]
    pub async fn start(&self) -> Result<AuthState> {
        let state = self.controller.init().await?;
        info!(state = %state, "Core service started");
        Ok(state)
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Subscribe to every core event.
    pub fn events(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Filterable stream over core events.
    pub fn event_stream(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Stop background renewal for good. The session itself is left intact.
    pub fn shutdown(&self) {
        self.controller.shutdown();
        info!("Core service shut down");
    }
}

/// Build the config, then construct and start a [`CoreService`].
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_service::{bootstrap, CoreConfig};
///
/// let core = bootstrap(CoreConfig::builder().api_base_url("https://auth.example.com")).await?;
/// println!("signed in: {}", core.controller().state().is_authenticated());
/// # Ok(())
/// # }
/// ```
pub async fn bootstrap(builder: CoreConfigBuilder) -> Result<CoreService> {
    let config = builder
        .build()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    let core = CoreService::new(config);
    core.start().await?;
    Ok(core)
}

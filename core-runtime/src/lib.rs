//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the session client crates:
//! - Logging and tracing bootstrap
//! - Configuration and host bridge wiring
//! - Event bus for lifecycle notifications

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, RenewalPolicy};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus, EventStream, SessionEvent};

//! # Host Bridge Traits
//!
//! Capabilities the session client core needs from its host but cannot
//! implement portably.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Request/response transport to the Auth Service
//! - [`SecureStore`](storage::SecureStore) - Durable credential storage (Keychain, Keystore, Secret Service)
//! - [`Clock`](time::Clock) - Wall-clock source, replaceable in tests
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Implementations
//!
//! | Platform | Crate |
//! |----------|-------|
//! | Desktop  | `bridge-desktop` |
//! | Tests    | [`MemorySecureStore`](storage::MemorySecureStore), hand-written fakes |
//!
//! ## Error Handling
//!
//! Every bridge returns [`BridgeError`](error::BridgeError). Transport
//! implementations must report timeouts and connection failures through the
//! dedicated variants so the core can tell transient failures from answers.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
//!
//! async fn fetch_profile(client: &dyn HttpClient, token: &str) -> bridge_traits::error::Result<String> {
//!     let request = HttpRequest::new(HttpMethod::Get, "https://api.example.com/auth/me")
//!         .bearer_token(token);
//!     client.execute(request).await?.text()
//! }
//! ```

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{MemorySecureStore, SecureStore};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};

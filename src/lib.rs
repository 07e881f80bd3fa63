//! Workspace entry crate.
//!
//! Re-exports the session core behind feature flags so host applications can
//! depend on `session-client` alone. `desktop-shims` (default) pulls in the
//! reqwest HTTP client and the OS keychain; `headless` leaves both bridges to
//! the host.

#[cfg(any(feature = "desktop-shims", feature = "headless"))]
pub use core_service::*;

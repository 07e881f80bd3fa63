//! # Authentication Session Core
//!
//! Client-side lifecycle of an authenticated session against a remote Auth
//! Service.
//!
//! ## Overview
//!
//! A short-lived bearer credential is held in memory and mirrored to the
//! platform secure store. A single scheduled task renews it shortly before
//! it expires, concurrent renewals collapse into one network call, and the
//! client's view of its active sessions is kept in sync with the server.
//!
//! ## Features
//!
//! - Explicit state machine (`Unauthenticated`, `Authenticating`,
//!   `Authenticated`, `Refreshing`, `Error`)
//! - Single-flight renewal with bounded retry of transient failures
//! - Logout that always wins over a renewal in flight
//! - CSRF token cache for state-changing calls
//! - Session registry with remote termination
//! - Lifecycle events on the shared event bus

pub mod api;
pub mod claims;
pub mod controller;
pub mod credential_store;
pub mod csrf;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod validation;

pub use api::{AuthService, HttpAuthService, LoginResponse, RefreshResponse};
pub use controller::SessionController;
pub use credential_store::CredentialStore;
pub use csrf::{CsrfCache, CSRF_HEADER};
pub use error::{AuthError, Result};
pub use registry::SessionRegistry;
pub use scheduler::{RenewalScheduler, RENEWAL_SAFETY_MARGIN};
pub use types::{
    AuthSnapshot, AuthState, Credential, CsrfToken, DeviceTrust, LoginRequest, RegisterRequest,
    Session, User,
};

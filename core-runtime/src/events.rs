//! # Event Bus System
//!
//! Typed, broadcast-based notifications from the session core to any number
//! of observers (UI layer, analytics, host shells).
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps one enum per domain: [`AuthEvent`]
//!   for the authentication lifecycle and [`SessionEvent`] for the session
//!   registry
//! - **EventBus**: Central broadcast channel
//! - **EventStream**: Receiver wrapper with predicate filtering
//!
//! Emission never blocks and never fails the operation that produced the
//! event; a bus with no subscribers simply drops it.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Auth(AuthEvent::SignedIn {
//!     user_id: "u-1".to_string(),
//!     session_id: "s-1".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.try_recv(), Ok(CoreEvent::Auth(AuthEvent::SignedIn { .. }))));
//! ```
//!
//! ## Lagging
//!
//! Each subscriber buffers up to the bus capacity. A subscriber that falls
//! further behind receives `RecvError::Lagged(n)` and resumes from the oldest
//! retained event. State observers that only care about the latest value
//! should prefer the controller's `watch`-based snapshot channel.

use core_async::sync::broadcast::{
    self,
    error::{RecvError, SendError},
    Receiver,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Authentication lifecycle events
    Auth(AuthEvent),
    /// Session registry events
    Session(SessionEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Session(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError {
                recoverable: true, ..
            }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::SessionExpired { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::SignedIn { .. })
            | CoreEvent::Auth(AuthEvent::SignedOut { .. })
            | CoreEvent::Session(SessionEvent::SessionTerminated { .. })
            | CoreEvent::Session(SessionEvent::OtherSessionsTerminated { .. }) => {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events describing the authentication lifecycle.
///
/// States are carried as their display names so this crate stays independent
/// of the state machine definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// The controller moved between lifecycle states.
    StateChanged { from: String, to: String },
    /// A login request is in flight.
    SigningIn,
    /// Login succeeded and a credential is held.
    SignedIn { user_id: String, session_id: String },
    /// Local state was cleared.
    SignedOut {
        session_id: Option<String>,
        /// `true` when the server rejected a renewal rather than the user asking.
        forced: bool,
    },
    /// A renewal call is in flight.
    TokenRefreshing { session_id: Option<String> },
    /// A new credential replaced the previous one.
    TokenRefreshed {
        session_id: String,
        /// Unix epoch seconds
        expires_at: i64,
    },
    /// The server rejected renewal; a forced logout follows.
    SessionExpired { session_id: Option<String> },
    /// Device marked as trusted for the current account.
    DeviceTrusted { device_name: String },
    /// An operation failed.
    AuthError {
        session_id: Option<String>,
        message: String,
        /// Whether the session survived the failure.
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::StateChanged { .. } => "Authentication state changed",
            AuthEvent::SigningIn => "Signing in",
            AuthEvent::SignedIn { .. } => "Signed in",
            AuthEvent::SignedOut { forced: true, .. } => "Signed out by the server",
            AuthEvent::SignedOut { .. } => "Signed out",
            AuthEvent::TokenRefreshing { .. } => "Renewing access credential",
            AuthEvent::TokenRefreshed { .. } => "Access credential renewed",
            AuthEvent::SessionExpired { .. } => "Session expired",
            AuthEvent::DeviceTrusted { .. } => "Device trusted",
            AuthEvent::AuthError { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Session Registry Events
// ============================================================================

/// Events describing the server-side session list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// The registry was re-fetched from the server.
    RegistryRefreshed {
        count: usize,
        current_session_id: Option<String>,
    },
    /// One remote session was terminated.
    SessionTerminated { session_id: String },
    /// Every session except the current one was terminated.
    OtherSessionsTerminated { remaining: usize },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::RegistryRefreshed { .. } => "Session list refreshed",
            SessionEvent::SessionTerminated { .. } => "Session terminated",
            SessionEvent::OtherSessionsTerminated { .. } => "Other sessions terminated",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Events buffered per subscriber before it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none. Callers that do not care use `let _ = bus.emit(..)`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with optional predicate filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let sessions_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Session(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned from `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next matching event.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns the next buffered matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drains every buffered matching event.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

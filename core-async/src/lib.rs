//! Async runtime facade for the session client core.
//!
//! Core crates depend on this crate instead of naming Tokio directly, so the
//! executor, timer and synchronization primitives are chosen in one place.
//!
//! # Modules
//!
//! - `task`: Task spawning
//! - `time`: Sleeping, timeouts and the pausable monotonic clock
//! - `sync`: Async-aware locks, channels and cancellation
//! - `runtime`: Runtime handles for synchronous call sites
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, timeout, Duration, Instant};

/// Waits on several branches and runs the first to complete.
pub use tokio::select;

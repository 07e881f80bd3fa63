//! Synchronization primitives.
//!
//! All primitives are async-aware Tokio types that are `Send + Sync` and never
//! block the executor. `CancellationToken` comes from `tokio-util` and is used
//! to stop armed background tasks.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{watch, Mutex};
//!
//! async fn example() {
//!     let mutex = Mutex::new(0u32);
//!     *mutex.lock().await += 1;
//!
//!     let (tx, rx) = watch::channel("unauthenticated");
//!     tx.send_replace("authenticated");
//!     assert_eq!(*rx.borrow(), "authenticated");
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
pub use tokio_util::sync::CancellationToken;

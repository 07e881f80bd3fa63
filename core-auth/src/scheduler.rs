//! Scheduled Renewal Task
//!
//! A cancellable, replaceable deferred action: "run this at time T unless
//! canceled". It has no knowledge of credentials; the controller decides what
//! the callback does.
//!
//! Fire times are absolute wall-clock instants read through the injected
//! [`Clock`]; the wait itself goes through the Tokio timer, so tests running
//! with a paused runtime can fast-forward it.

use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_async::sync::CancellationToken;
use core_async::time::{sleep, Duration};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// How long before expiry the renewal fires by default.
pub const RENEWAL_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// `expires_at - margin`.
///
/// # Examples
///
/// ```
/// use core_auth::scheduler::{fire_time, RENEWAL_SAFETY_MARGIN};
/// use chrono::{Duration, Utc};
///
/// let expires_at = Utc::now() + Duration::seconds(120);
/// assert_eq!(
///     fire_time(expires_at, RENEWAL_SAFETY_MARGIN),
///     expires_at - Duration::seconds(60)
/// );
/// ```
pub fn fire_time(expires_at: DateTime<Utc>, margin: Duration) -> DateTime<Utc> {
    let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
    expires_at - margin
}

struct ArmedTask {
    id: u64,
    fire_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Single-slot timer. Arming replaces whatever was armed before.
pub struct RenewalScheduler {
    clock: Arc<dyn Clock>,
    slot: Arc<Mutex<Option<ArmedTask>>>,
    next_id: AtomicU64,
}

impl RenewalScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `callback` at `fire_at`, canceling any previously armed task.
    ///
    /// A `fire_at` already in the past fires immediately. The slot is cleared
    /// before the callback runs, so the callback may arm the next task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F, Fut>(&self, fire_at: DateTime<Utc>, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        {
            let mut slot = lock(&self.slot);
            let previous = slot.replace(ArmedTask {
                id,
                fire_at,
                cancel: cancel.clone(),
            });
            if let Some(previous) = previous {
                previous.cancel.cancel();
            }
        }

        let delay = (fire_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        debug!(
            task_id = id,
            fire_at = %fire_at,
            delay_ms = delay.as_millis() as u64,
            "Renewal task armed"
        );

        let slot = Arc::clone(&self.slot);
        core_async::spawn(async move {
            core_async::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!(task_id = id, "Renewal task canceled");
                }
                _ = sleep(delay) => {
                    {
                        let mut guard = lock(&slot);
                        match guard.as_ref() {
                            Some(task) if task.id == id => *guard = None,
                            // Replaced between wake-up and here
                            _ => return,
                        }
                    }
                    debug!(task_id = id, "Renewal task firing");
                    callback().await;
                }
            }
        });
    }

    /// Cancel the armed task. No-op when nothing is armed.
    pub fn cancel(&self) {
        if let Some(task) = lock(&self.slot).take() {
            task.cancel.cancel();
            debug!(task_id = task.id, "Renewal task canceled");
        }
    }

    pub fn armed_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.slot).as_ref().map(|task| task.fire_at)
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("armed_at", &self.armed_at())
            .finish()
    }
}

fn lock(slot: &Mutex<Option<ArmedTask>>) -> MutexGuard<'_, Option<ArmedTask>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Time-related abstractions.
//!
//! `Instant`, `sleep` and `timeout` all come from the Tokio timer, so a test
//! runtime started with `start_paused = true` moves every one of them together.
//! Wall-clock time lives behind `bridge_traits::time::Clock`; this module only
//! deals in monotonic durations.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! async fn example() {
//!     let start = Instant::now();
//!     sleep(Duration::from_millis(5)).await;
//!     assert!(start.elapsed() >= Duration::from_millis(5));
//! }
//! ```

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};
pub use tokio::time::{error::Elapsed, sleep, sleep_until, timeout, Instant, Sleep, Timeout};

/// Returns the delay for a retry attempt using capped exponential backoff.
///
/// `attempt` is 1-based: the first retry waits `base`, the second `2 * base`,
/// and so on, never exceeding `max`.
///
/// # Examples
///
/// ```rust
/// use core_async::time::{backoff_delay, Duration};
///
/// let base = Duration::from_millis(500);
/// let max = Duration::from_secs(5);
/// assert_eq!(backoff_delay(1, base, max), Duration::from_millis(500));
/// assert_eq!(backoff_delay(3, base, max), Duration::from_millis(2000));
/// assert_eq!(backoff_delay(10, base, max), max);
/// ```
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(350);
        assert_eq!(backoff_delay(0, base, max), base);
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base, max), max);
        assert_eq!(backoff_delay(u32::MAX, base, max), max);
    }
}

//! # Exponential Backoff
//!
//! Per-item retry delay calculator used by the work queue error policy.
//! The schedule doubles from the minimum up to a hard cap, and resets on
//! the first successful sync of the item.

use std::time::Duration;

/// Exponential backoff calculator.
///
/// ```rust
/// use secrets_store_sync_controller::controller::ExponentialBackoff;
///
/// let mut backoff = ExponentialBackoff::new(1, 60);
/// assert_eq!(backoff.next_backoff_seconds(), 1);
/// assert_eq!(backoff.next_backoff_seconds(), 2);
/// assert_eq!(backoff.next_backoff_seconds(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_seconds: u64,
    /// Current backoff value in seconds
    current: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            current: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the schedule.
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current;
        self.current = (self.current * 2).min(self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the schedule.
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state.
    pub fn reset(&mut self) {
        self.current = self.min_seconds;
    }
}

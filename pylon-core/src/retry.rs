//! Retry schedule for backend calls
//!
//! Fixed delays rather than computed backoff: the gateway quotes callers a
//! bounded worst-case latency, so the schedule is part of the contract.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on any single backend HTTP attempt.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay schedule for backend attempts. The first attempt is immediate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySchedule {
    delays_ms: Vec<u64>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            delays_ms: vec![0, 500, 1_500, 4_500],
        }
    }
}

impl RetrySchedule {
    pub fn new(delays_ms: Vec<u64>) -> Self {
        Self { delays_ms }
    }

    /// Total attempts this schedule allows.
    pub fn max_attempts(&self) -> usize {
        self.delays_ms.len()
    }

    /// Delay to wait before the given attempt (0-indexed). `None` once the
    /// schedule is exhausted.
    pub fn delay_before(&self, attempt: usize) -> Option<Duration> {
        self.delays_ms
            .get(attempt)
            .map(|ms| Duration::from_millis(*ms))
    }
}

/// Whether an upstream HTTP status is worth another attempt.
///
/// Only server-side failures retry. Every 4xx (including a backend 402)
/// is a terminal answer about this request.
pub fn status_is_retryable(status: u16) -> bool {
    status >= 500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.max_attempts(), 4);
        assert_eq!(schedule.delay_before(0), Some(Duration::ZERO));
        assert_eq!(schedule.delay_before(1), Some(Duration::from_millis(500)));
        assert_eq!(schedule.delay_before(2), Some(Duration::from_millis(1_500)));
        assert_eq!(schedule.delay_before(3), Some(Duration::from_millis(4_500)));
        assert_eq!(schedule.delay_before(4), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(status_is_retryable(500));
        assert!(status_is_retryable(503));
        assert!(!status_is_retryable(400));
        assert!(!status_is_retryable(402));
        assert!(!status_is_retryable(404));
        assert!(!status_is_retryable(429));
    }
}

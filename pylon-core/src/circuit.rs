//! Per-capability circuit breaker
//!
//! Rolling-window breaker: once a capability shows a 50%+ failure rate over
//! the last five minutes (with at least five calls to judge by), the gateway
//! stops forwarding to it and fails fast until a half-open probe succeeds.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker tuning. Defaults match the gateway contract.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Rolling window over which the failure rate is computed.
    pub window: Duration,
    /// Minimum calls in the window before the breaker may trip.
    pub min_volume: usize,
    /// Failure fraction at or above which the breaker opens.
    pub failure_threshold: f64,
    /// How long an open breaker waits before admitting a probe.
    pub reopen_after: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            min_volume: 5,
            failure_threshold: 0.5,
            reopen_after: Duration::from_secs(30),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct LifetimeStats {
    successes: u64,
    failures: u64,
    total_latency_ms: u64,
}

#[derive(Debug)]
struct Inner {
    /// Recent outcomes: (when, succeeded).
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    stats: LifetimeStats,
}

/// Point-in-time view for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub successes: u64,
    pub failures: u64,
    pub total_calls: u64,
    pub avg_latency_ms: u64,
    pub window_failure_rate: f64,
}

/// One breaker guards one capability id.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                outcomes: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
                stats: LifetimeStats::default(),
            }),
        }
    }

    /// Ask to forward one call. `Err(())` means short-circuit: the breaker
    /// is open (or a half-open probe is already in flight).
    pub fn try_acquire(&self) -> Result<(), ()> {
        let mut inner = self.lock();
        Self::evict(&mut inner, self.config.window);

        match inner.opened_at {
            None => Ok(()),
            Some(opened) => {
                if opened.elapsed() < self.config.reopen_after {
                    Err(())
                } else if inner.probe_in_flight {
                    Err(())
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self, latency_ms: u64) {
        let mut inner = self.lock();
        let was_probe = inner.probe_in_flight;
        inner.stats.successes += 1;
        inner.stats.total_latency_ms += latency_ms;
        inner.outcomes.push_back((Instant::now(), true));
        Self::evict(&mut inner, self.config.window);

        if was_probe {
            // Probe succeeded: close and start from a clean window so stale
            // failures cannot immediately re-trip.
            inner.opened_at = None;
            inner.probe_in_flight = false;
            inner.outcomes.clear();
        }
    }

    pub fn record_failure(&self, latency_ms: u64) {
        let mut inner = self.lock();
        let was_probe = inner.probe_in_flight;
        inner.stats.failures += 1;
        inner.stats.total_latency_ms += latency_ms;
        inner.outcomes.push_back((Instant::now(), false));
        Self::evict(&mut inner, self.config.window);

        if was_probe {
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            return;
        }
        if inner.opened_at.is_some() {
            return;
        }

        let total = inner.outcomes.len();
        if total < self.config.min_volume {
            return;
        }
        let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
        if failures as f64 / total as f64 >= self.config.failure_threshold {
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.opened_at {
            None => CircuitState::Closed,
            Some(opened) if opened.elapsed() < self.config.reopen_after => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let inner = self.lock();
        let total_calls = inner.stats.successes + inner.stats.failures;
        let avg_latency_ms = if total_calls == 0 {
            0
        } else {
            inner.stats.total_latency_ms / total_calls
        };
        let window_total = inner.outcomes.len();
        let window_failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
        BreakerSnapshot {
            state,
            successes: inner.stats.successes,
            failures: inner.stats.failures,
            total_calls,
            avg_latency_ms,
            window_failure_rate: if window_total == 0 {
                0.0
            } else {
                window_failures as f64 / window_total as f64
            },
        }
    }

    fn evict(inner: &mut Inner, window: Duration) {
        let now = Instant::now();
        while let Some((when, _)) = inner.outcomes.front() {
            if now.duration_since(*when) > window {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Breaker state is small and updates never panic while holding the
        // lock, so poisoning cannot leave inconsistent data behind.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            window: Duration::from_secs(300),
            min_volume: 5,
            failure_threshold: 0.5,
            reopen_after: Duration::ZERO,
        }
    }

    #[test]
    fn test_stays_closed_under_min_volume() {
        let breaker = CircuitBreaker::default();
        for _ in 0..4 {
            breaker.record_failure(10);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_trips_at_threshold() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        for _ in 0..5 {
            breaker.record_failure(10);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_mixed_outcomes_below_threshold_stay_closed() {
        let breaker = CircuitBreaker::default();
        for _ in 0..6 {
            breaker.record_success(10);
        }
        for _ in 0..5 {
            breaker.record_failure(10);
        }
        // 5 failures out of 11 is under 50%.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..5 {
            breaker.record_failure(10);
        }
        // reopen_after is zero, so the breaker is immediately half-open.
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_ok());
        // Second caller is rejected while the probe is in flight.
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_probe_success_closes() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..5 {
            breaker.record_failure(10);
        }
        assert!(breaker.try_acquire().is_ok());
        breaker.record_success(10);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..5 {
            breaker.record_failure(10);
        }
        assert!(breaker.try_acquire().is_ok());
        breaker.record_failure(10);
        // reopen_after=0 means it is instantly probe-able again, but the
        // state machine did pass back through open.
        assert!(breaker.try_acquire().is_ok());
        breaker.record_failure(10);
        assert!(breaker.snapshot().failures >= 7);
    }

    #[test]
    fn test_snapshot_counters() {
        let breaker = CircuitBreaker::default();
        breaker.record_success(100);
        breaker.record_failure(300);
        let snap = breaker.snapshot();
        assert_eq!(snap.total_calls, 2);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.avg_latency_ms, 200);
    }
}

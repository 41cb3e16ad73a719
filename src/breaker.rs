//! Circuit breaker gating upstream calls.
//!
//! The mutex-guarded-state-plus-atomic-counters shape follows the rate limiter plugin's general
//! approach to shared mutable bookkeeping; the transition table itself is this component's own
//! (the rate limiter's token bucket has no closed/open/half_open analog).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// The breaker's current state, as observed by `state()` — never mutated directly, only derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
  Closed,
  Open,
  HalfOpen,
}

struct Transition {
  state: BreakerState,
  consecutive_failures: u32,
  consecutive_successes: u32,
  last_failure: Option<Instant>,
}

/// Closed/open/half-open state machine per the exact transition table this is grounded on.
pub struct CircuitBreaker {
  failure_threshold: u32,
  success_threshold: u32,
  open_timeout: Duration,
  transition: Mutex<Transition>,
  total_successes: AtomicU64,
  total_failures: AtomicU64,
}

impl CircuitBreaker {
  pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
    Self {
      failure_threshold,
      success_threshold,
      open_timeout,
      transition: Mutex::new(Transition {
        state: BreakerState::Closed,
        consecutive_failures: 0,
        consecutive_successes: 0,
        last_failure: None,
      }),
      total_successes: AtomicU64::new(0),
      total_failures: AtomicU64::new(0),
    }
  }

  /// Returns whether a call is allowed right now, lazily transitioning open -> half_open once
  /// `open_timeout` has elapsed since the last recorded failure.
  pub fn allow(&self) -> bool {
    let mut t = self.transition.lock();
    match t.state {
      BreakerState::Closed | BreakerState::HalfOpen => true,
      BreakerState::Open => {
        let elapsed_past_timeout = t
          .last_failure
          .map(|last| last.elapsed() > self.open_timeout)
          .unwrap_or(true);
        if elapsed_past_timeout {
          t.state = BreakerState::HalfOpen;
          t.consecutive_successes = 0;
          true
        } else {
          false
        }
      }
    }
  }

  /// Observes the current state without mutating it (but still accounts for the lazy timeout).
  pub fn state(&self) -> BreakerState {
    let t = self.transition.lock();
    match t.state {
      BreakerState::Open => {
        let elapsed_past_timeout = t
          .last_failure
          .map(|last| last.elapsed() > self.open_timeout)
          .unwrap_or(true);
        if elapsed_past_timeout {
          BreakerState::HalfOpen
        } else {
          BreakerState::Open
        }
      }
      other => other,
    }
  }

  /// Seconds remaining until an open breaker lazily transitions to half-open, rounded up.
  /// Used by the pipeline to set `retry_after` on the 503 it returns while open — per §7, that
  /// value is the *remaining* open timeout, not the full configured duration.
  pub fn remaining_open_secs(&self) -> u64 {
    let t = self.transition.lock();
    match (t.state, t.last_failure) {
      (BreakerState::Open, Some(last)) => {
        let elapsed = last.elapsed();
        if elapsed >= self.open_timeout {
          0
        } else {
          (self.open_timeout - elapsed).as_secs().max(1)
        }
      }
      (BreakerState::Open, None) => self.open_timeout.as_secs(),
      _ => 0,
    }
  }

  pub fn record_success(&self) {
    self.total_successes.fetch_add(1, Ordering::Relaxed);
    let mut t = self.transition.lock();
    match t.state {
      BreakerState::Closed => {
        t.consecutive_successes += 1;
        t.consecutive_failures = 0;
      }
      BreakerState::HalfOpen => {
        t.consecutive_successes += 1;
        if t.consecutive_successes >= self.success_threshold {
          t.state = BreakerState::Closed;
          t.consecutive_failures = 0;
        }
      }
      BreakerState::Open => {}
    }
  }

  pub fn record_failure(&self) {
    self.total_failures.fetch_add(1, Ordering::Relaxed);
    let mut t = self.transition.lock();
    match t.state {
      BreakerState::Closed => {
        t.consecutive_failures += 1;
        t.last_failure = Some(Instant::now());
        if t.consecutive_failures >= self.failure_threshold {
          t.state = BreakerState::Open;
        }
      }
      BreakerState::HalfOpen => {
        t.state = BreakerState::Open;
        t.last_failure = Some(Instant::now());
      }
      BreakerState::Open => {
        t.last_failure = Some(Instant::now());
      }
    }
  }

  pub fn total_successes(&self) -> u64 {
    self.total_successes.load(Ordering::Relaxed)
  }

  pub fn total_failures(&self) -> u64 {
    self.total_failures.load(Ordering::Relaxed)
  }
}

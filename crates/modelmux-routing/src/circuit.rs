//! Per-(provider, capability) circuit breaker
//!
//! Three-state machine driven by consecutive failures and a cool-off
//! timer. An open circuit that has cooled off promotes itself to
//! half-open when queried; the next outcome on that key decides whether
//! it closes or re-opens. The failure counter is not reset on opening,
//! so a half-open trial failure re-opens immediately with a fresh timer.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::provider_key;
use crate::registry::Capability;

/// Breaker state for one (provider, capability)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls flow through
    Closed,
    /// Provider is excluded until the cool-off elapses
    Open,
    /// Cooled off; one trial call decides the next state
    HalfOpen,
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Failure-isolation state machine per (provider, capability)
///
/// Transitions are linearized per key by the sharded map; a never-seen
/// key behaves as closed with zero failures. Under concurrency two
/// tasks may both observe a fresh half-open state and both probe; the
/// race is accepted, state still converges on the probes' outcomes.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cool_off: Duration,
    entries: DashMap<String, BreakerEntry>,
}

impl CircuitBreaker {
    /// Breaker with the given threshold (floored at 1) and cool-off
    pub fn new(failure_threshold: u32, cool_off: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cool_off,
            entries: DashMap::new(),
        }
    }

    /// Whether the circuit currently excludes this provider
    ///
    /// Returns true only while open and not yet cooled off. An open
    /// circuit past its cool-off transitions to half-open as a side
    /// effect of this query and reports itself available for one trial.
    pub fn is_open(&self, provider_id: &str, capability: &Capability) -> bool {
        let key = provider_key(provider_id, capability);
        let Some(mut entry) = self.entries.get_mut(&key) else {
            return false;
        };

        if entry.state != CircuitState::Open {
            return false;
        }

        let cooled_off = entry
            .opened_at
            .is_none_or(|at| at.elapsed() >= self.cool_off);

        if cooled_off {
            entry.state = CircuitState::HalfOpen;
            drop(entry);
            tracing::info!(
                provider_id,
                capability = %capability,
                "circuit cooled off, allowing trial call"
            );
            return false;
        }

        true
    }

    /// Record a successful call: close the circuit and reset the counter
    pub fn on_success(&self, provider_id: &str, capability: &Capability) {
        let key = provider_key(provider_id, capability);
        let mut entry = self.entries.entry(key).or_insert_with(BreakerEntry::new);

        entry.state = CircuitState::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
    }

    /// Record a failed call, opening the circuit at the threshold
    pub fn on_failure(&self, provider_id: &str, capability: &Capability) {
        let key = provider_key(provider_id, capability);
        let mut entry = self.entries.entry(key).or_insert_with(BreakerEntry::new);

        entry.consecutive_failures += 1;

        if entry.consecutive_failures >= self.failure_threshold {
            let reopened = entry.state != CircuitState::Closed;
            entry.state = CircuitState::Open;
            entry.opened_at = Some(Instant::now());

            let failures = entry.consecutive_failures;
            drop(entry);
            tracing::warn!(
                provider_id,
                capability = %capability,
                consecutive_failures = failures,
                reopened,
                "circuit opened"
            );
        }
    }

    /// Observe the current state without side effects
    pub fn state(&self, provider_id: &str, capability: &Capability) -> CircuitState {
        let key = provider_key(provider_id, capability);
        self.entries
            .get(&key)
            .map_or(CircuitState::Closed, |entry| entry.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap() -> Capability {
        Capability::new("small-text")
    }

    fn breaker(threshold: u32, cool_off_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(threshold, Duration::from_millis(cool_off_ms))
    }

    #[test]
    fn unknown_key_is_closed() {
        let cb = breaker(3, 60_000);
        assert!(!cb.is_open("p1", &cap()));
        assert_eq!(cb.state("p1", &cap()), CircuitState::Closed);
    }

    #[test]
    fn opens_at_threshold() {
        let cb = breaker(2, 60_000);

        cb.on_failure("p1", &cap());
        assert!(!cb.is_open("p1", &cap()));

        cb.on_failure("p1", &cap());
        assert!(cb.is_open("p1", &cap()));
        assert_eq!(cb.state("p1", &cap()), CircuitState::Open);
    }

    #[test]
    fn cool_off_promotes_to_half_open() {
        let cb = breaker(2, 50);

        cb.on_failure("p1", &cap());
        cb.on_failure("p1", &cap());
        assert!(cb.is_open("p1", &cap()));

        std::thread::sleep(Duration::from_millis(60));

        assert!(!cb.is_open("p1", &cap()));
        assert_eq!(cb.state("p1", &cap()), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_and_resets() {
        let cb = breaker(2, 1);

        cb.on_failure("p1", &cap());
        cb.on_failure("p1", &cap());
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cb.is_open("p1", &cap()));

        cb.on_success("p1", &cap());
        assert_eq!(cb.state("p1", &cap()), CircuitState::Closed);

        // Counter was reset; one failure must not re-open
        cb.on_failure("p1", &cap());
        assert!(!cb.is_open("p1", &cap()));
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let cb = breaker(2, 1);

        cb.on_failure("p1", &cap());
        cb.on_failure("p1", &cap());
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cb.is_open("p1", &cap()));
        assert_eq!(cb.state("p1", &cap()), CircuitState::HalfOpen);

        // Counter was never reset, so a single trial failure re-opens
        cb.on_failure("p1", &cap());
        assert_eq!(cb.state("p1", &cap()), CircuitState::Open);
        assert!(cb.is_open("p1", &cap()));
    }

    #[test]
    fn success_from_any_state_closes() {
        let cb = breaker(1, 60_000);

        cb.on_failure("p1", &cap());
        assert!(cb.is_open("p1", &cap()));

        cb.on_success("p1", &cap());
        assert!(!cb.is_open("p1", &cap()));
        assert_eq!(cb.state("p1", &cap()), CircuitState::Closed);
    }

    #[test]
    fn keys_are_independent() {
        let cb = breaker(1, 60_000);

        cb.on_failure("bad", &cap());
        assert!(cb.is_open("bad", &cap()));
        assert!(!cb.is_open("good", &cap()));
        assert!(!cb.is_open("bad", &Capability::new("embedding")));
    }
}

//! Rolling outcome window per (provider, capability)
//!
//! Bounded FIFO ring of recent call outcomes. Records land in completion
//! order. Percentiles are nearest-rank over the current window, computed
//! on demand; at the default window size the sort is cheap enough that a
//! streaming estimator is not worth its complexity.

use std::collections::VecDeque;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use crate::provider_key;
use crate::registry::Capability;

/// How one call against a provider ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Handler returned a result
    Success,
    /// Handler signalled an error
    Failure,
    /// The per-call deadline elapsed
    Timeout,
}

/// One recorded call outcome
#[derive(Debug, Clone)]
pub struct OutcomeSample {
    /// Wall time the call took
    pub latency_ms: u64,
    /// When the record was appended (completion order, not start order)
    pub recorded_at: Instant,
    /// How the call ended
    pub outcome: OutcomeKind,
}

/// Aggregates over the current window for one (provider, capability)
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TelemetryStats {
    /// Records currently in the window
    pub count: usize,
    /// Successful calls in the window
    pub success: usize,
    /// Failed calls in the window
    pub failure: usize,
    /// Timed-out calls in the window
    pub timeout: usize,
    /// Median latency, `None` when the window is empty
    pub p50_latency_ms: Option<u64>,
    /// 95th-percentile latency, `None` when the window is empty
    pub p95_latency_ms: Option<u64>,
}

impl TelemetryStats {
    /// Fraction of windowed calls that failed or timed out
    pub fn failure_ratio(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some((self.failure + self.timeout) as f64 / self.count as f64)
    }
}

/// Bounded per-key outcome rings
///
/// Keys are sharded by the underlying map, so recording against one
/// provider never blocks reads of another.
#[derive(Debug)]
pub struct TelemetryTracker {
    window: usize,
    samples: DashMap<String, VecDeque<OutcomeSample>>,
}

impl TelemetryTracker {
    /// Tracker with the given per-key window size (floored at 1)
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: DashMap::new(),
        }
    }

    /// Configured window size
    pub fn window(&self) -> usize {
        self.window
    }

    /// Append an outcome record, evicting the oldest past the window
    pub fn record(
        &self,
        provider_id: &str,
        capability: &Capability,
        outcome: OutcomeKind,
        latency_ms: u64,
    ) {
        let key = provider_key(provider_id, capability);
        let mut ring = self.samples.entry(key).or_default();

        while ring.len() >= self.window {
            ring.pop_front();
        }

        ring.push_back(OutcomeSample {
            latency_ms,
            recorded_at: Instant::now(),
            outcome,
        });
    }

    /// Aggregates for one (provider, capability) window
    ///
    /// Tallies in a single pass; latencies are copied out and sorted for
    /// the nearest-rank percentiles.
    pub fn stats(&self, provider_id: &str, capability: &Capability) -> TelemetryStats {
        let key = provider_key(provider_id, capability);
        let Some(ring) = self.samples.get(&key) else {
            return TelemetryStats::default();
        };

        let mut stats = TelemetryStats {
            count: ring.len(),
            ..TelemetryStats::default()
        };
        let mut latencies = Vec::with_capacity(ring.len());

        for sample in ring.iter() {
            match sample.outcome {
                OutcomeKind::Success => stats.success += 1,
                OutcomeKind::Failure => stats.failure += 1,
                OutcomeKind::Timeout => stats.timeout += 1,
            }
            latencies.push(sample.latency_ms);
        }
        drop(ring);

        latencies.sort_unstable();
        stats.p50_latency_ms = nearest_rank(&latencies, 0.50);
        stats.p95_latency_ms = nearest_rank(&latencies, 0.95);

        stats
    }

    /// Drop every window (test isolation)
    pub fn clear(&self) {
        self.samples.clear();
    }
}

/// Nearest-rank percentile over an ascending-sorted slice
fn nearest_rank(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((p * (sorted.len() - 1) as f64).floor() as usize).min(sorted.len() - 1);
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap() -> Capability {
        Capability::new("small-text")
    }

    #[test]
    fn empty_window_has_no_percentiles() {
        let tracker = TelemetryTracker::new(10);
        let stats = tracker.stats("p1", &cap());

        assert_eq!(stats.count, 0);
        assert!(stats.p50_latency_ms.is_none());
        assert!(stats.p95_latency_ms.is_none());
        assert!(stats.failure_ratio().is_none());
    }

    #[test]
    fn percentiles_by_nearest_rank() {
        let tracker = TelemetryTracker::new(50);
        for ms in [10, 20, 30, 40, 50, 60, 70, 80, 90, 100] {
            tracker.record("p1", &cap(), OutcomeKind::Success, ms);
        }

        let stats = tracker.stats("p1", &cap());
        assert_eq!(stats.count, 10);

        let p50 = stats.p50_latency_ms.unwrap();
        assert!((40..=50).contains(&p50));

        let p95 = stats.p95_latency_ms.unwrap();
        assert!((90..=100).contains(&p95));
    }

    #[test]
    fn window_is_bounded_fifo() {
        let tracker = TelemetryTracker::new(3);
        for ms in [1, 2, 3, 4, 5] {
            tracker.record("p1", &cap(), OutcomeKind::Success, ms);
        }

        let stats = tracker.stats("p1", &cap());
        assert_eq!(stats.count, 3);
        // Oldest two evicted; window is {3, 4, 5}
        assert_eq!(stats.p50_latency_ms, Some(4));
    }

    #[test]
    fn outcome_tallies() {
        let tracker = TelemetryTracker::new(10);
        tracker.record("p1", &cap(), OutcomeKind::Success, 10);
        tracker.record("p1", &cap(), OutcomeKind::Failure, 20);
        tracker.record("p1", &cap(), OutcomeKind::Timeout, 30);
        tracker.record("p1", &cap(), OutcomeKind::Failure, 40);

        let stats = tracker.stats("p1", &cap());
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failure, 2);
        assert_eq!(stats.timeout, 1);
        assert!((stats.failure_ratio().unwrap() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn keys_are_independent() {
        let tracker = TelemetryTracker::new(10);
        tracker.record("p1", &cap(), OutcomeKind::Failure, 10);
        tracker.record("p2", &cap(), OutcomeKind::Success, 10);
        tracker.record("p1", &Capability::new("embedding"), OutcomeKind::Success, 10);

        assert_eq!(tracker.stats("p1", &cap()).failure, 1);
        assert_eq!(tracker.stats("p2", &cap()).failure, 0);
        assert_eq!(tracker.stats("p1", &Capability::new("embedding")).failure, 0);
    }

    #[test]
    fn window_floor_is_one() {
        let tracker = TelemetryTracker::new(0);
        tracker.record("p1", &cap(), OutcomeKind::Success, 10);
        tracker.record("p1", &cap(), OutcomeKind::Success, 20);

        let stats = tracker.stats("p1", &cap());
        assert_eq!(stats.count, 1);
        assert_eq!(stats.p50_latency_ms, Some(20));
    }
}

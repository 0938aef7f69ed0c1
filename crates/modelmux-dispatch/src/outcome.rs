//! Fire-and-forget call-outcome emission
//!
//! Outcome records are sent over an unbounded channel and consumed off
//! the dispatch path, so reporting never blocks a caller. Collaborators
//! (benchmark harnesses, report generators) take the receiving half;
//! the logging constructor is the default consumer.

use serde::Serialize;
use tokio::sync::mpsc;

use modelmux_routing::OutcomeKind;

/// One completed attempt against a provider
#[derive(Debug, Clone, Serialize)]
pub struct CallOutcome {
    /// Provider that handled (or failed) the attempt
    pub provider_id: String,
    /// Capability the request was dispatched under
    pub capability: String,
    /// How the attempt ended
    pub outcome: OutcomeKind,
    /// Wall time of the attempt in milliseconds
    pub latency_ms: u64,
    /// Charged cost in USD; present only for successful attempts with
    /// a cost estimate
    pub cost_usd: Option<f64>,
}

/// Sender half of the outcome stream
#[derive(Clone)]
pub struct OutcomeRecorder {
    tx: mpsc::UnboundedSender<CallOutcome>,
}

impl OutcomeRecorder {
    /// Recorder plus the receiver a collaborator consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Recorder whose background task logs each outcome at debug level
    ///
    /// Must be called from within a tokio runtime.
    pub fn logging() -> Self {
        let (recorder, mut rx) = Self::channel();

        tokio::spawn(async move {
            while let Some(outcome) = rx.recv().await {
                tracing::debug!(
                    provider_id = %outcome.provider_id,
                    capability = %outcome.capability,
                    outcome = ?outcome.outcome,
                    latency_ms = outcome.latency_ms,
                    cost_usd = outcome.cost_usd,
                    "call outcome"
                );
            }
            tracing::debug!("outcome recorder shutting down");
        });

        recorder
    }

    /// Enqueue an outcome, non-blocking
    ///
    /// If the consumer is gone the record is dropped with a warning.
    pub fn record(&self, outcome: CallOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::warn!("failed to enqueue call outcome, channel closed");
        }
    }
}

impl std::fmt::Debug for OutcomeRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeRecorder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outcomes_arrive_in_order() {
        let (recorder, mut rx) = OutcomeRecorder::channel();

        for (i, kind) in [OutcomeKind::Success, OutcomeKind::Failure].into_iter().enumerate() {
            recorder.record(CallOutcome {
                provider_id: format!("p{i}"),
                capability: "small-text".to_owned(),
                outcome: kind,
                latency_ms: 10,
                cost_usd: None,
            });
        }

        assert_eq!(rx.recv().await.unwrap().provider_id, "p0");
        assert_eq!(rx.recv().await.unwrap().provider_id, "p1");
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_panic() {
        let (recorder, rx) = OutcomeRecorder::channel();
        drop(rx);

        recorder.record(CallOutcome {
            provider_id: "p".to_owned(),
            capability: "small-text".to_owned(),
            outcome: OutcomeKind::Success,
            latency_ms: 1,
            cost_usd: Some(0.1),
        });
    }
}

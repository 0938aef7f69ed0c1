//! The dispatch pipeline
//!
//! registry snapshot → policy ranking → timed execution → telemetry and
//! breaker updates → budget accounting, with retries down the ranked
//! list. A single dispatch never parallelizes across providers; its only
//! suspension points are the handler invocation and the timeout race.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use modelmux_billing::{CostEstimate, CostEstimator, PriceBook, SessionLedger};
use modelmux_config::{DispatcherConfig, PolicyConfig};
use modelmux_routing::{
    Capability, CircuitBreaker, OutcomeKind, Policy, ProviderCapabilities, ProviderEntry,
    ProviderRegistry, RankRequest, TelemetryTracker,
};

use crate::error::{DispatchError, HandlerError};
use crate::handler::{ProviderHandler, prompt_length_of, wants_schema};
use crate::outcome::{CallOutcome, OutcomeRecorder};

/// Per-dispatch options
///
/// `prompt_length` and `has_schema` override what would otherwise be
/// derived from the params; `weights` overrides individual scoring
/// weights for this call only.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Override the derived prompt length
    pub prompt_length: Option<usize>,
    /// Override the derived schema requirement
    pub has_schema: Option<bool>,
    /// Output-size hint passed through to cost estimation
    pub expected_output_tokens: Option<u64>,
    /// Restrict dispatch to a single provider id
    pub provider_hint: Option<String>,
    /// Per-call scoring weight overrides
    pub weights: PolicyOverrides,
}

/// Per-call scoring weight overrides
///
/// Each set field replaces the matching weight from the dispatcher's
/// base [`PolicyConfig`] for one dispatch; unset fields keep the
/// configured value.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    /// Override the structured-output bias weight
    pub json_bias_weight: Option<f64>,
    /// Override the p95 latency penalty weight
    pub latency_weight: Option<f64>,
    /// Override the failure-ratio penalty weight
    pub failure_penalty: Option<f64>,
    /// Override the exploration jitter bound
    pub exploration_epsilon: Option<f64>,
    /// Override the cost penalty weight
    pub cost_weight: Option<f64>,
    /// Override the short-prompt threshold
    pub prompt_length_threshold: Option<usize>,
}

impl PolicyOverrides {
    /// Whether any override is set
    pub fn is_empty(&self) -> bool {
        self.json_bias_weight.is_none()
            && self.latency_weight.is_none()
            && self.failure_penalty.is_none()
            && self.exploration_epsilon.is_none()
            && self.cost_weight.is_none()
            && self.prompt_length_threshold.is_none()
    }

    /// The base config with these overrides applied
    pub fn apply(&self, base: &PolicyConfig) -> PolicyConfig {
        PolicyConfig {
            json_bias_weight: self.json_bias_weight.unwrap_or(base.json_bias_weight),
            latency_weight: self.latency_weight.unwrap_or(base.latency_weight),
            failure_penalty: self.failure_penalty.unwrap_or(base.failure_penalty),
            exploration_epsilon: self.exploration_epsilon.unwrap_or(base.exploration_epsilon),
            cost_weight: self.cost_weight.unwrap_or(base.cost_weight),
            prompt_length_threshold: self
                .prompt_length_threshold
                .unwrap_or(base.prompt_length_threshold),
            cost_variance: base.cost_variance,
        }
    }
}

/// A completed dispatch
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    /// The handler's result, passed through unchanged
    pub result: Value,
    /// Provider that produced the result
    pub provider_id: String,
    /// The estimate charged to the ledger, when one was attached
    pub cost_estimate: Option<CostEstimate>,
}

/// Assembles a [`Dispatcher`] from explicit parts
///
/// There is deliberately no process-wide instance; every test and every
/// embedding wires its own.
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    policy_config: PolicyConfig,
    price_book: PriceBook,
    policy_seed: Option<u64>,
    recorder: Option<OutcomeRecorder>,
}

impl DispatcherBuilder {
    /// Builder with every default
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dispatcher parameters
    #[must_use]
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the base scoring weights
    #[must_use]
    pub fn policy_config(mut self, config: PolicyConfig) -> Self {
        self.policy_config = config;
        self
    }

    /// Replace the price book
    #[must_use]
    pub fn price_book(mut self, book: PriceBook) -> Self {
        self.price_book = book;
        self
    }

    /// Seed the exploration RNG for reproducible ranking
    #[must_use]
    pub fn policy_seed(mut self, seed: u64) -> Self {
        self.policy_seed = Some(seed);
        self
    }

    /// Attach a call-outcome recorder
    #[must_use]
    pub fn recorder(mut self, recorder: OutcomeRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Build the dispatcher
    pub fn build(self) -> Dispatcher {
        let policy = match self.policy_seed {
            Some(seed) => Policy::seeded(self.policy_config, seed),
            None => Policy::new(self.policy_config),
        };

        Dispatcher {
            registry: ProviderRegistry::new(),
            handlers: DashMap::new(),
            telemetry: TelemetryTracker::new(self.config.telemetry_window),
            breaker: CircuitBreaker::new(
                self.config.circuit_failure_threshold,
                Duration::from_millis(self.config.circuit_cool_off_ms),
            ),
            estimator: CostEstimator::new(self.price_book),
            ledger: SessionLedger::new(self.config.session_budget_usd),
            policy,
            recorder: self.recorder,
            per_call_timeout: Duration::from_millis(self.config.per_call_timeout_ms),
            max_retries: self.config.max_retries,
        }
    }
}

/// Routes requests to the best available provider, with retries
pub struct Dispatcher {
    registry: ProviderRegistry,
    /// Handler bound per (provider, capability); re-registering the same
    /// pair replaces the binding
    handlers: DashMap<String, Arc<dyn ProviderHandler>>,
    telemetry: TelemetryTracker,
    breaker: CircuitBreaker,
    estimator: CostEstimator,
    ledger: SessionLedger,
    policy: Policy,
    recorder: Option<OutcomeRecorder>,
    per_call_timeout: Duration,
    max_retries: u32,
}

impl Dispatcher {
    /// Start assembling a dispatcher
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Register a provider for a capability
    pub fn register(
        &self,
        capability: &str,
        provider_id: &str,
        priority: i32,
        capabilities: ProviderCapabilities,
        handler: Arc<dyn ProviderHandler>,
    ) {
        let capability = Capability::new(capability);

        self.handlers
            .insert(handler_key(provider_id, &capability), handler);
        self.registry.register(
            capability,
            ProviderEntry {
                provider_id: provider_id.to_owned(),
                priority,
                capabilities,
            },
        );
    }

    /// Drop every registration and handler binding (test isolation)
    pub fn clear_providers(&self) {
        self.registry.clear();
        self.handlers.clear();
    }

    /// The session spend ledger
    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// The telemetry windows
    pub fn telemetry(&self) -> &TelemetryTracker {
        &self.telemetry
    }

    /// The circuit breaker
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The base scoring weights, as configured at build time
    ///
    /// Useful for building [`PolicyOverrides`] relative to the active
    /// weights rather than the defaults.
    pub fn policy_config(&self) -> &PolicyConfig {
        self.policy.config()
    }

    /// Dispatch a request against the best available provider
    ///
    /// Ranks the registered candidates, then walks the ranking with up
    /// to `1 + max_retries` attempts. Providers filtered out by the
    /// policy never consume attempts.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NoProviders`] when nothing is registered for
    ///   the capability (or nothing matches the provider hint)
    /// - [`DispatchError::AllUnavailable`] when every candidate was
    ///   filtered out before any attempt (circuits open or over budget)
    /// - [`DispatchError::Exhausted`] when the attempt budget ran out
    pub async fn dispatch(
        &self,
        capability: &str,
        params: Value,
        options: DispatchOptions,
    ) -> Result<DispatchResponse, DispatchError> {
        let capability = Capability::new(capability);

        let mut candidates = self.registry.get(&capability);
        if let Some(hint) = &options.provider_hint {
            candidates.retain(|entry| &entry.provider_id == hint);
        }
        if candidates.is_empty() {
            return Err(DispatchError::NoProviders {
                capability: capability.to_string(),
            });
        }

        let prompt_length = options
            .prompt_length
            .unwrap_or_else(|| prompt_length_of(&params));
        let has_schema = options.has_schema.unwrap_or_else(|| wants_schema(&params));

        let request = RankRequest {
            capability: &capability,
            prompt_length,
            has_schema,
            expected_output_tokens: options.expected_output_tokens,
            budget: self.ledger.status(),
        };

        let ranked = if options.weights.is_empty() {
            self.policy.rank(
                &candidates,
                &self.telemetry,
                &self.breaker,
                &self.estimator,
                &request,
            )
        } else {
            let merged = options.weights.apply(self.policy.config());
            self.policy.rank_with(
                &merged,
                &candidates,
                &self.telemetry,
                &self.breaker,
                &self.estimator,
                &request,
            )
        };

        if ranked.is_empty() {
            tracing::warn!(
                capability = %capability,
                candidates = candidates.len(),
                "every candidate filtered out, none attempted"
            );
            return Err(DispatchError::AllUnavailable {
                capability: capability.to_string(),
            });
        }

        let attempt_budget = 1 + self.max_retries as usize;
        let mut attempted: Vec<String> = Vec::new();
        let mut last_error: Option<HandlerError> = None;

        for candidate in ranked.iter().take(attempt_budget) {
            let provider_id = candidate.entry.provider_id.as_str();

            let Some(handler) = self
                .handlers
                .get(&handler_key(provider_id, &capability))
                .map(|h| Arc::clone(h.value()))
            else {
                tracing::error!(
                    provider_id,
                    capability = %capability,
                    "ranked provider has no handler binding, skipping"
                );
                continue;
            };

            attempted.push(provider_id.to_owned());

            match self.attempt(&handler, params.clone()).await {
                Ok((result, latency_ms)) => {
                    self.telemetry
                        .record(provider_id, &capability, OutcomeKind::Success, latency_ms);
                    self.breaker.on_success(provider_id, &capability);

                    if let Some(estimate) = &candidate.cost_estimate {
                        self.ledger.charge(estimate.total_usd);
                    }
                    self.emit(
                        provider_id,
                        &capability,
                        OutcomeKind::Success,
                        latency_ms,
                        candidate.cost_estimate.as_ref(),
                    );

                    tracing::info!(
                        provider_id,
                        capability = %capability,
                        latency_ms,
                        attempt = attempted.len(),
                        score = candidate.score,
                        "dispatch succeeded"
                    );

                    return Ok(DispatchResponse {
                        result,
                        provider_id: provider_id.to_owned(),
                        cost_estimate: candidate.cost_estimate.clone(),
                    });
                }
                Err((error, latency_ms)) => {
                    let kind = match &error {
                        HandlerError::Timeout(_) => OutcomeKind::Timeout,
                        HandlerError::Failed(_) => OutcomeKind::Failure,
                    };
                    self.telemetry.record(provider_id, &capability, kind, latency_ms);
                    self.breaker.on_failure(provider_id, &capability);
                    self.emit(provider_id, &capability, kind, latency_ms, None);

                    tracing::warn!(
                        provider_id,
                        capability = %capability,
                        latency_ms,
                        error = %error,
                        "attempt failed, trying next candidate"
                    );

                    last_error = Some(error);
                }
            }
        }

        let last_provider = attempted.last().cloned().unwrap_or_default();
        Err(DispatchError::Exhausted {
            capability: capability.to_string(),
            attempts: attempted.len(),
            attempted_providers: attempted.join(","),
            last_provider,
            last_error: last_error
                .unwrap_or_else(|| HandlerError::failed("no candidate could be attempted")),
        })
    }

    /// Run one handler under the per-call deadline
    ///
    /// On timeout the raced future is dropped and the token cancelled,
    /// so a late completion can never reach telemetry or the ledger;
    /// the timeout outcome is recorded by the caller from this path.
    async fn attempt(
        &self,
        handler: &Arc<dyn ProviderHandler>,
        params: Value,
    ) -> Result<(Value, u64), (HandlerError, u64)> {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let outcome =
            tokio::time::timeout(self.per_call_timeout, handler.invoke(params, cancel.clone())).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(result)) => Ok((result, latency_ms)),
            Ok(Err(error)) => Err((error, latency_ms)),
            Err(_) => {
                cancel.cancel();
                Err((HandlerError::Timeout(self.per_call_timeout), latency_ms))
            }
        }
    }

    fn emit(
        &self,
        provider_id: &str,
        capability: &Capability,
        outcome: OutcomeKind,
        latency_ms: u64,
        estimate: Option<&CostEstimate>,
    ) {
        if let Some(recorder) = &self.recorder {
            recorder.record(CallOutcome {
                provider_id: provider_id.to_owned(),
                capability: capability.to_string(),
                outcome,
                latency_ms,
                cost_usd: estimate.map(|e| e.total_usd),
            });
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("per_call_timeout", &self.per_call_timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Handler map key, aligned with the telemetry and breaker key shape
fn handler_key(provider_id: &str, capability: &Capability) -> String {
    format!("{provider_id}/{capability}")
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct StaticHandler {
        response: Value,
    }

    #[async_trait]
    impl ProviderHandler for StaticHandler {
        async fn invoke(&self, _params: Value, _cancel: CancellationToken) -> Result<Value, HandlerError> {
            Ok(self.response.clone())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ProviderHandler for FailingHandler {
        async fn invoke(&self, _params: Value, _cancel: CancellationToken) -> Result<Value, HandlerError> {
            Err(HandlerError::failed("synthetic failure"))
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .policy_config(PolicyConfig {
                exploration_epsilon: 0.0,
                cost_variance: false,
                ..PolicyConfig::default()
            })
            .build()
    }

    #[test]
    fn overrides_merge_over_the_base_config() {
        let base = PolicyConfig {
            json_bias_weight: 5.0,
            exploration_epsilon: 0.0,
            cost_variance: false,
            ..PolicyConfig::default()
        };

        let overrides = PolicyOverrides {
            cost_weight: Some(3.0),
            ..PolicyOverrides::default()
        };
        let merged = overrides.apply(&base);

        assert!((merged.cost_weight - 3.0).abs() < f64::EPSILON);
        // Untouched fields keep the base values, not the defaults
        assert!((merged.json_bias_weight - 5.0).abs() < f64::EPSILON);
        assert!(merged.exploration_epsilon.abs() < f64::EPSILON);
        assert!(!merged.cost_variance);

        assert!(PolicyOverrides::default().is_empty());
        assert!(!overrides.is_empty());
    }

    #[tokio::test]
    async fn unknown_capability_is_no_providers() {
        let dispatcher = dispatcher();
        let result = dispatcher
            .dispatch("small-text", json!({"prompt": "hi"}), DispatchOptions::default())
            .await;

        assert!(matches!(result, Err(DispatchError::NoProviders { .. })));
    }

    #[tokio::test]
    async fn hint_filters_to_one_provider() {
        let dispatcher = dispatcher();
        dispatcher.register(
            "small-text",
            "a",
            9,
            ProviderCapabilities::default(),
            Arc::new(StaticHandler { response: json!("from a") }),
        );
        dispatcher.register(
            "small-text",
            "b",
            1,
            ProviderCapabilities::default(),
            Arc::new(StaticHandler { response: json!("from b") }),
        );

        let response = dispatcher
            .dispatch(
                "small-text",
                json!({"prompt": "hi"}),
                DispatchOptions {
                    provider_hint: Some("b".to_owned()),
                    ..DispatchOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(response.provider_id, "b");
        assert_eq!(response.result, json!("from b"));
    }

    #[tokio::test]
    async fn hint_for_unregistered_provider_is_no_providers() {
        let dispatcher = dispatcher();
        dispatcher.register(
            "small-text",
            "a",
            1,
            ProviderCapabilities::default(),
            Arc::new(StaticHandler { response: json!("ok") }),
        );

        let result = dispatcher
            .dispatch(
                "small-text",
                json!({"prompt": "hi"}),
                DispatchOptions {
                    provider_hint: Some("missing".to_owned()),
                    ..DispatchOptions::default()
                },
            )
            .await;

        assert!(matches!(result, Err(DispatchError::NoProviders { .. })));
    }

    #[tokio::test]
    async fn failure_is_recorded_then_surfaced_when_exhausted() {
        let dispatcher = dispatcher();
        dispatcher.register(
            "small-text",
            "only",
            1,
            ProviderCapabilities::default(),
            Arc::new(FailingHandler),
        );

        let error = dispatcher
            .dispatch("small-text", json!({"prompt": "hi"}), DispatchOptions::default())
            .await
            .unwrap_err();

        match &error {
            DispatchError::Exhausted {
                attempts,
                last_provider,
                last_error,
                ..
            } => {
                assert_eq!(*attempts, 1);
                assert_eq!(last_provider, "only");
                assert!(matches!(last_error, HandlerError::Failed(_)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }

        let cap = Capability::new("small-text");
        let stats = dispatcher.telemetry().stats("only", &cap);
        assert_eq!(stats.failure, 1);
    }

    #[tokio::test]
    async fn clear_providers_forgets_everything() {
        let dispatcher = dispatcher();
        dispatcher.register(
            "small-text",
            "a",
            1,
            ProviderCapabilities::default(),
            Arc::new(StaticHandler { response: json!("ok") }),
        );
        dispatcher.clear_providers();

        let result = dispatcher
            .dispatch("small-text", json!({"prompt": "hi"}), DispatchOptions::default())
            .await;
        assert!(matches!(result, Err(DispatchError::NoProviders { .. })));
    }
}

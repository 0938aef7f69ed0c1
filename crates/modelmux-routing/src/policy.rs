//! Multi-objective candidate scoring
//!
//! Folds static priority, observed latency and failure rates, expected
//! cost, structured-output reliability, and a small exploration term
//! into one score per candidate, then orders candidates best-first.
//! Budget and circuit exclusions are hard filters applied before the
//! soft score ever matters.

use std::sync::{Arc, Mutex};

use modelmux_billing::{BudgetStatus, CostEstimate, CostEstimator};
use modelmux_config::PolicyConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::circuit::CircuitBreaker;
use crate::registry::{Capability, ProviderEntry};
use crate::telemetry::{TelemetryStats, TelemetryTracker};

/// Budget utilization past which the cost weight is inflated
const BUDGET_PRESSURE_UTILIZATION: f64 = 0.8;

/// Cost-weight multiplier applied under budget pressure
const BUDGET_PRESSURE_MULTIPLIER: f64 = 2.0;

/// One request's ranking inputs
#[derive(Debug, Clone)]
pub struct RankRequest<'a> {
    /// Capability being dispatched
    pub capability: &'a Capability,
    /// Character count of the prompt text, 0 when none
    pub prompt_length: usize,
    /// Whether structured-object output is required
    pub has_schema: bool,
    /// Caller's output-size hint for cost estimation
    pub expected_output_tokens: Option<u64>,
    /// Ledger snapshot taken at dispatch time
    pub budget: BudgetStatus,
}

/// One candidate with its score and the evidence behind it
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The registry entry
    pub entry: Arc<ProviderEntry>,
    /// Final score, higher is better
    pub score: f64,
    /// Telemetry window the score was computed from
    pub stats: TelemetryStats,
    /// Cost estimate, present when the entry has a cost block and the
    /// request carried a prompt
    pub cost_estimate: Option<CostEstimate>,
}

/// Candidate ranking policy
///
/// Owns the exploration RNG; construct with [`Policy::seeded`] when a
/// reproducible jitter sequence is needed.
#[derive(Debug)]
pub struct Policy {
    config: PolicyConfig,
    rng: Mutex<StdRng>,
}

impl Policy {
    /// Policy with an entropy-seeded exploration RNG
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Policy with a fixed jitter seed, for reproducible ranking
    pub fn seeded(config: PolicyConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// The active scoring weights
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Rank candidates best-first for one request
    ///
    /// Candidates whose circuit is open (and not yet promotable) or
    /// whose cost estimate exceeds the remaining budget are excluded
    /// outright. Ties keep the input order, so a caller passing a
    /// priority-ordered snapshot gets priority-ordered ties back. An
    /// empty result means every provider was unavailable, which the
    /// dispatcher surfaces distinctly from per-call failures.
    pub fn rank(
        &self,
        candidates: &[Arc<ProviderEntry>],
        telemetry: &TelemetryTracker,
        breaker: &CircuitBreaker,
        estimator: &CostEstimator,
        request: &RankRequest<'_>,
    ) -> Vec<ScoredCandidate> {
        self.rank_with(&self.config, candidates, telemetry, breaker, estimator, request)
    }

    /// Rank with per-call weight overrides in place of the base config
    #[allow(clippy::too_many_lines)]
    pub fn rank_with(
        &self,
        config: &PolicyConfig,
        candidates: &[Arc<ProviderEntry>],
        telemetry: &TelemetryTracker,
        breaker: &CircuitBreaker,
        estimator: &CostEstimator,
        request: &RankRequest<'_>,
    ) -> Vec<ScoredCandidate> {
        let is_short =
            request.prompt_length > 0 && request.prompt_length < config.prompt_length_threshold;
        let remaining_usd = request.budget.remaining_usd();

        // Evaluated once per rank call from the ledger snapshot
        let under_pressure = request.budget.spent_usd > 0.0
            && request
                .budget
                .utilization()
                .is_some_and(|u| u > BUDGET_PRESSURE_UTILIZATION);
        let effective_cost_weight = if under_pressure {
            config.cost_weight * BUDGET_PRESSURE_MULTIPLIER
        } else {
            config.cost_weight
        };

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut scored = Vec::with_capacity(candidates.len());

        for entry in candidates {
            if breaker.is_open(&entry.provider_id, request.capability) {
                tracing::debug!(
                    provider_id = %entry.provider_id,
                    capability = %request.capability,
                    "candidate excluded, circuit open"
                );
                continue;
            }

            let stats = telemetry.stats(&entry.provider_id, request.capability);

            let cost_estimate = entry.capabilities.cost.as_ref().and_then(|profile| {
                if request.prompt_length == 0 {
                    return None;
                }
                Some(if config.cost_variance {
                    estimator.estimate_with_variance(
                        request.prompt_length,
                        request.expected_output_tokens,
                        profile,
                        &mut *rng,
                    )
                } else {
                    estimator.estimate(request.prompt_length, request.expected_output_tokens, profile)
                })
            });

            if let (Some(estimate), Some(remaining)) = (&cost_estimate, remaining_usd)
                && estimate.total_usd > remaining
            {
                tracing::warn!(
                    provider_id = %entry.provider_id,
                    capability = %request.capability,
                    estimated_usd = estimate.total_usd,
                    remaining_usd = remaining,
                    "candidate excluded, estimate exceeds remaining budget"
                );
                continue;
            }

            let score = Self::score(
                config,
                entry,
                &stats,
                cost_estimate.as_ref(),
                is_short,
                request.has_schema,
                effective_cost_weight,
                &mut rng,
            );

            scored.push(ScoredCandidate {
                entry: Arc::clone(entry),
                score,
                stats,
                cost_estimate,
            });
        }
        drop(rng);

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        tracing::debug!(
            capability = %request.capability,
            candidates = candidates.len(),
            ranked = scored.len(),
            "candidates ranked"
        );

        scored
    }

    #[allow(clippy::too_many_arguments)]
    fn score(
        config: &PolicyConfig,
        entry: &ProviderEntry,
        stats: &TelemetryStats,
        cost_estimate: Option<&CostEstimate>,
        is_short: bool,
        has_schema: bool,
        effective_cost_weight: f64,
        rng: &mut StdRng,
    ) -> f64 {
        let mut score = f64::from(entry.priority);

        // Short prompts favor providers advertising low typical latency
        if is_short && let Some(latency_ms) = entry.capabilities.typical_latency_ms {
            score += 1.0 / latency_ms.max(1) as f64;
        }

        if has_schema && let Some(reliability) = entry.capabilities.json_reliability_score {
            score += config.json_bias_weight * reliability;
        }

        if let Some(p95) = stats.p95_latency_ms {
            score -= config.latency_weight * p95 as f64;
        }

        if let Some(ratio) = stats.failure_ratio() {
            score -= config.failure_penalty * ratio;
        }

        if let Some(estimate) = cost_estimate {
            score -= effective_cost_weight * estimate.total_usd;
        }

        if config.exploration_epsilon > 0.0 {
            score += rng.gen_range(0.0..config.exploration_epsilon);
        }

        score
    }
}

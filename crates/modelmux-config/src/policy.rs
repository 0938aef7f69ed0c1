use serde::Deserialize;

/// Scoring weights for candidate ranking
///
/// All weights are additive score terms; see `modelmux-routing::policy`
/// for how each one enters the score.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Weight applied to a provider's JSON reliability score when the
    /// request demands structured output
    #[serde(default = "default_json_bias_weight")]
    pub json_bias_weight: f64,
    /// Penalty per millisecond of observed p95 latency
    #[serde(default = "default_latency_weight")]
    pub latency_weight: f64,
    /// Penalty multiplier for the observed failure+timeout ratio
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: f64,
    /// Upper bound of the uniform exploration jitter added to every score
    #[serde(default = "default_exploration_epsilon")]
    pub exploration_epsilon: f64,
    /// Penalty multiplier for the estimated request cost in USD
    #[serde(default = "default_cost_weight")]
    pub cost_weight: f64,
    /// Prompts shorter than this (in chars) earn the fast-provider bonus
    #[serde(default = "default_prompt_length_threshold")]
    pub prompt_length_threshold: usize,
    /// Whether cost estimates drawn during ranking carry variance
    ///
    /// Disable together with `exploration_epsilon = 0` for fully
    /// deterministic ranking.
    #[serde(default = "default_cost_variance")]
    pub cost_variance: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            json_bias_weight: default_json_bias_weight(),
            latency_weight: default_latency_weight(),
            failure_penalty: default_failure_penalty(),
            exploration_epsilon: default_exploration_epsilon(),
            cost_weight: default_cost_weight(),
            prompt_length_threshold: default_prompt_length_threshold(),
            cost_variance: default_cost_variance(),
        }
    }
}

fn default_json_bias_weight() -> f64 {
    1.0
}

fn default_latency_weight() -> f64 {
    0.001
}

fn default_failure_penalty() -> f64 {
    2.0
}

fn default_exploration_epsilon() -> f64 {
    0.01
}

fn default_cost_weight() -> f64 {
    1.0
}

fn default_prompt_length_threshold() -> usize {
    600
}

#[allow(clippy::missing_const_for_fn)]
fn default_cost_variance() -> bool {
    true
}

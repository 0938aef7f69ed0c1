use serde::Deserialize;

/// Dispatcher construction parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Telemetry ring size per (provider, capability) key
    #[serde(default = "default_telemetry_window")]
    pub telemetry_window: usize,
    /// Consecutive failures before a circuit opens
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,
    /// How long an open circuit blocks a provider before a half-open probe
    #[serde(default = "default_cool_off_ms")]
    pub circuit_cool_off_ms: u64,
    /// Hard deadline for a single handler invocation
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
    /// Additional attempts after the first, across distinct providers
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Session budget ceiling in USD; absent means unbounded
    #[serde(default)]
    pub session_budget_usd: Option<f64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            telemetry_window: default_telemetry_window(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_cool_off_ms: default_cool_off_ms(),
            per_call_timeout_ms: default_per_call_timeout_ms(),
            max_retries: default_max_retries(),
            session_budget_usd: None,
        }
    }
}

fn default_telemetry_window() -> usize {
    200
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cool_off_ms() -> u64 {
    60_000
}

fn default_per_call_timeout_ms() -> u64 {
    300_000
}

fn default_max_retries() -> u32 {
    2
}

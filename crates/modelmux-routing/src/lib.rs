//! Policy-driven provider ranking for modelmux
//!
//! Joins the provider registry with live telemetry and circuit state to
//! rank the candidates for one request:
//! - **Registry**: capability → priority-ordered provider entries
//! - **Telemetry**: bounded window of recent call outcomes per provider
//! - **CircuitBreaker**: per-(provider, capability) failure isolation
//! - **Policy**: multi-objective score with hard budget filtering

#![allow(
    clippy::must_use_candidate,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod circuit;
pub mod policy;
pub mod registry;
pub mod telemetry;

pub use circuit::{CircuitBreaker, CircuitState};
pub use policy::{Policy, RankRequest, ScoredCandidate};
pub use registry::{Capability, ProviderCapabilities, ProviderEntry, ProviderRegistry};
pub use telemetry::{OutcomeKind, TelemetryStats, TelemetryTracker};

/// Shared map key for per-(provider, capability) state
///
/// Telemetry and breaker state are both keyed this way so the two views
/// the policy joins always refer to the same provider pair.
pub(crate) fn provider_key(provider_id: &str, capability: &Capability) -> String {
    format!("{provider_id}/{capability}")
}

#![allow(clippy::must_use_candidate)]

pub mod dispatcher;
mod loader;
pub mod policy;
pub mod pricing;

use serde::Deserialize;

pub use dispatcher::DispatcherConfig;
pub use policy::PolicyConfig;
pub use pricing::{ModelPrice, PriceBookConfig};

/// Top-level modelmux configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Policy scoring weights
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Dispatcher timeouts, retry budget, and breaker parameters
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Price book for cost estimation
    #[serde(default)]
    pub pricing: PriceBookConfig,
}

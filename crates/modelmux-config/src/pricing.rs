use indexmap::IndexMap;
use serde::Deserialize;

/// Key whose rates apply when a simulated model is not listed
pub const DEFAULT_PRICE_KEY: &str = "default";

/// USD rates per 1000 tokens for one simulated model
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPrice {
    /// Input rate, USD per 1000 tokens
    pub input: f64,
    /// Output rate, USD per 1000 tokens
    pub output: f64,
    /// Negotiated multiplier applied to this entry's rates
    ///
    /// Combines multiplicatively with a provider's own discount factor.
    /// `Config::load` rejects non-positive values.
    #[serde(default = "default_discount_factor")]
    pub discount_factor: f64,
}

impl ModelPrice {
    /// Rates with no book-level discount
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            discount_factor: default_discount_factor(),
        }
    }
}

fn default_discount_factor() -> f64 {
    1.0
}

/// Price book configuration keyed by simulated model name
///
/// Must contain a `"default"` entry; `Config::load` enforces this.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceBookConfig {
    /// Simulated model name → rates
    #[serde(default)]
    pub models: IndexMap<String, ModelPrice>,
}

impl Default for PriceBookConfig {
    fn default() -> Self {
        let mut models = IndexMap::new();
        models.insert(DEFAULT_PRICE_KEY.to_owned(), ModelPrice::new(0.0005, 0.0015));
        Self { models }
    }
}

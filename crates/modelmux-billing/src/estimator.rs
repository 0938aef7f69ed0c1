//! Request cost estimation from prompt size and model pricing
//!
//! Rates come from an immutable price book keyed by simulated model
//! name; an unknown model silently degrades to the `"default"` entry.

use std::collections::HashMap;

use modelmux_config::pricing::DEFAULT_PRICE_KEY;
use modelmux_config::{ModelPrice, PriceBookConfig};
use rand::Rng;
use serde::Serialize;

/// Chars-per-token assumption when a cost profile does not set one
const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Output tokens assumed per input token when the caller gives no hint
const OUTPUT_TOKEN_RATIO: f64 = 0.2;

/// Half-width of the uniform variance applied by `estimate_with_variance`
const VARIANCE_JITTER: f64 = 0.05;

/// Per-provider cost parameters from the capability record
#[derive(Debug, Clone)]
pub struct CostProfile {
    /// Key into the price book
    pub simulated_model_name: String,
    /// Characters per token for this provider's tokenizer
    pub chars_per_token: f64,
    /// Flat per-request fee in USD
    pub request_fixed_fee_usd: f64,
    /// Multiplier applied to every cost component
    pub discount_factor: f64,
}

impl CostProfile {
    /// Cost profile with default tokenizer ratio, no fixed fee, no discount
    pub fn new(simulated_model_name: impl Into<String>) -> Self {
        Self {
            simulated_model_name: simulated_model_name.into(),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            request_fixed_fee_usd: 0.0,
            discount_factor: 1.0,
        }
    }

    /// Override the chars-per-token ratio (non-positive values are ignored)
    #[must_use]
    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        if ratio > 0.0 {
            self.chars_per_token = ratio;
        }
        self
    }

    /// Override the flat per-request fee
    #[must_use]
    pub fn with_fixed_fee(mut self, fee_usd: f64) -> Self {
        self.request_fixed_fee_usd = fee_usd.max(0.0);
        self
    }

    /// Override the discount factor (non-positive values are ignored)
    #[must_use]
    pub fn with_discount(mut self, factor: f64) -> Self {
        if factor > 0.0 {
            self.discount_factor = factor;
        }
        self
    }
}

/// Cost breakdown for one prospective request
///
/// All components are post-discount.
#[derive(Debug, Clone, Serialize)]
pub struct CostEstimate {
    /// Estimated prompt tokens
    pub input_tokens: u64,
    /// Estimated completion tokens
    pub output_tokens: u64,
    /// Input cost in USD
    pub input_cost_usd: f64,
    /// Output cost in USD
    pub output_cost_usd: f64,
    /// Flat per-request fee in USD
    pub fixed_fee_usd: f64,
    /// Total estimated cost in USD
    pub total_usd: f64,
    /// Price book key the rates came from
    pub simulated_model_name: String,
}

/// Immutable mapping from simulated model name to per-kilotoken rates
#[derive(Debug, Clone)]
pub struct PriceBook {
    models: HashMap<String, ModelPrice>,
    default: ModelPrice,
}

impl PriceBook {
    /// Build a price book from configuration
    ///
    /// The config loader guarantees a `"default"` entry; when building
    /// programmatically without one, the built-in default rates apply.
    pub fn from_config(config: &PriceBookConfig) -> Self {
        let default = config
            .models
            .get(DEFAULT_PRICE_KEY)
            .copied()
            .unwrap_or_else(|| {
                PriceBookConfig::default().models[DEFAULT_PRICE_KEY]
            });

        let models = config
            .models
            .iter()
            .map(|(name, price)| (name.clone(), *price))
            .collect();

        Self { models, default }
    }

    /// Rates for a simulated model, falling back to the default entry
    pub fn rates_for(&self, simulated_model_name: &str) -> ModelPrice {
        self.models
            .get(simulated_model_name)
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for PriceBook {
    fn default() -> Self {
        Self::from_config(&PriceBookConfig::default())
    }
}

/// Stateless cost estimator over an immutable price book
#[derive(Debug, Clone)]
pub struct CostEstimator {
    book: PriceBook,
}

impl CostEstimator {
    /// Create an estimator backed by the given price book
    pub fn new(book: PriceBook) -> Self {
        Self { book }
    }

    /// Estimate the cost of a request
    ///
    /// `expected_output_tokens` overrides the output estimate when
    /// provided and positive; otherwise output is assumed proportional
    /// to input with a floor of one token. The provider's discount
    /// factor combines multiplicatively with any book-level discount on
    /// the rate entry.
    pub fn estimate(
        &self,
        prompt_chars: usize,
        expected_output_tokens: Option<u64>,
        profile: &CostProfile,
    ) -> CostEstimate {
        let chars_per_token = if profile.chars_per_token > 0.0 {
            profile.chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };

        let input_tokens = (prompt_chars as f64 / chars_per_token).ceil() as u64;
        let output_tokens = match expected_output_tokens {
            Some(tokens) if tokens > 0 => tokens,
            _ => ((input_tokens as f64 * OUTPUT_TOKEN_RATIO).ceil() as u64).max(1),
        };

        let rates = self.book.rates_for(&profile.simulated_model_name);
        let book_discount = if rates.discount_factor > 0.0 {
            rates.discount_factor
        } else {
            1.0
        };
        let discount = profile.discount_factor * book_discount;

        let input_cost_usd = (input_tokens as f64 / 1000.0) * rates.input * discount;
        let output_cost_usd = (output_tokens as f64 / 1000.0) * rates.output * discount;
        let fixed_fee_usd = profile.request_fixed_fee_usd * discount;

        CostEstimate {
            input_tokens,
            output_tokens,
            input_cost_usd,
            output_cost_usd,
            fixed_fee_usd,
            total_usd: input_cost_usd + output_cost_usd + fixed_fee_usd,
            simulated_model_name: profile.simulated_model_name.clone(),
        }
    }

    /// Estimate with one uniform variance draw applied
    ///
    /// The draw scales input, output, and total costs; the fixed fee is
    /// left untouched. Each call draws independently, so two candidates
    /// ranked in the same pass see independent variance.
    pub fn estimate_with_variance<R: Rng + ?Sized>(
        &self,
        prompt_chars: usize,
        expected_output_tokens: Option<u64>,
        profile: &CostProfile,
        rng: &mut R,
    ) -> CostEstimate {
        let mut estimate = self.estimate(prompt_chars, expected_output_tokens, profile);

        let jitter = 1.0 + rng.gen_range(-VARIANCE_JITTER..=VARIANCE_JITTER);
        estimate.input_cost_usd *= jitter;
        estimate.output_cost_usd *= jitter;
        estimate.total_usd *= jitter;

        estimate
    }
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::new(PriceBook::default())
    }
}

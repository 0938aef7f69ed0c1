use std::path::Path;

use crate::pricing::DEFAULT_PRICE_KEY;
use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails,
    /// or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let config: Self =
            toml::from_str(&raw).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if the price book lacks a default entry, any
    /// weight is negative or non-finite, or a structural bound is violated
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_pricing()?;
        self.validate_policy()?;
        self.validate_dispatcher()?;
        Ok(())
    }

    fn validate_pricing(&self) -> anyhow::Result<()> {
        if !self.pricing.models.contains_key(DEFAULT_PRICE_KEY) {
            anyhow::bail!("price book must contain a \"{DEFAULT_PRICE_KEY}\" entry");
        }

        for (name, price) in &self.pricing.models {
            if price.input < 0.0 || price.output < 0.0 {
                anyhow::bail!("price book entry '{name}' has a negative rate");
            }
            if !price.discount_factor.is_finite() || price.discount_factor <= 0.0 {
                anyhow::bail!(
                    "price book entry '{name}' must have a positive discount factor, got {}",
                    price.discount_factor
                );
            }
        }

        Ok(())
    }

    fn validate_policy(&self) -> anyhow::Result<()> {
        let weights = [
            ("json_bias_weight", self.policy.json_bias_weight),
            ("latency_weight", self.policy.latency_weight),
            ("failure_penalty", self.policy.failure_penalty),
            ("exploration_epsilon", self.policy.exploration_epsilon),
            ("cost_weight", self.policy.cost_weight),
        ];

        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("policy weight '{name}' must be finite and non-negative, got {value}");
            }
        }

        Ok(())
    }

    fn validate_dispatcher(&self) -> anyhow::Result<()> {
        if self.dispatcher.telemetry_window == 0 {
            anyhow::bail!("telemetry_window must be at least 1");
        }
        if self.dispatcher.circuit_failure_threshold == 0 {
            anyhow::bail!("circuit_failure_threshold must be at least 1");
        }
        if let Some(budget) = self.dispatcher.session_budget_usd
            && (!budget.is_finite() || budget < 0.0)
        {
            anyhow::bail!("session_budget_usd must be finite and non-negative, got {budget}");
        }
        Ok(())
    }
}

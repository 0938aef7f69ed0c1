//! Scripted in-process providers for dispatcher integration tests

// Each test binary uses a different slice of the harness
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use modelmux_billing::PriceBook;
use modelmux_config::{ModelPrice, PolicyConfig, PriceBookConfig};
use modelmux_dispatch::{HandlerError, ProviderHandler};

/// Mock provider with a scripted outcome sequence
pub struct MockProvider {
    delay: Duration,
    /// Calls to fail before the canned response; `u32::MAX` fails forever
    fail_first: AtomicU32,
    response: Value,
    calls: AtomicU32,
}

impl MockProvider {
    /// Succeeds immediately with the given response text
    pub fn ok(response: &str) -> Arc<Self> {
        Self::scripted(response, 0, Duration::ZERO)
    }

    /// Succeeds with the given response after a delay
    pub fn ok_after(response: &str, delay: Duration) -> Arc<Self> {
        Self::scripted(response, 0, delay)
    }

    /// Fails every call
    pub fn failing() -> Arc<Self> {
        Self::scripted("unreachable", u32::MAX, Duration::ZERO)
    }

    /// Fails every call, after a delay
    pub fn failing_after(delay: Duration) -> Arc<Self> {
        Self::scripted("unreachable", u32::MAX, delay)
    }

    /// Fails the first `n` calls, then succeeds with the response text
    pub fn fail_first(n: u32, response: &str) -> Arc<Self> {
        Self::scripted(response, n, Duration::ZERO)
    }

    fn scripted(response: &str, fail_first: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail_first: AtomicU32::new(fail_first),
            response: json!(response),
            calls: AtomicU32::new(0),
        })
    }

    /// How many times the handler was invoked
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderHandler for MockProvider {
    async fn invoke(&self, _params: Value, _cancel: CancellationToken) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(HandlerError::failed("scripted failure"));
        }

        Ok(self.response.clone())
    }
}

/// Price book with a cheap and an expensive simulated model
pub fn price_book() -> PriceBook {
    let mut models = IndexMap::new();
    models.insert("default".to_owned(), ModelPrice::new(0.0005, 0.0015));
    models.insert("sim-small".to_owned(), ModelPrice::new(0.000_15, 0.0006));
    models.insert("sim-large".to_owned(), ModelPrice::new(0.005, 0.015));
    PriceBook::from_config(&PriceBookConfig { models })
}

/// Weights with jitter and cost variance disabled, for assertable ranking
pub fn deterministic_policy() -> PolicyConfig {
    PolicyConfig {
        exploration_epsilon: 0.0,
        cost_variance: false,
        ..PolicyConfig::default()
    }
}

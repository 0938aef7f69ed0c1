//! Provider handler contract and parameter projection
//!
//! Params are an opaque JSON record passed through to the handler
//! unchanged. The core reads exactly three optional fields: `prompt`
//! (or `text`) for the prompt-length heuristic and `schema` for the
//! structured-output bias.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;

/// An invocable backend bound to a (provider, capability) pair
///
/// The handler owns its transport; the dispatcher only races it
/// against the per-call deadline. Implementations must respect the
/// cancellation token: once it fires, any work the handler spawned
/// should stop, and its result will be discarded either way.
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    /// Execute the request
    async fn invoke(&self, params: Value, cancel: CancellationToken) -> Result<Value, HandlerError>;
}

/// Character count of the textual prompt field, 0 when none
pub(crate) fn prompt_length_of(params: &Value) -> usize {
    params
        .get("prompt")
        .or_else(|| params.get("text"))
        .and_then(Value::as_str)
        .map_or(0, |text| text.chars().count())
}

/// Whether the params carry a truthy `schema` field
pub(crate) fn wants_schema(params: &Value) -> bool {
    params.get("schema").is_some_and(|schema| match schema {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

//! Dispatch-level error types

use std::time::Duration;

use thiserror::Error;

/// Error from a single handler attempt
///
/// Both variants are recoverable inside the retry loop; callers only
/// see one wrapped in [`DispatchError::Exhausted`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler signalled an error
    #[error("handler failed: {0}")]
    Failed(String),

    /// The per-call deadline elapsed before the handler resolved
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
}

impl HandlerError {
    /// Failure with the given message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors surfaced to dispatch callers
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Registry has no entry for the capability (or none matching the hint)
    #[error("no providers registered for capability '{capability}'")]
    NoProviders {
        /// The capability that was requested
        capability: String,
    },

    /// Every provider was filtered out before any attempt was made
    #[error("all providers unavailable for capability '{capability}' (circuits open or over budget)")]
    AllUnavailable {
        /// The capability that was requested
        capability: String,
    },

    /// The retry budget ran out with at least one attempted candidate
    #[error(
        "candidates exhausted for capability '{capability}' after {attempts} attempts \
         (tried: {attempted_providers})"
    )]
    Exhausted {
        /// The capability that was requested
        capability: String,
        /// Attempts actually made
        attempts: usize,
        /// Comma-separated provider ids in attempt order
        attempted_providers: String,
        /// The provider of the final attempt
        last_provider: String,
        /// The error from the final attempt
        #[source]
        last_error: HandlerError,
    },
}

impl DispatchError {
    /// Provider ids attempted before this error, in order
    ///
    /// Empty for errors raised before any attempt was made.
    pub fn attempted_providers(&self) -> Vec<&str> {
        match self {
            Self::Exhausted {
                attempted_providers, ..
            } => attempted_providers.split(',').filter(|s| !s.is_empty()).collect(),
            _ => Vec::new(),
        }
    }
}

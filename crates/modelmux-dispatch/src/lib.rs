//! Cost-aware dispatch of inference requests across providers
//!
//! The dispatcher is the orchestration layer: it snapshots the registry,
//! asks the policy for a ranking, runs the winning handler under a hard
//! deadline, and retries down the ranked list while keeping telemetry,
//! circuit state, and the session ledger honest.

#![allow(clippy::must_use_candidate, clippy::cast_possible_truncation)]

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod outcome;

pub use dispatcher::{
    DispatchOptions, DispatchResponse, Dispatcher, DispatcherBuilder, PolicyOverrides,
};
pub use error::{DispatchError, HandlerError};
pub use handler::ProviderHandler;
pub use outcome::{CallOutcome, OutcomeRecorder};

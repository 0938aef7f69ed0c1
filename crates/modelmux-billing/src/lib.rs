//! Cost estimation and session budget accounting
//!
//! The estimator is a pure function over an immutable price book; the
//! ledger is the process-lifetime record of what successful dispatches
//! have spent against the session budget.

#![allow(clippy::must_use_candidate, clippy::cast_precision_loss)]

pub mod estimator;
pub mod ledger;

pub use estimator::{CostEstimate, CostEstimator, CostProfile, PriceBook};
pub use ledger::{BudgetStatus, SessionLedger};

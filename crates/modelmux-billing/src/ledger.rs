//! Session budget ledger
//!
//! Spend is recorded only for successful dispatches and never rolls
//! back. The budget ceiling is enforced before dispatch by the policy
//! filter; a charge that lands past the ceiling is accepted, since the
//! external cost was already incurred by the time the handler returned.

use std::sync::Mutex;

use serde::Serialize;

/// Point-in-time view of the ledger
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BudgetStatus {
    /// Budget ceiling in USD; `None` means unbounded
    pub total_usd: Option<f64>,
    /// USD charged so far this session
    pub spent_usd: f64,
}

impl BudgetStatus {
    /// Remaining budget, when bounded
    pub fn remaining_usd(&self) -> Option<f64> {
        self.total_usd.map(|total| total - self.spent_usd)
    }

    /// Fraction of the budget spent, when bounded and non-zero
    pub fn utilization(&self) -> Option<f64> {
        match self.total_usd {
            Some(total) if total > 0.0 => Some(self.spent_usd / total),
            _ => None,
        }
    }

    /// Whether a budget ceiling is configured
    pub fn is_bounded(&self) -> bool {
        self.total_usd.is_some()
    }
}

struct LedgerState {
    total_usd: Option<f64>,
    spent_usd: f64,
}

/// Process-lifetime spend ledger, linearized behind a mutex
pub struct SessionLedger {
    state: Mutex<LedgerState>,
}

impl SessionLedger {
    /// Ledger with an optional budget ceiling
    pub fn new(total_usd: Option<f64>) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                total_usd,
                spent_usd: 0.0,
            }),
        }
    }

    /// Ledger with no ceiling
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Record spend from a successful dispatch
    ///
    /// Negative amounts are ignored; spend is monotone.
    pub fn charge(&self, amount_usd: f64) {
        if !amount_usd.is_finite() || amount_usd <= 0.0 {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.spent_usd += amount_usd;

        if let Some(total) = state.total_usd
            && state.spent_usd > total
        {
            tracing::warn!(
                spent_usd = state.spent_usd,
                total_usd = total,
                "session spend has passed the budget ceiling"
            );
        }
    }

    /// Replace the budget ceiling; spend is untouched
    pub fn set_budget(&self, total_usd: Option<f64>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total_usd = total_usd;
    }

    /// Reset spend to zero
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.spent_usd = 0.0;
    }

    /// Current totals, consistent as of one instant
    pub fn status(&self) -> BudgetStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        BudgetStatus {
            total_usd: state.total_usd,
            spent_usd: state.spent_usd,
        }
    }
}

//! Per-symbol stop-loss latch.
//!
//! Once a symbol trips its stop-loss it stays latched until an operator
//! resets it. Quoting for a latched symbol is skipped entirely.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{error, info, warn};

// ============================================================================
// LatchState
// ============================================================================

/// Why and when a symbol latched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatchState {
    pub reason: String,
    pub triggered_at: DateTime<Utc>,
}

// ============================================================================
// StopLossLatch
// ============================================================================

/// Thread-safe set of latched symbols.
///
/// Share across tasks via `Arc<StopLossLatch>`.
#[derive(Debug, Default)]
pub struct StopLossLatch {
    latched: DashMap<String, LatchState>,
}

impl StopLossLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `symbol`.
    ///
    /// Returns `true` on the first trigger. A repeat trigger keeps the
    /// original reason and returns `false`.
    pub fn trigger(&self, symbol: &str, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        match self.latched.entry(symbol.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(symbol, new_reason = %reason, "Stop-loss already latched, ignoring new trigger");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                error!(symbol, reason = %reason, "STOP-LOSS LATCHED");
                slot.insert(LatchState {
                    reason,
                    triggered_at: Utc::now(),
                });
                true
            }
        }
    }

    #[must_use]
    pub fn is_latched(&self, symbol: &str) -> bool {
        self.latched.contains_key(symbol)
    }

    #[must_use]
    pub fn state(&self, symbol: &str) -> Option<LatchState> {
        self.latched.get(symbol).map(|s| s.value().clone())
    }

    /// Manually clear the latch for `symbol`. Returns the cleared state.
    ///
    /// There is no automatic reset.
    pub fn reset(&self, symbol: &str) -> Option<LatchState> {
        let (_, state) = self.latched.remove(symbol)?;
        info!(symbol, previous_reason = %state.reason, "Stop-loss latch manually reset");
        Some(state)
    }

    /// Latched symbols, sorted.
    #[must_use]
    pub fn latched_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.latched.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }
}

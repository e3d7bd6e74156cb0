//! Concurrent per-symbol state registry.
//!
//! Each symbol lives behind its own `parking_lot::RwLock`. The total
//! notional aggregate sits behind a store-level mutex that is always
//! acquired before any per-symbol lock.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use perp_core::{PositionUpdate, QuoteMode};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::{Position, SymbolSnapshot, SymbolState, RATE_WINDOW_SECS};

type StateEntry = Arc<RwLock<SymbolState>>;

/// Shared state for every quoted symbol.
pub struct Store {
    symbols: DashMap<String, StateEntry>,
    total_notional: Mutex<Decimal>,
    pub(crate) snapshot_path: Option<PathBuf>,
}

impl Store {
    /// In-memory store without persistence.
    pub fn new() -> Self {
        Self {
            symbols: DashMap::new(),
            total_notional: Mutex::new(Decimal::ZERO),
            snapshot_path: None,
        }
    }

    /// Store that checkpoints to `path`, seeded from it when the file exists.
    ///
    /// A missing or unreadable snapshot is not fatal: the store starts empty.
    pub fn with_snapshot_path(path: impl AsRef<Path>) -> Self {
        let mut store = Self::new();
        store.snapshot_path = Some(path.as_ref().to_path_buf());
        match store.load_snapshot() {
            Ok(0) => {}
            Ok(count) => info!(count, path = %path.as_ref().display(), "Restored state from snapshot"),
            Err(e) => warn!(error = %e, "Failed to load snapshot, starting fresh"),
        }
        store
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Clone the entry handle so the map shard is released before locking.
    fn entry(&self, symbol: &str) -> Option<StateEntry> {
        self.symbols.get(symbol).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn insert_state(&self, state: SymbolState) {
        self.symbols
            .insert(state.symbol.clone(), Arc::new(RwLock::new(state)));
    }

    pub(crate) fn all_states(&self) -> Vec<SymbolState> {
        let entries: Vec<StateEntry> = self
            .symbols
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let mut states: Vec<SymbolState> = entries.iter().map(|e| e.read().clone()).collect();
        states.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        states
    }

    /// Create state for `symbol` if absent. Idempotent.
    pub fn init_symbol(&self, symbol: &str, history_size: usize) {
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| {
                debug!(symbol, history_size, "Initialized symbol state");
                Arc::new(RwLock::new(SymbolState::new(symbol, history_size)))
            });
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    /// All known symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.symbols.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    // ========================================================================
    // Mutators
    // ========================================================================

    /// Record a new top of book. Non-positive mids are ignored.
    pub fn update_mid_price(&self, symbol: &str, best_bid: Decimal, best_ask: Decimal) {
        let mid = (best_bid + best_ask) / Decimal::TWO;
        if mid <= Decimal::ZERO {
            debug!(symbol, %best_bid, %best_ask, "Ignoring non-positive mid");
            return;
        }
        match self.entry(symbol) {
            Some(entry) => entry.write().apply_mid(best_bid, best_ask, mid),
            None => debug!(symbol, "update_mid_price: unknown symbol"),
        }
    }

    /// Replace the position and recompute total notional.
    pub fn update_position(&self, update: &PositionUpdate) {
        let Some(entry) = self.entry(&update.symbol) else {
            debug!(symbol = %update.symbol, "update_position: unknown symbol");
            return;
        };

        let mut total = self.total_notional.lock();
        entry.write().position = Position::from_update(update);
        *total = self.sum_notional();
    }

    /// Σ|notional|, taking one read lock at a time.
    fn sum_notional(&self) -> Decimal {
        let entries: Vec<StateEntry> = self
            .symbols
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        entries
            .iter()
            .map(|e| e.read().position.notional.abs())
            .sum()
    }

    /// Set the current funding rate and append it to history.
    pub fn update_funding_rate(&self, symbol: &str, rate: Decimal) {
        match self.entry(symbol) {
            Some(entry) => {
                let mut state = entry.write();
                state.funding_rate = rate;
                state.funding_history.push(rate);
            }
            None => debug!(symbol, "update_funding_rate: unknown symbol"),
        }
    }

    pub fn update_pending_orders(&self, symbol: &str, pending_buy: Decimal, pending_sell: Decimal) {
        if let Some(entry) = self.entry(symbol) {
            let mut state = entry.write();
            state.pending_buy = pending_buy;
            state.pending_sell = pending_sell;
        }
    }

    pub fn record_fill(&self, symbol: &str, size: Decimal, pnl: Decimal) {
        match self.entry(symbol) {
            Some(entry) => entry.write().apply_fill(size, pnl),
            None => debug!(symbol, "record_fill: unknown symbol"),
        }
    }

    /// Increment the per-minute cancel counter. Returns the new count.
    pub fn increment_cancel_count(&self, symbol: &str) -> Option<u32> {
        self.entry(symbol)
            .map(|entry| entry.write().bump_cancel_count(Utc::now()))
    }

    /// Increment the per-minute place counter. Returns the new count.
    pub fn increment_place_count(&self, symbol: &str) -> Option<u32> {
        self.entry(symbol)
            .map(|entry| entry.write().bump_place_count(Utc::now()))
    }

    /// Zero the cancel counter when its window has elapsed.
    ///
    /// Returns the count that was cleared.
    pub fn reset_cancel_count_if_due(&self, symbol: &str) -> Option<u32> {
        let entry = self.entry(symbol)?;
        let mut state = entry.write();
        let now = Utc::now();
        if now - state.last_cancel_reset > chrono::Duration::seconds(RATE_WINDOW_SECS) {
            let old = state.cancel_count_last;
            state.cancel_count_last = 0;
            state.last_cancel_reset = now;
            return Some(old);
        }
        None
    }

    pub fn set_active_order_count(&self, symbol: &str, count: u32) {
        if let Some(entry) = self.entry(symbol) {
            entry.write().active_order_count = count;
        }
    }

    /// Record the mode chosen this cycle, returning the previous one.
    pub fn set_last_mode(&self, symbol: &str, mode: QuoteMode) -> Option<QuoteMode> {
        let entry = self.entry(symbol)?;
        let mut state = entry.write();
        Some(std::mem::replace(&mut state.last_mode, mode))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn symbol_snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.entry(symbol).map(|entry| entry.read().snapshot())
    }

    pub fn mid_price(&self, symbol: &str) -> Decimal {
        self.entry(symbol)
            .map(|entry| entry.read().mid_price)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn price_std_dev(&self, symbol: &str) -> Decimal {
        self.entry(symbol)
            .map(|entry| entry.read().price_std_dev())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn predicted_funding(&self, symbol: &str) -> Decimal {
        self.entry(symbol)
            .map(|entry| entry.read().predicted_funding())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn worst_case_long(&self, symbol: &str) -> Decimal {
        self.entry(symbol)
            .map(|entry| entry.read().worst_case_long())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn active_order_count(&self, symbol: &str) -> u32 {
        self.entry(symbol)
            .map(|entry| entry.read().active_order_count)
            .unwrap_or(0)
    }

    pub fn total_notional(&self) -> Decimal {
        *self.total_notional.lock()
    }

    /// Whether total notional strictly exceeds `max`.
    pub fn is_over_cap(&self, max: Decimal) -> bool {
        self.total_notional() > max
    }

    pub(crate) fn recompute_total_notional(&self) {
        let mut total = self.total_notional.lock();
        *total = self.sum_notional();
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-cycle quote generation.
//!
//! `QuoteEngine` reads a consistent snapshot from the store, checks the
//! preconditions in a fixed order, selects a quoting mode and delegates to
//! the grid, pinning or grinding builders.

use dashmap::DashMap;
use parking_lot::Mutex;
use perp_core::{Quote, QuoteMode, SymbolConfig, Trade};
use perp_store::{Store, SymbolSnapshot};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{StrategyError, StrategyResult};
use crate::grid::build_normal_grid;
use crate::grinding::{build_grinding_quotes, grinding_progress, should_grind};
use crate::pinning::{build_pinning_quotes, should_pin};
use crate::pricing::PricingModel;
use crate::vpin::{VpinCalculator, VpinStats, NEUTRAL_VPIN};

/// Desired quotes for one symbol and cycle, innermost first per side.
#[derive(Debug, Clone)]
pub struct QuoteSet {
    pub mode: QuoteMode,
    pub buys: Vec<Quote>,
    pub sells: Vec<Quote>,
    pub pricing: PricingModel,
}

impl QuoteSet {
    pub fn best_buy(&self) -> Option<&Quote> {
        self.buys.first()
    }

    pub fn best_sell(&self) -> Option<&Quote> {
        self.sells.first()
    }

    pub fn is_empty(&self) -> bool {
        self.buys.is_empty() && self.sells.is_empty()
    }
}

/// Quote generator over all configured symbols.
pub struct QuoteEngine {
    configs: HashMap<String, SymbolConfig>,
    store: Arc<Store>,
    vpin: DashMap<String, Arc<Mutex<VpinCalculator>>>,
}

impl QuoteEngine {
    pub fn new(configs: Vec<SymbolConfig>, store: Arc<Store>) -> Self {
        let configs = configs
            .into_iter()
            .map(|c| (c.symbol.clone(), c))
            .collect();
        Self {
            configs,
            store,
            vpin: DashMap::new(),
        }
    }

    pub fn config(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.configs.get(symbol)
    }

    /// Configured symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.configs.keys().cloned().collect();
        out.sort();
        out
    }

    // ========================================================================
    // Quote generation
    // ========================================================================

    /// Generate this cycle's quotes for `symbol`.
    ///
    /// Errors, in check order: not configured, not initialized, cancel-rate
    /// flicker, invalid mid, VPIN pause.
    pub fn generate_quotes(&self, symbol: &str) -> StrategyResult<QuoteSet> {
        let config = self
            .configs
            .get(symbol)
            .ok_or_else(|| StrategyError::SymbolNotConfigured(symbol.to_string()))?;
        let snapshot = self
            .store
            .symbol_snapshot(symbol)
            .ok_or_else(|| StrategyError::SymbolNotInitialized(symbol.to_string()))?;

        // Back off at 80% of the cancel budget.
        let limit = config.max_cancel_per_min;
        if snapshot.cancel_count_last * 5 >= limit * 4 {
            return Err(StrategyError::QuoteFlicker {
                count: snapshot.cancel_count_last,
                limit,
            });
        }

        let ratio = snapshot.inventory_ratio(config.net_max);
        if ratio > Decimal::new(8, 1) {
            warn!(symbol, %ratio, position = %snapshot.position.size, "Inventory above 80% of net_max");
        } else if ratio > Decimal::new(5, 1) {
            debug!(symbol, %ratio, "Inventory above 50% of net_max");
        }

        let set = generate_from_snapshot(config, &snapshot, self.current_vpin(symbol))?;

        if let Some(prev) = self.store.set_last_mode(symbol, set.mode) {
            if prev != set.mode {
                info!(symbol, from = %prev, to = %set.mode, %ratio, "Quote mode changed");
            }
        }
        Ok(set)
    }

    /// How far past the grinding threshold the symbol's inventory sits.
    pub fn grinding_progress(&self, symbol: &str) -> Decimal {
        match (self.configs.get(symbol), self.store.symbol_snapshot(symbol)) {
            (Some(config), Some(snapshot)) => grinding_progress(config, &snapshot),
            _ => Decimal::ZERO,
        }
    }

    // ========================================================================
    // VPIN
    // ========================================================================

    /// Create a VPIN calculator when the symbol has VPIN enabled.
    ///
    /// Returns true when a calculator is registered after the call.
    pub fn enable_vpin(&self, symbol: &str) -> bool {
        let Some(config) = self.configs.get(symbol) else {
            return false;
        };
        if !config.vpin.enabled {
            return false;
        }
        self.vpin.entry(symbol.to_string()).or_insert_with(|| {
            info!(symbol, bucket_size = config.vpin.bucket_size, buckets = config.vpin.num_buckets, "VPIN enabled");
            Arc::new(Mutex::new(VpinCalculator::new(symbol, config.vpin.clone())))
        });
        true
    }

    fn calculator(&self, symbol: &str) -> Option<Arc<Mutex<VpinCalculator>>> {
        self.vpin.get(symbol).map(|c| Arc::clone(c.value()))
    }

    /// Feed a public trade. Symbols without a calculator are ignored.
    pub fn record_trade(&self, trade: &Trade) -> StrategyResult<()> {
        match self.calculator(&trade.symbol) {
            Some(calc) => calc.lock().update_trade(trade),
            None => Ok(()),
        }
    }

    pub fn update_vpin_mid(&self, symbol: &str, mid: Decimal) {
        if let Some(calc) = self.calculator(symbol) {
            calc.lock().update_mid_price(mid.to_f64().unwrap_or(0.0));
        }
    }

    /// Neutral 0.5 when the symbol has no calculator.
    pub fn current_vpin(&self, symbol: &str) -> f64 {
        self.calculator(symbol)
            .map(|calc| calc.lock().vpin())
            .unwrap_or(NEUTRAL_VPIN)
    }

    pub fn vpin_stats(&self, symbol: &str) -> Option<VpinStats> {
        self.calculator(symbol).map(|calc| calc.lock().stats())
    }

    pub fn update_vpin_thresholds(&self, symbol: &str, threshold: f64, pause_thresh: f64, multiplier: f64) -> bool {
        match self.calculator(symbol) {
            Some(calc) => {
                calc.lock().update_thresholds(threshold, pause_thresh, multiplier);
                true
            }
            None => false,
        }
    }

    pub fn reset_vpin(&self, symbol: &str) {
        if let Some(calc) = self.calculator(symbol) {
            calc.lock().reset();
        }
    }
}

/// Pure quote generation from a snapshot and VPIN value.
pub fn generate_from_snapshot(
    config: &SymbolConfig,
    snapshot: &SymbolSnapshot,
    vpin: f64,
) -> StrategyResult<QuoteSet> {
    let mid = snapshot.mid_price;
    if mid <= Decimal::ZERO {
        return Err(StrategyError::InvalidMidPrice(format!("{}: mid={}", config.symbol, mid)));
    }

    let pinning = should_pin(config, snapshot);
    let grinding = should_grind(config, snapshot);

    // Grinding conditions override the toxicity pause so inventory can still shrink.
    if config.vpin.enabled && vpin >= config.vpin.pause_thresh && !grinding {
        return Err(StrategyError::HighVpinToxicity {
            vpin,
            pause_thresh: config.vpin.pause_thresh,
        });
    }

    let pricing = PricingModel::compute(config, snapshot, vpin);
    if pricing.vpin_widened {
        debug!(symbol = %config.symbol, vpin, spread = %pricing.spread, "Spread widened on VPIN");
    }

    let (mode, quotes) = if pinning {
        (QuoteMode::Pinning, build_pinning_quotes(config, snapshot))
    } else if grinding {
        (QuoteMode::Grinding, build_grinding_quotes(config, snapshot))
    } else {
        (
            QuoteMode::Normal,
            build_normal_grid(config, &pricing, snapshot.position.size),
        )
    };

    Ok(QuoteSet {
        mode,
        buys: quotes.buys,
        sells: quotes.sells,
        pricing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use perp_core::{OrderSide, PositionUpdate, Price, Size};
    use rust_decimal_macros::dec;

    fn btc_config() -> SymbolConfig {
        let mut config = SymbolConfig::new("BTCUSDC");
        config.net_max = dec!(1);
        config.min_spread = dec!(0.0005);
        config.tick_size = dec!(0.1);
        config.min_qty = dec!(0.001);
        config.base_layer_size = dec!(0.01);
        config.max_cancel_per_min = 50;
        config
    }

    fn engine_with(config: SymbolConfig) -> (QuoteEngine, Arc<Store>) {
        let store = Arc::new(Store::new());
        store.init_symbol(&config.symbol, 64);
        let engine = QuoteEngine::new(vec![config], Arc::clone(&store));
        (engine, store)
    }

    fn set_position(store: &Store, size: Decimal) {
        store.update_position(&PositionUpdate {
            symbol: "BTCUSDC".to_string(),
            size,
            entry_price: dec!(50000),
            ..Default::default()
        });
    }

    fn buy(qty: Decimal) -> Trade {
        Trade {
            symbol: "BTCUSDC".to_string(),
            price: Price::new(dec!(50000)),
            quantity: Size::new(qty),
            side: Some(OrderSide::Buy),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_flat_book_normal_quotes() {
        let (engine, store) = engine_with(btc_config());
        store.update_mid_price("BTCUSDC", dec!(50000), dec!(50000));

        let set = engine.generate_quotes("BTCUSDC").unwrap();
        assert_eq!(set.mode, QuoteMode::Normal);
        assert_eq!(set.pricing.reservation, dec!(50000));
        let best_buy = set.best_buy().unwrap().price.0;
        let best_sell = set.best_sell().unwrap().price.0;
        assert!(best_buy <= dec!(49987.5));
        assert!(best_sell >= dec!(50012.5));
        assert!((best_sell - best_buy) / dec!(50000) >= dec!(0.0005));
    }

    #[test]
    fn test_precondition_order() {
        let (engine, store) = engine_with(btc_config());
        assert!(matches!(
            engine.generate_quotes("ETHUSDC"),
            Err(StrategyError::SymbolNotConfigured(_))
        ));

        let unstored = QuoteEngine::new(vec![btc_config()], Arc::new(Store::new()));
        assert!(matches!(
            unstored.generate_quotes("BTCUSDC"),
            Err(StrategyError::SymbolNotInitialized(_))
        ));

        // No mid yet
        assert!(matches!(
            engine.generate_quotes("BTCUSDC"),
            Err(StrategyError::InvalidMidPrice(_))
        ));

        // Flicker is checked before the mid
        for _ in 0..45 {
            store.increment_cancel_count("BTCUSDC");
        }
        assert!(matches!(
            engine.generate_quotes("BTCUSDC"),
            Err(StrategyError::QuoteFlicker { count: 45, limit: 50 })
        ));
    }

    #[test]
    fn test_flicker_boundary() {
        let (engine, store) = engine_with(btc_config());
        store.update_mid_price("BTCUSDC", dec!(50000), dec!(50000));
        for _ in 0..39 {
            store.increment_cancel_count("BTCUSDC");
        }
        assert!(engine.generate_quotes("BTCUSDC").is_ok());
        store.increment_cancel_count("BTCUSDC");
        assert!(matches!(
            engine.generate_quotes("BTCUSDC"),
            Err(StrategyError::QuoteFlicker { count: 40, .. })
        ));
    }

    #[test]
    fn test_vpin_pause_and_grinding_exemption() {
        let mut config = btc_config();
        config.vpin.enabled = true;
        config.vpin.bucket_size = 1.0;
        config.vpin.vol_threshold = 0.0;
        config.grinding.enabled = true;
        config.grinding.threshold = dec!(0.6);
        let (engine, store) = engine_with(config);
        assert!(engine.enable_vpin("BTCUSDC"));
        store.update_mid_price("BTCUSDC", dec!(50000), dec!(50000));

        for _ in 0..5 {
            engine.record_trade(&buy(dec!(1))).unwrap();
        }
        assert_eq!(engine.current_vpin("BTCUSDC"), 1.0);

        let err = engine.generate_quotes("BTCUSDC").unwrap_err();
        assert!(err.is_toxicity_pause());

        set_position(&store, dec!(0.7));
        let set = engine.generate_quotes("BTCUSDC").unwrap();
        assert_eq!(set.mode, QuoteMode::Grinding);
        assert!(!set.sells.is_empty());
    }

    #[test]
    fn test_pinning_has_priority_over_grinding() {
        let mut config = btc_config();
        config.pinning.enabled = true;
        config.pinning.threshold = dec!(0.85);
        config.grinding.enabled = true;
        config.grinding.threshold = dec!(0.6);
        let (engine, store) = engine_with(config);
        store.update_mid_price("BTCUSDC", dec!(49999), dec!(50001));

        set_position(&store, dec!(0.7));
        assert_eq!(engine.generate_quotes("BTCUSDC").unwrap().mode, QuoteMode::Grinding);

        set_position(&store, dec!(0.9));
        let set = engine.generate_quotes("BTCUSDC").unwrap();
        assert_eq!(set.mode, QuoteMode::Pinning);
        assert_eq!(set.sells[0].price.0, dec!(50001));
        assert_eq!(engine.grinding_progress("BTCUSDC"), dec!(0.75));
    }

    #[test]
    fn test_mode_recorded_in_store() {
        let mut config = btc_config();
        config.pinning.enabled = true;
        let (engine, store) = engine_with(config);
        store.update_mid_price("BTCUSDC", dec!(50000), dec!(50000));
        set_position(&store, dec!(0.95));

        engine.generate_quotes("BTCUSDC").unwrap();
        assert_eq!(store.symbol_snapshot("BTCUSDC").unwrap().last_mode, QuoteMode::Pinning);
    }

    #[test]
    fn test_vpin_helpers_without_calculator() {
        let (engine, _store) = engine_with(btc_config());
        assert!(!engine.enable_vpin("BTCUSDC"));
        assert_eq!(engine.current_vpin("BTCUSDC"), NEUTRAL_VPIN);
        assert!(engine.vpin_stats("BTCUSDC").is_none());
        assert!(engine.record_trade(&buy(dec!(1))).is_ok());
        assert!(!engine.update_vpin_thresholds("BTCUSDC", 0.5, 0.6, 0.1));
    }
}

//! Risk gate implementation.
//!
//! # Pre-trade gate order
//! 1. MinQty: size below the exchange minimum
//! 2. ReduceOnly: strictly reducing trades pass immediately
//! 3. NetPosition: over-limit books may only reduce; grinding relaxes the
//!    limit to 1.2x for reducing-direction trades
//! 4. WorstCase: exposure with all resting orders filled within 1.5x
//! 5. GlobalCap: total notional across symbols
//! 6. CancelRate: per-minute cancel budget

use std::collections::HashMap;
use std::sync::Arc;

use perp_core::{OrderSide, Price, Quote, Size, SymbolConfig};
use perp_store::{Store, SymbolSnapshot};
use rust_decimal::Decimal;
use tracing::{debug, info, trace, warn};

use crate::error::{RiskError, RiskResult};

/// Worst-case exposure limit as a multiple of net_max.
pub(crate) fn worst_case_mult() -> Decimal {
    Decimal::new(15, 1)
}

/// Outcome of a single gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    /// Gate passed.
    Pass,
    /// Gate blocked with reason.
    Block(String),
}

impl GateResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    fn into_result(self, gate: &str) -> RiskResult<()> {
        match self {
            Self::Pass => Ok(()),
            Self::Block(reason) => {
                trace!(gate, reason = %reason, "gate blocked");
                Err(RiskError::blocked(gate, reason))
            }
        }
    }
}

/// Stateless risk checks over the shared store.
pub struct RiskGate {
    pub(crate) configs: HashMap<String, SymbolConfig>,
    pub(crate) store: Arc<Store>,
    total_notional_max: Decimal,
}

impl RiskGate {
    pub fn new(configs: Vec<SymbolConfig>, store: Arc<Store>, total_notional_max: Decimal) -> Self {
        Self {
            configs: configs.into_iter().map(|c| (c.symbol.clone(), c)).collect(),
            store,
            total_notional_max,
        }
    }

    pub fn total_notional_max(&self) -> Decimal {
        self.total_notional_max
    }

    /// Config and a fresh snapshot, or a data error.
    pub(crate) fn inputs(&self, symbol: &str) -> RiskResult<(&SymbolConfig, SymbolSnapshot)> {
        let config = self
            .configs
            .get(symbol)
            .ok_or_else(|| RiskError::ConfigError(format!("symbol not configured: {symbol}")))?;
        let snapshot = self
            .store
            .symbol_snapshot(symbol)
            .ok_or_else(|| RiskError::DataUnavailable(format!("no state for {symbol}")))?;
        Ok((config, snapshot))
    }

    // ========================================================================
    // Pre-trade
    // ========================================================================

    /// Check a single prospective order.
    ///
    /// # Arguments
    /// - `symbol`: Instrument
    /// - `side`: Order side
    /// - `size`: Order quantity (base units)
    ///
    /// # Returns
    /// `Ok(())` when the order may be placed, `GateBlocked` naming the first
    /// failing gate otherwise.
    pub fn check_pre_trade(&self, symbol: &str, side: OrderSide, size: Decimal) -> RiskResult<()> {
        let (config, snapshot) = self.inputs(symbol)?;

        check_min_qty(config, size).into_result("min_qty")?;

        if is_strictly_reducing(snapshot.position.size, side, size) {
            trace!(symbol, %side, %size, "reduce-only exemption");
            return Ok(());
        }

        check_net_position(config, &snapshot, side, size).into_result("net_position")?;
        check_worst_case(config, &snapshot, side, size).into_result("worst_case")?;

        if self.store.is_over_cap(self.total_notional_max) {
            return GateResult::Block(format!(
                "total notional {} > cap {}",
                self.store.total_notional(),
                self.total_notional_max
            ))
            .into_result("global_cap");
        }

        check_cancel_rate(config, &snapshot).into_result("cancel_rate")
    }

    /// Check the aggregate of a full quote batch against worst-case limits.
    ///
    /// Long or flat: |pos + Σbuy| ≤ 1.5·net_max. Short or flat:
    /// |pos − Σsell| ≤ 1.5·net_max.
    pub fn check_batch_pre_trade(&self, symbol: &str, buys: &[Quote], sells: &[Quote]) -> RiskResult<()> {
        let (config, snapshot) = self.inputs(symbol)?;
        let pos = snapshot.position.size;
        let limit = config.net_max * worst_case_mult();
        let total_buy: Decimal = buys.iter().map(|q| q.size.0).sum();
        let total_sell: Decimal = sells.iter().map(|q| q.size.0).sum();

        if pos >= Decimal::ZERO && (pos + total_buy).abs() > limit {
            return Err(RiskError::blocked(
                "batch_worst_case",
                format!("long exposure {} + {} > {}", pos, total_buy, limit),
            ));
        }
        if pos <= Decimal::ZERO && (pos - total_sell).abs() > limit {
            return Err(RiskError::blocked(
                "batch_worst_case",
                format!("short exposure {} - {} > {}", pos, total_sell, limit),
            ));
        }
        Ok(())
    }

    /// Trim each side so its cumulative size fits the worst-case budget.
    ///
    /// Quotes are kept innermost first; a partial remainder of at least
    /// `min_qty` is kept as a final, smaller quote.
    pub fn trim_batch(&self, symbol: &str, buys: Vec<Quote>, sells: Vec<Quote>) -> (Vec<Quote>, Vec<Quote>) {
        let Ok((config, snapshot)) = self.inputs(symbol) else {
            return (Vec::new(), Vec::new());
        };
        let pos = snapshot.position.size;
        let limit = config.net_max * worst_case_mult();
        let buy_budget = (limit - pos).max(Decimal::ZERO);
        let sell_budget = (limit + pos).max(Decimal::ZERO);

        let trimmed_buys = trim_side(buys, buy_budget, config.min_qty);
        let trimmed_sells = trim_side(sells, sell_budget, config.min_qty);
        debug!(
            symbol,
            buys = trimmed_buys.len(),
            sells = trimmed_sells.len(),
            %buy_budget,
            %sell_budget,
            "Batch trimmed to worst-case budget"
        );
        (trimmed_buys, trimmed_sells)
    }

    // ========================================================================
    // Stop-loss / reduction
    // ========================================================================

    /// Returns the trigger reason when the stop-loss condition holds.
    pub fn check_stop_loss(&self, symbol: &str) -> Option<String> {
        let (config, snapshot) = self.inputs(symbol).ok()?;
        let notional = snapshot.position.notional;
        if notional <= Decimal::ZERO {
            return None;
        }

        let pnl = snapshot.position.unrealized_pnl;
        let loss_ratio = pnl.abs() / notional;
        if pnl < Decimal::ZERO && loss_ratio > config.stop_loss_thresh {
            return Some(format!(
                "unrealized loss {:.2}% exceeds stop-loss {:.2}%",
                loss_ratio * Decimal::ONE_HUNDRED,
                config.stop_loss_thresh * Decimal::ONE_HUNDRED
            ));
        }

        let dd_limit = config.stop_loss_thresh * worst_case_mult();
        let dd_ratio = snapshot.max_drawdown / notional;
        if dd_ratio > dd_limit {
            return Some(format!(
                "max drawdown {:.2}% exceeds {:.2}%",
                dd_ratio * Decimal::ONE_HUNDRED,
                dd_limit * Decimal::ONE_HUNDRED
            ));
        }
        None
    }

    /// Suggested target position when inventory exceeds 80% of net_max.
    pub fn should_reduce_position(&self, symbol: &str) -> Option<Decimal> {
        let (config, snapshot) = self.inputs(symbol).ok()?;
        let pos = snapshot.position.size;
        if pos.abs() <= config.net_max * Decimal::new(8, 1) {
            return None;
        }
        let target = config.net_max * Decimal::new(5, 1);
        Some(if pos < Decimal::ZERO { -target } else { target })
    }

    // ========================================================================
    // Quote validation
    // ========================================================================

    /// Validate the innermost buy/sell pair before submission.
    pub fn validate_quotes(&self, symbol: &str, best_buy: Price, best_sell: Price) -> RiskResult<()> {
        let (config, snapshot) = self.inputs(symbol)?;
        let mid = quote_mid(symbol, &snapshot)?;
        check_quote_spread(mid, config.min_spread, best_buy, best_sell)?;
        check_quote_deviation(mid, "buy", best_buy)?;
        check_quote_deviation(mid, "sell", best_sell)
    }

    /// Validate a pinning or grinding batch.
    ///
    /// The layer-0 order on the reducing side may sit at or through the
    /// touch, so the spread check only covers the remaining passive pair.
    /// Every price must still lie within 15% of mid.
    pub fn validate_reducing_quotes(&self, symbol: &str, buys: &[Quote], sells: &[Quote]) -> RiskResult<()> {
        let (config, snapshot) = self.inputs(symbol)?;
        let mid = quote_mid(symbol, &snapshot)?;
        let pos = snapshot.position.size;

        for q in buys {
            check_quote_deviation(mid, "buy", q.price)?;
        }
        for q in sells {
            check_quote_deviation(mid, "sell", q.price)?;
        }

        let passive = |quotes: &[Quote], reducing: bool| -> Vec<Price> {
            quotes
                .iter()
                .filter(|q| !(reducing && q.layer == 0))
                .map(|q| q.price)
                .collect()
        };
        let passive_buys = passive(buys, pos < Decimal::ZERO);
        let passive_sells = passive(sells, pos > Decimal::ZERO);

        let best_buy = passive_buys.iter().copied().max();
        let best_sell = passive_sells.iter().copied().min();
        if let (Some(buy), Some(sell)) = (best_buy, best_sell) {
            check_quote_spread(mid, config.min_spread, buy, sell)?;
        }
        Ok(())
    }

    // ========================================================================
    // Global
    // ========================================================================

    /// Error when total notional exceeds the configured cap.
    pub fn check_global(&self) -> RiskResult<()> {
        let total = self.store.total_notional();
        if total > self.total_notional_max {
            return Err(RiskError::blocked(
                "global_cap",
                format!("total notional {} > cap {}", total, self.total_notional_max),
            ));
        }
        Ok(())
    }

    /// Structured dump of the symbol's risk inputs.
    pub fn log_risk_metrics(&self, symbol: &str) {
        let Some(snapshot) = self.store.symbol_snapshot(symbol) else {
            return;
        };
        info!(
            symbol,
            pos = %snapshot.position.size,
            notional = %snapshot.position.notional,
            pnl = %snapshot.position.unrealized_pnl,
            pending_buy = %snapshot.pending_buy,
            pending_sell = %snapshot.pending_sell,
            worst_case = %snapshot.worst_case_long,
            total_notional = %self.store.total_notional(),
            "Risk metrics"
        );
    }
}

// ============================================================================
// Gates
// ============================================================================

/// Opposite side to the position and small enough not to flip it.
pub fn is_strictly_reducing(position: Decimal, side: OrderSide, size: Decimal) -> bool {
    if position.is_zero() || size <= Decimal::ZERO {
        return false;
    }
    let opposite = match side {
        OrderSide::Buy => position < Decimal::ZERO,
        OrderSide::Sell => position > Decimal::ZERO,
    };
    opposite && size < position.abs() * Decimal::TWO
}

fn check_min_qty(config: &SymbolConfig, size: Decimal) -> GateResult {
    if size < config.min_qty {
        return GateResult::Block(format!("size {} < min_qty {}", size, config.min_qty));
    }
    GateResult::Pass
}

fn check_net_position(config: &SymbolConfig, snapshot: &SymbolSnapshot, side: OrderSide, size: Decimal) -> GateResult {
    let pos = snapshot.position.size;
    let net_max = config.net_max;

    if pos.abs() > net_max {
        return GateResult::Block(format!(
            "position {} over net_max {}, only reducing trades allowed",
            pos, net_max
        ));
    }

    let new_pos = pos + side.sign() * size;
    let reducing_direction = !pos.is_zero() && side.sign() * pos < Decimal::ZERO;
    let grinding = config.grinding.enabled && snapshot.inventory_ratio(net_max) >= config.grinding.threshold;

    if grinding && reducing_direction {
        let relaxed = net_max * Decimal::new(12, 1);
        if new_pos.abs() > relaxed {
            return GateResult::Block(format!(
                "grinding: new position {} over relaxed limit {}",
                new_pos, relaxed
            ));
        }
        return GateResult::Pass;
    }

    if new_pos.abs() > net_max {
        return GateResult::Block(format!("new position {} over net_max {}", new_pos, net_max));
    }
    GateResult::Pass
}

fn check_worst_case(config: &SymbolConfig, snapshot: &SymbolSnapshot, side: OrderSide, size: Decimal) -> GateResult {
    let limit = config.net_max * worst_case_mult();
    let worst = snapshot.worst_case_long + side.sign() * size;
    if worst.abs() > limit {
        return GateResult::Block(format!("worst case {} over {}", worst, limit));
    }
    GateResult::Pass
}

fn check_cancel_rate(config: &SymbolConfig, snapshot: &SymbolSnapshot) -> GateResult {
    if snapshot.cancel_count_last >= config.max_cancel_per_min {
        warn!(
            symbol = %config.symbol,
            count = snapshot.cancel_count_last,
            limit = config.max_cancel_per_min,
            "Cancel budget exhausted"
        );
        return GateResult::Block(format!(
            "cancels {} >= {} per minute",
            snapshot.cancel_count_last, config.max_cancel_per_min
        ));
    }
    GateResult::Pass
}

/// Keep quotes while the cumulative size fits `budget`.
fn trim_side(quotes: Vec<Quote>, budget: Decimal, min_qty: Decimal) -> Vec<Quote> {
    let mut kept = Vec::with_capacity(quotes.len());
    let mut used = Decimal::ZERO;
    for quote in quotes {
        let remaining = budget - used;
        if quote.size.0 <= remaining {
            used += quote.size.0;
            kept.push(quote);
            continue;
        }
        let partial = Size::new(remaining).round_to_lot(min_qty);
        if partial.0 >= min_qty {
            kept.push(Quote::new(quote.price, partial, quote.layer));
        }
        break;
    }
    kept
}

fn quote_mid(symbol: &str, snapshot: &SymbolSnapshot) -> RiskResult<Decimal> {
    let mid = snapshot.mid_price;
    if mid <= Decimal::ZERO {
        return Err(RiskError::DataUnavailable(format!("{symbol}: mid price is {mid}")));
    }
    Ok(mid)
}

fn check_quote_spread(mid: Decimal, min_spread: Decimal, buy: Price, sell: Price) -> RiskResult<()> {
    let spread = (sell.0 - buy.0) / mid;
    if spread < min_spread {
        return Err(RiskError::blocked(
            "quote_spread",
            format!("spread {} < min_spread {}", spread, min_spread),
        ));
    }
    Ok(())
}

fn check_quote_deviation(mid: Decimal, label: &str, price: Price) -> RiskResult<()> {
    let max_dev = Decimal::new(15, 2);
    if let Some(dev) = price.deviation_from(mid) {
        if dev > max_dev {
            return Err(RiskError::blocked(
                "quote_deviation",
                format!("{label} price {price} deviates {dev} from mid {mid}"),
            ));
        }
    }
    Ok(())
}

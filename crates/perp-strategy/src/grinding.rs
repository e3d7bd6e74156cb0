//! Grinding mode.
//!
//! In a calm market with heavy inventory, bleed the position out: one
//! aggressive reducing order priced through mid, one passive re-entry on the
//! same side, and a small counter-side order to keep two-sided presence.

use perp_core::{Price, Quote, Size, SymbolConfig};
use perp_store::SymbolSnapshot;
use rust_decimal::Decimal;

use crate::grid::GridQuotes;

/// Inventory, enablement and calm-market conditions all hold.
pub fn should_grind(config: &SymbolConfig, snapshot: &SymbolSnapshot) -> bool {
    config.grinding.enabled
        && snapshot.inventory_ratio(config.net_max) >= config.grinding.threshold
        && snapshot.relative_volatility() < config.grinding.calm_threshold
}

/// How far past the grinding threshold inventory sits, in [0, 1].
pub fn grinding_progress(config: &SymbolConfig, snapshot: &SymbolSnapshot) -> Decimal {
    let threshold = config.grinding.threshold;
    let ratio = snapshot.inventory_ratio(config.net_max);
    if ratio <= threshold || threshold >= Decimal::ONE {
        return Decimal::ZERO;
    }
    ((ratio - threshold) / (Decimal::ONE - threshold)).min(Decimal::ONE)
}

/// Build the three grinding orders. Empty when flat.
pub fn build_grinding_quotes(config: &SymbolConfig, snapshot: &SymbolSnapshot) -> GridQuotes {
    let g = &config.grinding;
    let mid = snapshot.mid_price;
    let position = snapshot.position.size;
    let tick = config.tick_size;
    let lot = config.min_qty;
    let mut out = GridQuotes::default();
    if position.is_zero() || mid <= Decimal::ZERO {
        return out;
    }

    let taker_size = Size::new(position.abs() * g.taker_pct).round_to_lot_nearest(lot);
    let maker_size = Size::new(config.base_layer_size * g.size_multiplier).round_to_lot_nearest(lot);
    let counter_size = Size::new(config.base_layer_size * g.counter_size_multiplier).round_to_lot_nearest(lot);
    let maker_offset = g.maker_bps / Decimal::from(10_000);

    if position > Decimal::ZERO {
        out.sells.push(Quote::new(
            Price::new(mid * (Decimal::ONE - g.taker_offset)).round_to_tick(tick),
            taker_size,
            0,
        ));
        out.sells.push(Quote::new(
            Price::new(mid * (Decimal::ONE + maker_offset)).round_to_tick(tick),
            maker_size,
            1,
        ));
        out.buys.push(Quote::new(
            Price::new(mid * (Decimal::ONE - config.min_spread)).round_to_tick(tick),
            counter_size,
            0,
        ));
    } else {
        out.buys.push(Quote::new(
            Price::new(mid * (Decimal::ONE + g.taker_offset)).round_to_tick(tick),
            taker_size,
            0,
        ));
        out.buys.push(Quote::new(
            Price::new(mid * (Decimal::ONE - maker_offset)).round_to_tick(tick),
            maker_size,
            1,
        ));
        out.sells.push(Quote::new(
            Price::new(mid * (Decimal::ONE + config.min_spread)).round_to_tick(tick),
            counter_size,
            0,
        ));
    }
    out
}

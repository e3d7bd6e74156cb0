//! Pinning mode.
//!
//! With inventory near the limit, park one enlarged reducing order at the
//! touch and keep only far protective layers on both sides.

use perp_core::{Price, Quote, Size, SymbolConfig};
use perp_store::SymbolSnapshot;
use rust_decimal::Decimal;

use crate::grid::{far_offsets, GridQuotes};

/// Whether pinning should engage for this snapshot.
pub fn should_pin(config: &SymbolConfig, snapshot: &SymbolSnapshot) -> bool {
    config.pinning.enabled && snapshot.inventory_ratio(config.net_max) > config.pinning.threshold
}

/// Build the pin order plus protective far layers.
pub fn build_pinning_quotes(config: &SymbolConfig, snapshot: &SymbolSnapshot) -> GridQuotes {
    let mid = snapshot.mid_price;
    let tick = config.tick_size;
    let position = snapshot.position.size;
    let mut out = GridQuotes::default();
    if position.is_zero() {
        return out;
    }

    let pin_size =
        Size::new(config.base_layer_size * config.pinning.size_multiplier).round_to_lot_nearest(config.min_qty);

    let offsets = far_offsets(
        config.pinning.far_start_offset,
        config.pinning.far_end_offset,
        config.pinning.far_layers,
        config.layer_spacing_mode,
    );
    let far_size = Size::new(config.far_size()).round_to_lot_nearest(config.min_qty);

    let long = position > Decimal::ZERO;
    // Long: sell at the best ask. Short: buy at the best bid.
    let touch = if long { snapshot.best_ask } else { snapshot.best_bid };
    let touch = if touch > Decimal::ZERO { touch } else { mid };
    let pin = Quote::new(Price::new(touch).round_to_tick(tick), pin_size, 0);

    let buy_base = if long { 0 } else { 1 };
    let sell_base = if long { 1 } else { 0 };
    if long {
        out.sells.push(pin);
    } else {
        out.buys.push(pin);
    }

    for (i, off) in offsets.iter().enumerate() {
        let i = i as u32;
        out.buys.push(Quote::new(
            Price::new(mid * (Decimal::ONE - off)).floor_to_tick(tick),
            far_size,
            buy_base + i,
        ));
        out.sells.push(Quote::new(
            Price::new(mid * (Decimal::ONE + off)).ceil_to_tick(tick),
            far_size,
            sell_base + i,
        ));
    }
    out
}

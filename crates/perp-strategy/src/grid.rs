//! Normal-mode layered quote ladder.
//!
//! Near layers sit just outside the half spread and step out linearly. Far
//! layers are spread strictly between the configured start and end offsets.
//! An optional unified grid replaces both with a geometric ladder in
//! absolute price units.

use perp_core::{OrderSide, Price, Quote, Size, SpacingMode, SymbolConfig, UnifiedGridConfig};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::pricing::PricingModel;

/// Ladder output for both sides, innermost first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridQuotes {
    pub buys: Vec<Quote>,
    pub sells: Vec<Quote>,
}

/// Fractional offsets strictly inside (start, end), innermost first.
pub fn far_offsets(start: Decimal, end: Decimal, count: u32, mode: SpacingMode) -> Vec<Decimal> {
    if count == 0 {
        return Vec::new();
    }
    let steps = Decimal::from(count + 1);
    (1..=count)
        .map(|i| {
            let t = Decimal::from(i) / steps;
            match mode {
                SpacingMode::Linear => start + (end - start) * t,
                SpacingMode::Geometric => {
                    let start_f = start.to_f64().unwrap_or(0.0);
                    let end_f = end.to_f64().unwrap_or(0.0);
                    if start_f <= 0.0 || end_f <= 0.0 {
                        return start + (end - start) * t;
                    }
                    let exp = t.to_f64().unwrap_or(0.0);
                    let value = start_f * (end_f / start_f).powf(exp);
                    Decimal::from_f64(value).unwrap_or(start)
                }
            }
        })
        .collect()
}

/// Absolute distances from reservation for a unified grid.
///
/// Distance of layer n = base + Σ_{j<n} min(first_spacing * multiplier^j, max_spacing).
pub fn unified_distances(grid: &UnifiedGridConfig, base: Decimal, count: u32) -> Vec<Decimal> {
    let mut distances = Vec::with_capacity(count as usize);
    let mut distance = base;
    let mut spacing = grid.first_spacing;
    for _ in 0..count {
        distances.push(distance);
        let step = if grid.max_spacing > Decimal::ZERO {
            spacing.min(grid.max_spacing)
        } else {
            spacing
        };
        distance += step;
        spacing *= grid.spacing_multiplier;
    }
    distances
}

/// Layers kept on the side that would grow the position.
///
/// `total * (1 - ratio * 0.6)`, at least one.
pub fn reduced_layer_count(total: u32, inventory_ratio: Decimal) -> u32 {
    let ratio = inventory_ratio.clamp(Decimal::ZERO, Decimal::ONE);
    // At full inventory 60% of the layers are removed.
    let kept = (Decimal::from(total) * (Decimal::ONE - ratio * Decimal::new(6, 1))).floor();
    kept.to_u32().unwrap_or(1).clamp(1, total.max(1))
}

/// Build the normal-mode ladder around the reservation price.
pub fn build_normal_grid(config: &SymbolConfig, pricing: &PricingModel, position: Decimal) -> GridQuotes {
    let mid = pricing.mid;
    let half_spread = pricing.half_spread();

    // (distance from reservation in price units, size) per layer, innermost first
    let ladder: Vec<(Decimal, Decimal)> = match &config.unified_grid {
        Some(grid) => {
            let base = grid.start_offset.max(half_spread);
            let size = grid.layer_size.unwrap_or(config.base_layer_size);
            unified_distances(grid, base, grid.total_layers)
                .into_iter()
                .map(|d| (d, size))
                .collect()
        }
        None => {
            let first = half_spread.max(config.near_start_offset * mid);
            let near = (0..config.near_layers).map(|i| {
                let d = first + Decimal::from(i) * config.near_layer_spacing * mid;
                (d, config.base_layer_size)
            });
            let far = far_offsets(
                config.far_start_offset,
                config.far_end_offset,
                config.far_layers,
                config.layer_spacing_mode,
            )
            .into_iter()
            .map(|f| (pricing.reservation * f, config.far_size()));
            near.chain(far).collect()
        }
    };

    let total = ladder.len() as u32;
    let ratio = if config.net_max > Decimal::ZERO {
        position.abs() / config.net_max
    } else {
        Decimal::ZERO
    };
    let (buy_count, sell_count) = if position > Decimal::ZERO {
        (reduced_layer_count(total, ratio), total)
    } else if position < Decimal::ZERO {
        (total, reduced_layer_count(total, ratio))
    } else {
        (total, total)
    };

    GridQuotes {
        buys: ladder_side(config, pricing.reservation, &ladder, buy_count, OrderSide::Buy),
        sells: ladder_side(config, pricing.reservation, &ladder, sell_count, OrderSide::Sell),
    }
}

/// Price one side of the ladder, keeping the innermost `count` layers.
fn ladder_side(
    config: &SymbolConfig,
    reservation: Decimal,
    ladder: &[(Decimal, Decimal)],
    count: u32,
    side: OrderSide,
) -> Vec<Quote> {
    let tick = config.tick_size;
    let mut quotes: Vec<Quote> = Vec::with_capacity(count as usize);

    for (layer, (distance, size)) in ladder.iter().take(count as usize).enumerate() {
        let mut price = match side {
            OrderSide::Buy => Price::new(reservation - *distance).floor_to_tick(tick),
            OrderSide::Sell => Price::new(reservation + *distance).ceil_to_tick(tick),
        };
        // Tick rounding can collapse tight layers; keep strict monotonicity.
        if let Some(prev) = quotes.last() {
            match side {
                OrderSide::Buy if price >= prev.price => price = Price::new(prev.price.0 - tick),
                OrderSide::Sell if price <= prev.price => price = Price::new(prev.price.0 + tick),
                _ => {}
            }
        }
        if !price.is_positive() {
            break;
        }
        let size = Size::new(*size).round_to_lot_nearest(config.min_qty);
        quotes.push(Quote::new(price, size, layer as u32));
    }
    quotes
}

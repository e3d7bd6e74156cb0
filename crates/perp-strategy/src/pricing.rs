//! Reservation price and spread.

use perp_core::SymbolConfig;
use perp_store::SymbolSnapshot;
use rust_decimal::Decimal;

/// Pricing inputs derived for one quoting cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingModel {
    pub mid: Decimal,
    pub inventory_skew: Decimal,
    pub funding_bias: Decimal,
    /// mid + inventory_skew + funding_bias
    pub reservation: Decimal,
    pub volatility_scaling: Decimal,
    /// Full spread in price units.
    pub spread: Decimal,
    pub vpin: f64,
    pub vpin_widened: bool,
}

impl PricingModel {
    /// Derive pricing from a state snapshot and the current VPIN.
    pub fn compute(config: &SymbolConfig, snapshot: &SymbolSnapshot, vpin: f64) -> Self {
        let mid = snapshot.mid_price;
        let inventory_skew = inventory_skew(config, snapshot.position.size, mid);
        let funding_bias = -snapshot.predicted_funding * config.funding_coeff * mid;
        let volatility_scaling = volatility_scaling(snapshot.price_std_dev, mid);

        let mut spread = (config.min_spread * volatility_scaling * mid).max(config.min_spread * mid);
        let vpin_widened = config.vpin.enabled && vpin >= config.vpin.threshold;
        if vpin_widened {
            let factor = Decimal::from_f64_retain(1.0 + config.vpin.multiplier).unwrap_or(Decimal::ONE);
            spread *= factor;
        }

        Self {
            mid,
            inventory_skew,
            funding_bias,
            reservation: mid + inventory_skew + funding_bias,
            volatility_scaling,
            spread,
            vpin,
            vpin_widened,
        }
    }

    pub fn half_spread(&self) -> Decimal {
        self.spread / Decimal::TWO
    }
}

/// -(pos / net_max) * coeff * mid. Long inventory pulls quotes down.
pub fn inventory_skew(config: &SymbolConfig, position: Decimal, mid: Decimal) -> Decimal {
    if config.net_max <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    -(position / config.net_max) * config.inventory_skew_coeff * mid
}

/// clamp(1 + (std_dev / mid) * 50, 0.8, 2.0)
pub fn volatility_scaling(std_dev: Decimal, mid: Decimal) -> Decimal {
    if mid <= Decimal::ZERO {
        return Decimal::ONE;
    }
    let raw = Decimal::ONE + std_dev / mid * Decimal::from(50);
    raw.clamp(Decimal::new(8, 1), Decimal::TWO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_store::SymbolState;
    use rust_decimal_macros::dec;

    fn snapshot(mid: Decimal, position: Decimal) -> SymbolSnapshot {
        let mut state = SymbolState::new("BTC", 16);
        state.apply_mid(mid, mid, mid);
        state.position.size = position;
        state.snapshot()
    }

    #[test]
    fn test_flat_book_reservation_is_mid() {
        let mut config = SymbolConfig::new("BTC");
        config.min_spread = dec!(0.0005);
        let model = PricingModel::compute(&config, &snapshot(dec!(50000), Decimal::ZERO), 0.5);

        assert_eq!(model.reservation, dec!(50000));
        assert_eq!(model.volatility_scaling, Decimal::ONE);
        assert_eq!(model.spread, dec!(25));
        assert!(!model.vpin_widened);
    }

    #[test]
    fn test_long_inventory_skews_down() {
        let mut config = SymbolConfig::new("BTC");
        config.net_max = dec!(1);
        let model = PricingModel::compute(&config, &snapshot(dec!(50000), dec!(0.5)), 0.5);
        // -(0.5 / 1) * 0.002 * 50000
        assert_eq!(model.inventory_skew, dec!(-50));
        assert_eq!(model.reservation, dec!(49950));
    }

    #[test]
    fn test_funding_bias_sign() {
        let config = SymbolConfig::new("BTC");
        let mut state = SymbolState::new("BTC", 16);
        state.apply_mid(dec!(100), dec!(100), dec!(100));
        state.funding_history.push(dec!(0.001));
        let model = PricingModel::compute(&config, &state.snapshot(), 0.5);
        // Positive funding: longs pay, so quote lower
        assert_eq!(model.funding_bias, dec!(-0.05));
    }

    #[test]
    fn test_volatility_scaling_clamped() {
        assert_eq!(volatility_scaling(dec!(10), dec!(1000)), dec!(1.5));
        assert_eq!(volatility_scaling(dec!(100), dec!(1000)), dec!(2));
        assert_eq!(volatility_scaling(dec!(1), Decimal::ZERO), Decimal::ONE);
    }

    #[test]
    fn test_vpin_widening_requires_enabled() {
        let mut config = SymbolConfig::new("BTC");
        config.min_spread = dec!(0.001);
        let snap = snapshot(dec!(1000), Decimal::ZERO);

        let model = PricingModel::compute(&config, &snap, 0.8);
        assert_eq!(model.spread, dec!(1));

        config.vpin.enabled = true;
        config.vpin.multiplier = 0.5;
        let model = PricingModel::compute(&config, &snap, 0.8);
        assert!(model.vpin_widened);
        assert_eq!(model.spread, dec!(1.5));
    }
}

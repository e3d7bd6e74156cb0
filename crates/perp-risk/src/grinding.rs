//! Grinding-specific risk: hard limits, a safety factor and size scaling.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{RiskError, RiskResult};
use crate::gates::RiskGate;

/// Inventory ratio above which grinding is refused.
fn max_grinding_ratio() -> Decimal {
    Decimal::new(95, 2)
}

/// Relative volatility above which grinding is refused.
fn max_grinding_volatility() -> Decimal {
    Decimal::new(5, 3)
}

impl RiskGate {
    /// Error when inventory or volatility are too extreme to grind.
    pub fn check_grinding_risk(&self, symbol: &str) -> RiskResult<()> {
        let (config, snapshot) = self.inputs(symbol)?;
        let ratio = snapshot.inventory_ratio(config.net_max);
        if ratio > max_grinding_ratio() {
            warn!(symbol, %ratio, "Inventory too high to grind");
            return Err(RiskError::blocked(
                "grinding_inventory",
                format!("inventory ratio {} > {}", ratio, max_grinding_ratio()),
            ));
        }
        let vol = snapshot.relative_volatility();
        if vol > max_grinding_volatility() {
            warn!(symbol, %vol, "Volatility too high to grind");
            return Err(RiskError::blocked(
                "grinding_volatility",
                format!("relative volatility {} > {}", vol, max_grinding_volatility()),
            ));
        }
        Ok(())
    }

    /// Safety factor in [0, 1]; lower means riskier.
    ///
    /// `(1 - ratio) * max(0.5, 1 - 2*loss/notional) * max(0.5, 1 - 100*vol)`
    pub fn grinding_safety_factor(&self, symbol: &str) -> Decimal {
        let Ok((config, snapshot)) = self.inputs(symbol) else {
            return Decimal::ZERO;
        };
        let half = Decimal::new(5, 1);
        let ratio = snapshot.inventory_ratio(config.net_max);
        let mut factor = Decimal::ONE - ratio;

        let pnl = snapshot.position.unrealized_pnl;
        let notional = snapshot.position.notional;
        if pnl < Decimal::ZERO && notional > Decimal::ZERO {
            let loss_ratio = pnl.abs() / notional;
            factor *= (Decimal::ONE - loss_ratio * Decimal::TWO).max(half);
        }

        let vol = snapshot.relative_volatility();
        factor *= (Decimal::ONE - vol * Decimal::ONE_HUNDRED).max(half);

        factor.clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// Scale a grinding order down when the safety factor is low.
    pub fn adjust_grinding_size(&self, symbol: &str, size: Decimal) -> Decimal {
        let factor = self.grinding_safety_factor(symbol);
        let adjusted = if factor < Decimal::new(3, 1) {
            size * Decimal::new(5, 1)
        } else if factor < Decimal::new(6, 1) {
            size * Decimal::new(75, 2)
        } else {
            size
        };
        if adjusted != size {
            debug!(symbol, %factor, %size, %adjusted, "Grinding size reduced");
        }
        adjusted
    }
}

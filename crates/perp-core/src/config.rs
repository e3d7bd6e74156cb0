//! Per-symbol quoting configuration.
//!
//! All fractional parameters are expressed relative to mid price
//! (0.001 = 10 bps) unless noted otherwise.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Far-layer offset interpolation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpacingMode {
    /// Evenly spaced between start and end.
    #[default]
    Linear,
    /// Constant ratio between consecutive offsets.
    Geometric,
}

/// Quoting parameters for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,

    /// Maximum absolute net position (base units).
    #[serde(default = "default_net_max")]
    pub net_max: Decimal,

    /// Minimum full spread as a fraction of mid.
    #[serde(default = "default_min_spread")]
    pub min_spread: Decimal,

    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,

    #[serde(default = "default_min_qty")]
    pub min_qty: Decimal,

    /// Size of each near layer.
    #[serde(default = "default_base_layer_size")]
    pub base_layer_size: Decimal,

    #[serde(default = "default_near_layers")]
    pub near_layers: u32,

    /// Offset of the innermost near layer as a fraction of mid.
    #[serde(default = "default_near_start_offset")]
    pub near_start_offset: Decimal,

    /// Additional offset per near layer as a fraction of mid.
    #[serde(default = "default_near_layer_spacing")]
    pub near_layer_spacing: Decimal,

    #[serde(default = "default_far_layers")]
    pub far_layers: u32,

    #[serde(default = "default_far_start_offset")]
    pub far_start_offset: Decimal,

    #[serde(default = "default_far_end_offset")]
    pub far_end_offset: Decimal,

    /// Size of each far layer. Falls back to `base_layer_size`.
    #[serde(default)]
    pub far_layer_size: Option<Decimal>,

    #[serde(default)]
    pub layer_spacing_mode: SpacingMode,

    /// Inventory skew strength: shift = -(pos/net_max) * coeff * mid.
    #[serde(default = "default_inventory_skew_coeff")]
    pub inventory_skew_coeff: Decimal,

    /// Funding bias strength: shift = -predicted_funding * coeff * mid.
    #[serde(default = "default_funding_coeff")]
    pub funding_coeff: Decimal,

    /// Loss fraction of notional that trips the stop-loss.
    #[serde(default = "default_stop_loss_thresh")]
    pub stop_loss_thresh: Decimal,

    #[serde(default = "default_max_cancel_per_min")]
    pub max_cancel_per_min: u32,

    /// Cap on resting orders per side.
    #[serde(default = "default_max_orders_per_side")]
    pub max_orders_per_side: u32,

    /// Mid price samples kept for volatility.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    #[serde(default)]
    pub pinning: PinningConfig,

    #[serde(default)]
    pub grinding: GrindingConfig,

    #[serde(default)]
    pub vpin: VpinConfig,

    /// Absolute-price geometric ladder. Replaces near/far layers when set.
    #[serde(default)]
    pub unified_grid: Option<UnifiedGridConfig>,
}

impl SymbolConfig {
    /// Config with defaults for every tunable.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            net_max: default_net_max(),
            min_spread: default_min_spread(),
            tick_size: default_tick_size(),
            min_qty: default_min_qty(),
            base_layer_size: default_base_layer_size(),
            near_layers: default_near_layers(),
            near_start_offset: default_near_start_offset(),
            near_layer_spacing: default_near_layer_spacing(),
            far_layers: default_far_layers(),
            far_start_offset: default_far_start_offset(),
            far_end_offset: default_far_end_offset(),
            far_layer_size: None,
            layer_spacing_mode: SpacingMode::default(),
            inventory_skew_coeff: default_inventory_skew_coeff(),
            funding_coeff: default_funding_coeff(),
            stop_loss_thresh: default_stop_loss_thresh(),
            max_cancel_per_min: default_max_cancel_per_min(),
            max_orders_per_side: default_max_orders_per_side(),
            history_size: default_history_size(),
            pinning: PinningConfig::default(),
            grinding: GrindingConfig::default(),
            vpin: VpinConfig::default(),
            unified_grid: None,
        }
    }

    /// Effective far-layer size, never below `min_qty`.
    pub fn far_size(&self) -> Decimal {
        self.far_layer_size
            .unwrap_or(self.base_layer_size)
            .max(self.min_qty)
    }

    /// Total configured layers per side.
    pub fn total_layers(&self) -> u32 {
        match &self.unified_grid {
            Some(grid) => grid.total_layers,
            None => self.near_layers + self.far_layers,
        }
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| -> Result<()> {
            Err(CoreError::InvalidConfig {
                symbol: self.symbol.clone(),
                reason,
            })
        };

        if self.symbol.trim().is_empty() {
            return fail("symbol must not be empty".to_string());
        }
        if self.net_max <= Decimal::ZERO {
            return fail(format!("net_max must be > 0, got {}", self.net_max));
        }
        if self.min_spread <= Decimal::ZERO || self.min_spread > Decimal::new(1, 2) {
            return fail(format!("min_spread must be in (0, 0.01], got {}", self.min_spread));
        }
        if self.tick_size <= Decimal::ZERO {
            return fail("tick_size must be > 0".to_string());
        }
        if self.min_qty <= Decimal::ZERO {
            return fail("min_qty must be > 0".to_string());
        }
        if self.base_layer_size < self.min_qty {
            return fail("base_layer_size must be >= min_qty".to_string());
        }
        if self.max_cancel_per_min == 0 || self.max_cancel_per_min > 300 {
            return fail(format!(
                "max_cancel_per_min must be in (0, 300], got {}",
                self.max_cancel_per_min
            ));
        }
        if self.max_orders_per_side == 0 {
            return fail("max_orders_per_side must be > 0".to_string());
        }

        match &self.unified_grid {
            Some(grid) => grid.validate().or_else(fail)?,
            None => {
                if self.near_layers == 0 || self.near_layers > 20 {
                    return fail(format!("near_layers must be in 1-20, got {}", self.near_layers));
                }
                if self.far_layers > 30 {
                    return fail(format!("far_layers must be in 0-30, got {}", self.far_layers));
                }
                if self.far_layers > 0
                    && (self.far_start_offset <= Decimal::ZERO
                        || self.far_end_offset <= self.far_start_offset)
                {
                    return fail("far offsets must satisfy 0 < far_start_offset < far_end_offset".to_string());
                }
            }
        }

        let (lo, hi) = (Decimal::new(5, 2), Decimal::new(5, 1));
        if self.stop_loss_thresh < lo || self.stop_loss_thresh > hi {
            return fail(format!(
                "stop_loss_thresh must be in [0.05, 0.5], got {}",
                self.stop_loss_thresh
            ));
        }

        let half = Decimal::new(5, 1);
        if self.pinning.enabled
            && (self.pinning.threshold < half || self.pinning.threshold > Decimal::new(95, 2))
        {
            return fail(format!(
                "pinning.threshold must be in [0.5, 0.95], got {}",
                self.pinning.threshold
            ));
        }
        if self.grinding.enabled
            && (self.grinding.threshold < half || self.grinding.threshold > Decimal::new(98, 2))
        {
            return fail(format!(
                "grinding.threshold must be in [0.5, 0.98], got {}",
                self.grinding.threshold
            ));
        }
        // Pinning wins when both apply, so grinding needs the lower band.
        if self.pinning.enabled
            && self.grinding.enabled
            && self.pinning.threshold <= self.grinding.threshold
        {
            return fail(format!(
                "pinning.threshold ({}) must be > grinding.threshold ({})",
                self.pinning.threshold, self.grinding.threshold
            ));
        }

        if self.vpin.enabled {
            if self.vpin.pause_thresh < self.vpin.threshold {
                return fail("vpin.pause_thresh must be >= vpin.threshold".to_string());
            }
            if !(0.0..=1.0).contains(&self.vpin.threshold) {
                return fail("vpin.threshold must be in [0, 1]".to_string());
            }
        }

        Ok(())
    }
}

/// Pinning mode: unwind at the touch when inventory is near the limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinningConfig {
    #[serde(default)]
    pub enabled: bool,

    /// |pos|/net_max above which pinning engages.
    #[serde(default = "default_pinning_threshold")]
    pub threshold: Decimal,

    /// Pin order size = base_layer_size * multiplier.
    #[serde(default = "default_pinning_size_multiplier")]
    pub size_multiplier: Decimal,

    /// Protective far layers per side.
    #[serde(default = "default_pinning_far_layers")]
    pub far_layers: u32,

    #[serde(default = "default_pinning_far_start")]
    pub far_start_offset: Decimal,

    #[serde(default = "default_pinning_far_end")]
    pub far_end_offset: Decimal,
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_pinning_threshold(),
            size_multiplier: default_pinning_size_multiplier(),
            far_layers: default_pinning_far_layers(),
            far_start_offset: default_pinning_far_start(),
            far_end_offset: default_pinning_far_end(),
        }
    }
}

/// Grinding mode: bleed inventory out in calm markets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrindingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_grinding_threshold")]
    pub threshold: Decimal,

    /// Relative volatility (std_dev / mid) below which the market counts as calm.
    #[serde(default = "default_grinding_calm_threshold")]
    pub calm_threshold: Decimal,

    /// Fraction of |position| sent as the aggressive reducing order.
    #[serde(default = "default_grinding_taker_pct")]
    pub taker_pct: Decimal,

    /// How far through mid the aggressive order is priced.
    #[serde(default = "default_grinding_taker_offset")]
    pub taker_offset: Decimal,

    /// Passive re-entry size = base_layer_size * multiplier.
    #[serde(default = "default_grinding_size_multiplier")]
    pub size_multiplier: Decimal,

    /// Passive re-entry distance from mid in basis points.
    #[serde(default = "default_grinding_maker_bps")]
    pub maker_bps: Decimal,

    /// Counter-side size = base_layer_size * multiplier.
    #[serde(default = "default_grinding_counter_multiplier")]
    pub counter_size_multiplier: Decimal,
}

impl Default for GrindingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_grinding_threshold(),
            calm_threshold: default_grinding_calm_threshold(),
            taker_pct: default_grinding_taker_pct(),
            taker_offset: default_grinding_taker_offset(),
            size_multiplier: default_grinding_size_multiplier(),
            maker_bps: default_grinding_maker_bps(),
            counter_size_multiplier: default_grinding_counter_multiplier(),
        }
    }
}

/// Toxicity estimator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpinConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Volume per bucket.
    #[serde(default = "default_vpin_bucket_size")]
    pub bucket_size: f64,

    #[serde(default = "default_vpin_num_buckets")]
    pub num_buckets: usize,

    /// Widen the spread at or above this value.
    #[serde(default = "default_vpin_threshold")]
    pub threshold: f64,

    /// Stop quoting at or above this value.
    #[serde(default = "default_vpin_pause_thresh")]
    pub pause_thresh: f64,

    /// Spread widening: spread * (1 + multiplier).
    #[serde(default = "default_vpin_multiplier")]
    pub multiplier: f64,

    /// Minimum filled volume before the estimate is trusted.
    #[serde(default = "default_vpin_vol_threshold")]
    pub vol_threshold: f64,
}

impl Default for VpinConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket_size: default_vpin_bucket_size(),
            num_buckets: default_vpin_num_buckets(),
            threshold: default_vpin_threshold(),
            pause_thresh: default_vpin_pause_thresh(),
            multiplier: default_vpin_multiplier(),
            vol_threshold: default_vpin_vol_threshold(),
        }
    }
}

/// Geometric ladder in absolute price units.
///
/// Layer `n` sits at `start_offset + sum(min(first_spacing * multiplier^j, max_spacing))`
/// for `j < n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedGridConfig {
    pub total_layers: u32,
    pub start_offset: Decimal,
    pub first_spacing: Decimal,
    #[serde(default = "default_grid_multiplier")]
    pub spacing_multiplier: Decimal,
    /// Zero disables the cap.
    #[serde(default)]
    pub max_spacing: Decimal,
    /// Per-layer size. Falls back to `base_layer_size`.
    #[serde(default)]
    pub layer_size: Option<Decimal>,
}

impl UnifiedGridConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.total_layers == 0 || self.total_layers > 50 {
            return Err(format!("unified_grid.total_layers must be in 1-50, got {}", self.total_layers));
        }
        if self.start_offset <= Decimal::ZERO {
            return Err("unified_grid.start_offset must be > 0".to_string());
        }
        if self.first_spacing <= Decimal::ZERO {
            return Err("unified_grid.first_spacing must be > 0".to_string());
        }
        if self.spacing_multiplier < Decimal::ONE {
            return Err("unified_grid.spacing_multiplier must be >= 1".to_string());
        }
        if self.max_spacing > Decimal::ZERO && self.max_spacing < self.first_spacing {
            return Err("unified_grid.max_spacing must be >= first_spacing".to_string());
        }
        Ok(())
    }
}

fn default_net_max() -> Decimal {
    Decimal::ONE
}
fn default_min_spread() -> Decimal {
    Decimal::new(7, 4) // 7 bps
}
fn default_tick_size() -> Decimal {
    Decimal::new(1, 2)
}
fn default_min_qty() -> Decimal {
    Decimal::new(1, 3)
}
fn default_base_layer_size() -> Decimal {
    Decimal::new(1, 2)
}
fn default_near_layers() -> u32 {
    3
}
fn default_near_start_offset() -> Decimal {
    Decimal::new(33, 5) // 3.3 bps
}
fn default_near_layer_spacing() -> Decimal {
    Decimal::new(3, 4) // 3 bps per layer
}
fn default_far_layers() -> u32 {
    3
}
fn default_far_start_offset() -> Decimal {
    Decimal::new(67, 4) // 0.67%
}
fn default_far_end_offset() -> Decimal {
    Decimal::new(2, 2) // 2%
}
fn default_inventory_skew_coeff() -> Decimal {
    Decimal::new(2, 3)
}
fn default_funding_coeff() -> Decimal {
    Decimal::new(5, 1)
}
fn default_stop_loss_thresh() -> Decimal {
    Decimal::new(1, 1) // 10% of notional
}
fn default_max_cancel_per_min() -> u32 {
    120
}
fn default_max_orders_per_side() -> u32 {
    18
}
fn default_history_size() -> usize {
    1800
}
fn default_pinning_threshold() -> Decimal {
    Decimal::new(8, 1)
}
fn default_pinning_size_multiplier() -> Decimal {
    Decimal::new(23, 1)
}
fn default_pinning_far_layers() -> u32 {
    3
}
fn default_pinning_far_start() -> Decimal {
    Decimal::new(48, 3) // 4.8%
}
fn default_pinning_far_end() -> Decimal {
    Decimal::new(12, 2) // 12%
}
fn default_grinding_threshold() -> Decimal {
    Decimal::new(6, 1)
}
fn default_grinding_calm_threshold() -> Decimal {
    Decimal::new(38, 4)
}
fn default_grinding_taker_pct() -> Decimal {
    Decimal::new(75, 3) // 7.5% of position
}
fn default_grinding_taker_offset() -> Decimal {
    Decimal::new(5, 4)
}
fn default_grinding_size_multiplier() -> Decimal {
    Decimal::new(21, 1)
}
fn default_grinding_maker_bps() -> Decimal {
    Decimal::new(42, 1)
}
fn default_grinding_counter_multiplier() -> Decimal {
    Decimal::new(5, 1)
}
fn default_vpin_bucket_size() -> f64 {
    50_000.0
}
fn default_vpin_num_buckets() -> usize {
    50
}
fn default_vpin_threshold() -> f64 {
    0.7
}
fn default_vpin_pause_thresh() -> f64 {
    0.9
}
fn default_vpin_multiplier() -> f64 {
    0.2
}
fn default_vpin_vol_threshold() -> f64 {
    100_000.0
}
fn default_grid_multiplier() -> Decimal {
    Decimal::new(115, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = SymbolConfig::new("ETHUSDC");
        assert!(config.validate().is_ok());
        assert_eq!(config.max_orders_per_side, 18);
        assert_eq!(config.inventory_skew_coeff, dec!(0.002));
        assert_eq!(config.far_size(), dec!(0.01));
        assert_eq!(config.total_layers(), 6);
    }

    #[test]
    fn test_vpin_defaults() {
        let vpin = VpinConfig::default();
        assert!(!vpin.enabled);
        assert_eq!(vpin.bucket_size, 50_000.0);
        assert_eq!(vpin.num_buckets, 50);
        assert_eq!(vpin.threshold, 0.7);
        assert_eq!(vpin.pause_thresh, 0.9);
        assert_eq!(vpin.vol_threshold, 100_000.0);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            symbol = "BTCUSDC"
            net_max = "0.5"
            tick_size = "0.1"

            [pinning]
            enabled = true

            [vpin]
            enabled = true
            threshold = 0.6
        "#;
        let config: SymbolConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.net_max, dec!(0.5));
        assert_eq!(config.tick_size, dec!(0.1));
        assert_eq!(config.min_spread, dec!(0.0007));
        assert!(config.pinning.enabled);
        assert_eq!(config.pinning.size_multiplier, dec!(2.3));
        assert_eq!(config.vpin.threshold, 0.6);
        assert_eq!(config.vpin.pause_thresh, 0.9);
        assert!(config.unified_grid.is_none());
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let mut config = SymbolConfig::new("BTC");
        config.min_spread = dec!(0.02);
        assert!(config.validate().is_err());

        let mut config = SymbolConfig::new("BTC");
        config.max_cancel_per_min = 301;
        assert!(config.validate().is_err());

        let mut config = SymbolConfig::new("BTC");
        config.stop_loss_thresh = dec!(0.01);
        assert!(config.validate().is_err());

        let mut config = SymbolConfig::new("");
        config.net_max = dec!(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pinning_must_sit_above_grinding() {
        let mut config = SymbolConfig::new("BTC");
        config.pinning.enabled = true;
        config.grinding.enabled = true;
        config.pinning.threshold = dec!(0.6);
        config.grinding.threshold = dec!(0.7);
        assert!(config.validate().is_err());

        config.pinning.threshold = dec!(0.85);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unified_grid_validation() {
        let mut config = SymbolConfig::new("ETH");
        config.unified_grid = Some(UnifiedGridConfig {
            total_layers: 18,
            start_offset: dec!(1.2),
            first_spacing: dec!(1.2),
            spacing_multiplier: dec!(1.15),
            max_spacing: dec!(25),
            layer_size: None,
        });
        assert!(config.validate().is_ok());
        assert_eq!(config.total_layers(), 18);

        if let Some(grid) = config.unified_grid.as_mut() {
            grid.max_spacing = dec!(0.5);
        }
        assert!(config.validate().is_err());
    }
}

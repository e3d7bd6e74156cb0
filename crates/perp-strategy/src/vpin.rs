//! Volume-synchronized probability of informed trading (VPIN).
//!
//! Trades are classified as buyer- or seller-initiated and accumulated into
//! fixed-volume buckets. VPIN is the aggregate buy/sell imbalance across the
//! most recent `num_buckets` closed buckets.

use chrono::{DateTime, Utc};
use perp_core::{OrderSide, RingBuffer, Trade, VpinConfig};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StrategyError, StrategyResult};

/// Value reported while the estimate is not yet trustworthy.
pub const NEUTRAL_VPIN: f64 = 0.5;

/// Closed buckets required before VPIN leaves the neutral value.
pub const MIN_FILLED_BUCKETS: usize = 5;

/// Buy/sell volume accumulated in one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeBucket {
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub started_at: Option<DateTime<Utc>>,
}

impl VolumeBucket {
    fn open() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn total_volume(&self) -> f64 {
        self.buy_volume + self.sell_volume
    }

    pub fn imbalance(&self) -> f64 {
        (self.buy_volume - self.sell_volume).abs()
    }
}

/// Point-in-time view of a calculator.
#[derive(Debug, Clone, Serialize)]
pub struct VpinStats {
    pub symbol: String,
    pub vpin: f64,
    pub filled_buckets: usize,
    pub total_buckets: usize,
    pub total_trades: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub current_bucket: VolumeBucket,
    pub is_warning: bool,
    pub should_pause: bool,
}

/// Per-symbol VPIN estimator.
#[derive(Debug, Clone)]
pub struct VpinCalculator {
    symbol: String,
    config: VpinConfig,
    buckets: RingBuffer<VolumeBucket>,
    current: VolumeBucket,
    last_mid: f64,
    total_trades: u64,
    last_update: Option<DateTime<Utc>>,
}

impl VpinCalculator {
    /// Non-positive bucket size or count falls back to the defaults.
    pub fn new(symbol: impl Into<String>, mut config: VpinConfig) -> Self {
        let defaults = VpinConfig::default();
        if config.bucket_size <= 0.0 {
            config.bucket_size = defaults.bucket_size;
        }
        if config.num_buckets == 0 {
            config.num_buckets = defaults.num_buckets;
        }
        Self {
            symbol: symbol.into(),
            buckets: RingBuffer::new(config.num_buckets),
            config,
            current: VolumeBucket::open(),
            last_mid: 0.0,
            total_trades: 0,
            last_update: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &VpinConfig {
        &self.config
    }

    /// Reference mid for the tick rule. Non-positive values are ignored.
    pub fn update_mid_price(&mut self, mid: f64) {
        if mid > 0.0 {
            self.last_mid = mid;
        }
    }

    /// Classify a trade and add it to the open bucket.
    pub fn update_trade(&mut self, trade: &Trade) -> StrategyResult<()> {
        let qty = trade.quantity.inner().to_f64().unwrap_or(0.0);
        if qty <= 0.0 {
            return Err(StrategyError::InvalidTradeQuantity(format!(
                "{} qty={}",
                self.symbol, trade.quantity
            )));
        }

        let price = trade.price.inner().to_f64().unwrap_or(0.0);
        let is_buy = match trade.side {
            Some(side) => side == OrderSide::Buy,
            // Tick rule against the last mid
            None => self.last_mid > 0.0 && price > 0.0 && price >= self.last_mid,
        };

        if is_buy {
            self.current.buy_volume += qty;
        } else {
            self.current.sell_volume += qty;
        }
        self.total_trades += 1;
        self.last_update = Some(Utc::now());

        if self.current.total_volume() >= self.config.bucket_size {
            let closed = std::mem::replace(&mut self.current, VolumeBucket::open());
            debug!(
                symbol = %self.symbol,
                buy = closed.buy_volume,
                sell = closed.sell_volume,
                filled = self.buckets.len() + 1,
                "VPIN bucket closed"
            );
            self.buckets.push(closed);
        }
        Ok(())
    }

    /// Current VPIN in [0, 1], or 0.5 while data is insufficient.
    pub fn vpin(&self) -> f64 {
        if self.buckets.len() < MIN_FILLED_BUCKETS {
            return NEUTRAL_VPIN;
        }

        let (buy, sell) = self
            .buckets
            .iter()
            .fold((0.0, 0.0), |(b, s), bucket| (b + bucket.buy_volume, s + bucket.sell_volume));
        let total = buy + sell;
        if total < self.config.vol_threshold || total <= 0.0 {
            return NEUTRAL_VPIN;
        }

        ((buy - sell).abs() / total).clamp(0.0, 1.0)
    }

    pub fn filled_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn stats(&self) -> VpinStats {
        let vpin = self.vpin();
        VpinStats {
            symbol: self.symbol.clone(),
            vpin,
            filled_buckets: self.buckets.len(),
            total_buckets: self.buckets.capacity(),
            total_trades: self.total_trades,
            last_update: self.last_update,
            current_bucket: self.current.clone(),
            is_warning: vpin >= self.config.threshold,
            should_pause: vpin >= self.config.pause_thresh,
        }
    }

    /// Drop all bucket history.
    pub fn reset(&mut self) {
        self.buckets.clear();
        self.current = VolumeBucket::open();
        self.total_trades = 0;
        self.last_update = None;
        info!(symbol = %self.symbol, "VPIN reset");
    }

    /// Hot-update thresholds. Bucket geometry and history are kept.
    pub fn update_thresholds(&mut self, threshold: f64, pause_thresh: f64, multiplier: f64) {
        self.config.threshold = threshold;
        self.config.pause_thresh = pause_thresh;
        self.config.multiplier = multiplier;
        info!(
            symbol = %self.symbol,
            threshold,
            pause_thresh,
            multiplier,
            "VPIN thresholds updated"
        );
    }
}

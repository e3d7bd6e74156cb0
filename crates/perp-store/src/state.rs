//! Per-symbol state and its read-only snapshot.

use chrono::{DateTime, Duration, Utc};
use perp_core::{PositionUpdate, QuoteMode, RingBuffer};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Funding samples kept for the EMA forecast.
pub const FUNDING_HISTORY_LEN: usize = 24;

/// Price samples kept when a symbol is initialized without a size.
pub const DEFAULT_HISTORY_SIZE: usize = 1800;

/// Rolling window for the cancel/place rate counters.
pub const RATE_WINDOW_SECS: i64 = 60;

/// Current account position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Signed size: positive long, negative short.
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub notional: Decimal,
    pub leverage: Decimal,
    pub liquidation_price: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Build from an exchange update, filling notional when omitted.
    pub fn from_update(update: &PositionUpdate) -> Self {
        let notional = if update.notional.is_zero() {
            update.size.abs() * update.entry_price
        } else {
            update.notional.abs()
        };
        Self {
            size: update.size,
            entry_price: update.entry_price,
            unrealized_pnl: update.unrealized_pnl,
            notional,
            leverage: update.leverage,
            liquidation_price: update.liquidation_price,
            updated_at: Some(Utc::now()),
        }
    }
}

/// Everything the engine tracks for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolState {
    pub symbol: String,

    // Market
    pub mid_price: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub last_price_update: Option<DateTime<Utc>>,
    pub price_history: RingBuffer<Decimal>,
    pub funding_rate: Decimal,
    pub funding_history: RingBuffer<Decimal>,

    // Account
    pub position: Position,

    // Order flow
    pub pending_buy: Decimal,
    pub pending_sell: Decimal,
    pub active_order_count: u32,
    pub cancel_count_last: u32,
    pub last_cancel_reset: DateTime<Utc>,
    pub place_count_last: u32,
    pub last_place_reset: DateTime<Utc>,

    // Statistics
    pub fill_count: u64,
    pub total_volume: Decimal,
    pub total_pnl: Decimal,
    pub max_drawdown: Decimal,
    pub last_fill: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_mode: QuoteMode,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, history_size: usize) -> Self {
        let history_size = if history_size == 0 {
            DEFAULT_HISTORY_SIZE
        } else {
            history_size
        };
        let now = Utc::now();
        Self {
            symbol: symbol.into(),
            mid_price: Decimal::ZERO,
            best_bid: Decimal::ZERO,
            best_ask: Decimal::ZERO,
            last_price_update: None,
            price_history: RingBuffer::new(history_size),
            funding_rate: Decimal::ZERO,
            funding_history: RingBuffer::new(FUNDING_HISTORY_LEN),
            position: Position::default(),
            pending_buy: Decimal::ZERO,
            pending_sell: Decimal::ZERO,
            active_order_count: 0,
            cancel_count_last: 0,
            last_cancel_reset: now,
            place_count_last: 0,
            last_place_reset: now,
            fill_count: 0,
            total_volume: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            last_fill: None,
            last_mode: QuoteMode::Normal,
        }
    }

    pub fn apply_mid(&mut self, best_bid: Decimal, best_ask: Decimal, mid: Decimal) {
        self.best_bid = best_bid;
        self.best_ask = best_ask;
        self.mid_price = mid;
        self.price_history.push(mid);
        self.last_price_update = Some(Utc::now());
    }

    pub fn apply_fill(&mut self, size: Decimal, pnl: Decimal) {
        self.fill_count += 1;
        self.total_volume += size.abs();
        self.total_pnl += pnl;
        self.last_fill = Some(Utc::now());
        if pnl < Decimal::ZERO && pnl.abs() > self.max_drawdown {
            self.max_drawdown = pnl.abs();
        }
    }

    /// Bump the cancel counter, resetting it first if the window elapsed.
    pub fn bump_cancel_count(&mut self, now: DateTime<Utc>) -> u32 {
        if now - self.last_cancel_reset > Duration::seconds(RATE_WINDOW_SECS) {
            self.cancel_count_last = 0;
            self.last_cancel_reset = now;
        }
        self.cancel_count_last += 1;
        self.cancel_count_last
    }

    pub fn bump_place_count(&mut self, now: DateTime<Utc>) -> u32 {
        if now - self.last_place_reset > Duration::seconds(RATE_WINDOW_SECS) {
            self.place_count_last = 0;
            self.last_place_reset = now;
        }
        self.place_count_last += 1;
        self.place_count_last
    }

    /// Population standard deviation over recorded (positive) mids.
    pub fn price_std_dev(&self) -> Decimal {
        let samples: Vec<Decimal> = self
            .price_history
            .iter()
            .copied()
            .filter(|p| *p > Decimal::ZERO)
            .collect();
        if samples.len() < 2 {
            return Decimal::ZERO;
        }

        let n = Decimal::from(samples.len());
        let mean = samples.iter().sum::<Decimal>() / n;
        let variance = samples
            .iter()
            .map(|p| (*p - mean) * (*p - mean))
            .sum::<Decimal>()
            / n;

        let std = variance.to_f64().unwrap_or(0.0).sqrt();
        Decimal::from_f64(std).unwrap_or(Decimal::ZERO)
    }

    /// EMA (alpha 0.3) of funding history, oldest sample first.
    pub fn predicted_funding(&self) -> Decimal {
        let mut iter = self.funding_history.iter();
        let Some(first) = iter.next() else {
            return Decimal::ZERO;
        };
        let alpha = Decimal::new(3, 1);
        iter.fold(*first, |ema, rate| alpha * *rate + (Decimal::ONE - alpha) * ema)
    }

    /// Exposure if every resting order filled: pos + pending_buy - pending_sell.
    pub fn worst_case_long(&self) -> Decimal {
        self.position.size + self.pending_buy - self.pending_sell
    }

    pub fn snapshot(&self) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: self.symbol.clone(),
            mid_price: self.mid_price,
            best_bid: self.best_bid,
            best_ask: self.best_ask,
            last_price_update: self.last_price_update,
            position: self.position.clone(),
            pending_buy: self.pending_buy,
            pending_sell: self.pending_sell,
            active_order_count: self.active_order_count,
            cancel_count_last: self.cancel_count_last,
            place_count_last: self.place_count_last,
            funding_rate: self.funding_rate,
            predicted_funding: self.predicted_funding(),
            price_std_dev: self.price_std_dev(),
            worst_case_long: self.worst_case_long(),
            fill_count: self.fill_count,
            total_volume: self.total_volume,
            total_pnl: self.total_pnl,
            max_drawdown: self.max_drawdown,
            last_mode: self.last_mode,
        }
    }
}

/// Consistent value copy of a `SymbolState`, taken under its read lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub mid_price: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub last_price_update: Option<DateTime<Utc>>,
    pub position: Position,
    pub pending_buy: Decimal,
    pub pending_sell: Decimal,
    pub active_order_count: u32,
    pub cancel_count_last: u32,
    pub place_count_last: u32,
    pub funding_rate: Decimal,
    pub predicted_funding: Decimal,
    pub price_std_dev: Decimal,
    pub worst_case_long: Decimal,
    pub fill_count: u64,
    pub total_volume: Decimal,
    pub total_pnl: Decimal,
    pub max_drawdown: Decimal,
    pub last_mode: QuoteMode,
}

impl SymbolSnapshot {
    /// |position| / net_max. Zero when net_max is not positive.
    pub fn inventory_ratio(&self, net_max: Decimal) -> Decimal {
        if net_max <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.position.size.abs() / net_max
    }

    /// Relative volatility: std_dev / mid.
    pub fn relative_volatility(&self) -> Decimal {
        if self.mid_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.price_std_dev / self.mid_price
    }

    /// Seconds since the last depth-driven mid update.
    pub fn price_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_price_update.map(|t| now - t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_std_dev_population() {
        let mut state = SymbolState::new("BTC", 8);
        for mid in [dec!(2), dec!(4), dec!(4), dec!(4), dec!(5), dec!(5), dec!(7), dec!(9)] {
            state.apply_mid(mid, mid, mid);
        }
        assert_eq!(state.price_std_dev(), dec!(2));
    }

    #[test]
    fn test_std_dev_needs_two_samples() {
        let mut state = SymbolState::new("BTC", 8);
        assert_eq!(state.price_std_dev(), Decimal::ZERO);
        state.apply_mid(dec!(100), dec!(100), dec!(100));
        assert_eq!(state.price_std_dev(), Decimal::ZERO);
    }

    #[test]
    fn test_predicted_funding_ema() {
        let mut state = SymbolState::new("BTC", 8);
        assert_eq!(state.predicted_funding(), Decimal::ZERO);

        state.funding_history.push(dec!(0.0001));
        assert_eq!(state.predicted_funding(), dec!(0.0001));

        state.funding_history.push(dec!(0.0002));
        // 0.3 * 0.0002 + 0.7 * 0.0001
        assert_eq!(state.predicted_funding(), dec!(0.00013));
    }

    #[test]
    fn test_fill_tracks_drawdown() {
        let mut state = SymbolState::new("BTC", 8);
        state.apply_fill(dec!(-0.5), dec!(-10));
        state.apply_fill(dec!(0.2), dec!(4));
        state.apply_fill(dec!(0.2), dec!(-3));

        assert_eq!(state.fill_count, 3);
        assert_eq!(state.total_volume, dec!(0.9));
        assert_eq!(state.total_pnl, dec!(-9));
        assert_eq!(state.max_drawdown, dec!(10));
        assert!(state.last_fill.is_some());
    }

    #[test]
    fn test_cancel_window_resets() {
        let mut state = SymbolState::new("BTC", 8);
        let start = state.last_cancel_reset;
        assert_eq!(state.bump_cancel_count(start), 1);
        assert_eq!(state.bump_cancel_count(start + Duration::seconds(30)), 2);
        assert_eq!(state.bump_cancel_count(start + Duration::seconds(61)), 1);
    }

    #[test]
    fn test_position_notional_filled_in() {
        let update = PositionUpdate {
            symbol: "BTC".to_string(),
            size: dec!(-0.5),
            entry_price: dec!(40000),
            ..Default::default()
        };
        let position = Position::from_update(&update);
        assert_eq!(position.notional, dec!(20000));
    }

    #[test]
    fn test_worst_case_long() {
        let mut state = SymbolState::new("BTC", 8);
        state.position.size = dec!(0.3);
        state.pending_buy = dec!(0.2);
        state.pending_sell = dec!(0.1);
        assert_eq!(state.worst_case_long(), dec!(0.4));
    }
}

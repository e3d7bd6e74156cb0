//! Prometheus metrics for the market maker.
//!
//! All metrics use the `perp_mm_` prefix and are labelled by symbol where
//! they are per-instrument.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a startup bug. These panics only occur during static
//! initialization.

use once_cell::sync::Lazy;
use perp_core::{OrderSide, QuoteMode};
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec, register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, Histogram,
    HistogramVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

// ============================================================================
// Position / PnL
// ============================================================================

pub static POSITION_SIZE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("perp_mm_position_size", "Signed position size", &["symbol"]).unwrap()
});

pub static POSITION_NOTIONAL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("perp_mm_position_notional", "Position notional value", &["symbol"]).unwrap()
});

pub static UNREALIZED_PNL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("perp_mm_unrealized_pnl", "Unrealized PnL", &["symbol"]).unwrap()
});

pub static TOTAL_PNL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("perp_mm_total_pnl", "Cumulative realized PnL", &["symbol"]).unwrap()
});

pub static MAX_DRAWDOWN: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("perp_mm_max_drawdown", "Largest single realized loss", &["symbol"]).unwrap()
});

pub static WORST_CASE_EXPOSURE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "perp_mm_worst_case_exposure",
        "Position plus pending buys minus pending sells",
        &["symbol"]
    )
    .unwrap()
});

/// Total notional across all symbols.
pub static TOTAL_NOTIONAL: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("perp_mm_total_notional", "Total notional across symbols").unwrap());

// ============================================================================
// Orders / market
// ============================================================================

/// Labels: symbol, side (buy/sell)
pub static PENDING_SIZE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "perp_mm_pending_size",
        "Unfilled resting quantity",
        &["symbol", "side"]
    )
    .unwrap()
});

pub static MID_PRICE: Lazy<GaugeVec> =
    Lazy::new(|| register_gauge_vec!("perp_mm_mid_price", "Current mid price", &["symbol"]).unwrap());

pub static SPREAD_BPS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("perp_mm_spread_bps", "Quoted spread in basis points", &["symbol"]).unwrap()
});

pub static FUNDING_RATE: Lazy<GaugeVec> =
    Lazy::new(|| register_gauge_vec!("perp_mm_funding_rate", "Last funding rate", &["symbol"]).unwrap());

pub static CANCEL_RATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "perp_mm_cancel_rate",
        "Cancels in the current minute window",
        &["symbol"]
    )
    .unwrap()
});

pub static ORDERS_PLACED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("perp_mm_orders_placed_total", "Orders placed", &["symbol"]).unwrap()
});

pub static ORDERS_CANCELLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("perp_mm_orders_cancelled_total", "Orders cancelled", &["symbol"]).unwrap()
});

pub static FILLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("perp_mm_fills_total", "Order fills", &["symbol", "side"]).unwrap()
});

// ============================================================================
// Strategy
// ============================================================================

/// Quote mode code: 0 normal, 1 pinning, 2 grinding.
pub static STRATEGY_MODE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "perp_mm_strategy_mode",
        "Quote mode (0=normal, 1=pinning, 2=grinding)",
        &["symbol"]
    )
    .unwrap()
});

pub static GRID_LAYERS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "perp_mm_grid_layers",
        "Quotes generated per side",
        &["symbol", "side"]
    )
    .unwrap()
});

pub static QUOTE_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_mm_quote_latency_ms",
        "Full quote cycle latency in milliseconds",
        &["symbol"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0]
    )
    .unwrap()
});

pub static VPIN_VALUE: Lazy<GaugeVec> =
    Lazy::new(|| register_gauge_vec!("perp_mm_vpin", "Current VPIN estimate", &["symbol"]).unwrap());

pub static VPIN_BUCKETS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("perp_mm_vpin_buckets", "Filled VPIN volume buckets", &["symbol"]).unwrap()
});

pub static VPIN_PAUSE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_mm_vpin_pause_total",
        "Quote cycles paused for toxicity",
        &["symbol"]
    )
    .unwrap()
});

// ============================================================================
// Depth pipeline
// ============================================================================

pub static DEPTH_PROCESSING_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "perp_mm_depth_processing_ms",
        "Depth message processing time in milliseconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0]
    )
    .unwrap()
});

pub static DEPTH_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_mm_depth_dropped_total",
        "Depth messages dropped by backpressure",
        &["symbol"]
    )
    .unwrap()
});

pub static DEPTH_QUEUE_LEN: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("perp_mm_depth_queue_len", "Depth queue backlog").unwrap());

// ============================================================================
// Errors / risk
// ============================================================================

/// Labels: symbol, kind
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("perp_mm_errors_total", "Errors by kind", &["symbol", "kind"]).unwrap()
});

pub static GATE_BLOCKED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_mm_gate_blocked_total",
        "Risk gate blocks",
        &["gate", "symbol"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn position(symbol: &str, size: f64, notional: f64, unrealized_pnl: f64) {
        POSITION_SIZE.with_label_values(&[symbol]).set(size);
        POSITION_NOTIONAL.with_label_values(&[symbol]).set(notional);
        UNREALIZED_PNL.with_label_values(&[symbol]).set(unrealized_pnl);
    }

    pub fn pnl(symbol: &str, total_pnl: f64, max_drawdown: f64) {
        TOTAL_PNL.with_label_values(&[symbol]).set(total_pnl);
        MAX_DRAWDOWN.with_label_values(&[symbol]).set(max_drawdown);
    }

    pub fn pending(symbol: &str, buy: f64, sell: f64) {
        PENDING_SIZE.with_label_values(&[symbol, "buy"]).set(buy);
        PENDING_SIZE.with_label_values(&[symbol, "sell"]).set(sell);
    }

    pub fn worst_case(symbol: &str, exposure: f64) {
        WORST_CASE_EXPOSURE.with_label_values(&[symbol]).set(exposure);
    }

    pub fn total_notional(value: f64) {
        TOTAL_NOTIONAL.set(value);
    }

    pub fn market(symbol: &str, mid: f64, funding_rate: f64) {
        MID_PRICE.with_label_values(&[symbol]).set(mid);
        FUNDING_RATE.with_label_values(&[symbol]).set(funding_rate);
    }

    pub fn spread(symbol: &str, spread_bps: f64) {
        SPREAD_BPS.with_label_values(&[symbol]).set(spread_bps);
    }

    pub fn cancel_rate(symbol: &str, count: u32) {
        CANCEL_RATE.with_label_values(&[symbol]).set(f64::from(count));
    }

    pub fn orders_applied(symbol: &str, placed: usize, cancelled: usize) {
        ORDERS_PLACED_TOTAL.with_label_values(&[symbol]).inc_by(placed as f64);
        ORDERS_CANCELLED_TOTAL.with_label_values(&[symbol]).inc_by(cancelled as f64);
    }

    pub fn fill(symbol: &str, side: OrderSide) {
        FILLS_TOTAL.with_label_values(&[symbol, side.as_str()]).inc();
    }

    pub fn strategy_mode(symbol: &str, mode: QuoteMode) {
        STRATEGY_MODE.with_label_values(&[symbol]).set(mode.as_code());
    }

    pub fn grid_layers(symbol: &str, buys: usize, sells: usize) {
        GRID_LAYERS.with_label_values(&[symbol, "buy"]).set(buys as f64);
        GRID_LAYERS.with_label_values(&[symbol, "sell"]).set(sells as f64);
    }

    pub fn quote_latency(symbol: &str, latency_ms: f64) {
        QUOTE_LATENCY_MS.with_label_values(&[symbol]).observe(latency_ms);
    }

    pub fn vpin(symbol: &str, value: f64, filled_buckets: usize) {
        VPIN_VALUE.with_label_values(&[symbol]).set(value);
        VPIN_BUCKETS.with_label_values(&[symbol]).set(filled_buckets as f64);
    }

    pub fn vpin_pause(symbol: &str) {
        VPIN_PAUSE_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn depth_processed(latency_ms: f64) {
        DEPTH_PROCESSING_MS.observe(latency_ms);
    }

    pub fn depth_dropped(symbol: &str) {
        DEPTH_DROPPED_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn depth_queue_len(len: usize) {
        DEPTH_QUEUE_LEN.set(len as i64);
    }

    pub fn error(symbol: &str, kind: &str) {
        ERRORS_TOTAL.with_label_values(&[symbol, kind]).inc();
    }

    pub fn gate_blocked(gate: &str, symbol: &str) {
        GATE_BLOCKED_TOTAL.with_label_values(&[gate, symbol]).inc();
    }
}

/// Render the default registry in Prometheus text format.
pub fn gather_text() -> TelemetryResult<String> {
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buf)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_updates_gauges() {
        Metrics::position("TEST_POS", 0.5, 25000.0, -12.5);
        assert_eq!(POSITION_SIZE.with_label_values(&["TEST_POS"]).get(), 0.5);
        assert_eq!(UNREALIZED_PNL.with_label_values(&["TEST_POS"]).get(), -12.5);

        Metrics::strategy_mode("TEST_POS", QuoteMode::Grinding);
        assert_eq!(STRATEGY_MODE.with_label_values(&["TEST_POS"]).get(), 2.0);
    }

    #[test]
    fn test_counters_accumulate() {
        Metrics::fill("TEST_FILL", OrderSide::Buy);
        Metrics::fill("TEST_FILL", OrderSide::Buy);
        assert_eq!(FILLS_TOTAL.with_label_values(&["TEST_FILL", "buy"]).get(), 2.0);

        Metrics::orders_applied("TEST_FILL", 3, 1);
        assert_eq!(ORDERS_PLACED_TOTAL.with_label_values(&["TEST_FILL"]).get(), 3.0);
    }

    #[test]
    fn test_gather_contains_prefix() {
        Metrics::depth_dropped("TEST_GATHER");
        let text = gather_text().unwrap();
        assert!(text.contains("perp_mm_depth_dropped_total"));
    }
}

//! Market, account, and strategy-output types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::{Price, Size};
use crate::order::OrderSide;

/// A desired resting order produced by the strategy.
///
/// `layer` is 0 for the innermost quote on its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Price,
    pub size: Size,
    pub layer: u32,
}

impl Quote {
    pub fn new(price: Price, size: Size, layer: u32) -> Self {
        Self { price, size, layer }
    }
}

/// Quoting regime selected for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteMode {
    #[default]
    Normal,
    Pinning,
    Grinding,
}

impl QuoteMode {
    /// Numeric code exported as a gauge (0 normal, 1 pinning, 2 grinding).
    pub fn as_code(&self) -> f64 {
        match self {
            Self::Normal => 0.0,
            Self::Pinning => 1.0,
            Self::Grinding => 2.0,
        }
    }
}

impl fmt::Display for QuoteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Pinning => write!(f, "pinning"),
            Self::Grinding => write!(f, "grinding"),
        }
    }
}

/// One level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Size,
}

/// Order-book depth snapshot for a symbol.
///
/// Bids are expected best-first (descending), asks best-first (ascending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depth {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

impl Depth {
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price when both sides are present and positive.
    pub fn mid(&self) -> Option<Price> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        if !bid.is_positive() || !ask.is_positive() {
            return None;
        }
        Some(Price((bid.0 + ask.0) / Decimal::TWO))
    }
}

/// Public trade print used by the toxicity estimator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub price: Price,
    pub quantity: Size,
    /// Aggressor side when the feed labels it. `None` falls back to the tick rule.
    #[serde(default)]
    pub side: Option<OrderSide>,
    pub timestamp: DateTime<Utc>,
}

/// Funding-rate update for a perpetual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    pub rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
}

/// Account position as reported by the exchange.
///
/// `size` is signed: positive long, negative short.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub symbol: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    /// May be zero when the feed omits it; the store recomputes it then.
    #[serde(default)]
    pub notional: Decimal,
    #[serde(default)]
    pub leverage: Decimal,
    #[serde(default)]
    pub liquidation_price: Decimal,
}

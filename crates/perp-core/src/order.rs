//! Order-related types and identifiers.
//!
//! Provides order side, type, status, and client order ID types plus the
//! `Order` record the reconciler caches between syncs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::{Price, Size};

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Signed direction for position arithmetic (+1 buy, -1 sell).
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Resting limit order. The only type the quoting loop submits.
    #[default]
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
        }
    }
}

/// Exchange-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Whether the order can still rest on the book.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Client order ID used to address orders on cancel.
///
/// Every submitted order gets a fresh id so a retried submission can never
/// be confused with an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `perp_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().simple().to_string()[..8];
        Self(format!("perp_{ts}_{uuid_short}"))
    }

    /// Create from an existing string (for exchange responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl From<&str> for ClientOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An order as last seen on the exchange (or about to be submitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Price,
    pub quantity: Size,
    #[serde(default)]
    pub filled_qty: Size,
    pub client_order_id: ClientOrderId,
    #[serde(default)]
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build a new limit order with a fresh client id.
    pub fn limit(symbol: impl Into<String>, side: OrderSide, price: Price, quantity: Size) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            price,
            quantity,
            filled_qty: Size::ZERO,
            client_order_id: ClientOrderId::new(),
            status: OrderStatus::New,
            created_at: Utc::now(),
        }
    }

    /// Unfilled quantity still resting.
    pub fn remaining(&self) -> Size {
        Size((self.quantity.0 - self.filled_qty.0).max(Decimal::ZERO))
    }
}

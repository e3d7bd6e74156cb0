//! Core domain types for the perpetual-futures market maker.
//!
//! This crate provides fundamental types used throughout the engine:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `OrderSide`, `OrderType`, `OrderStatus`, `Order`: Order model
//! - `Quote`, `QuoteMode`: Strategy output
//! - `Depth`, `Trade`, `FundingRate`, `PositionUpdate`: Market/account events
//! - `RingBuffer`: Fixed-capacity history arena
//! - `SymbolConfig`: Per-instrument quoting parameters

pub mod config;
pub mod decimal;
pub mod error;
pub mod order;
pub mod ring;
pub mod types;

pub use config::{
    GrindingConfig, PinningConfig, SpacingMode, SymbolConfig, UnifiedGridConfig, VpinConfig,
};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use order::{ClientOrderId, Order, OrderSide, OrderStatus, OrderType};
pub use ring::RingBuffer;
pub use types::{Depth, FundingRate, PositionUpdate, PriceLevel, Quote, QuoteMode, Trade};

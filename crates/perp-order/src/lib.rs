//! Order side of the market maker.
//!
//! Provides:
//! - Exchange: object-safe collaborator trait for the venue
//! - PaperExchange: in-memory venue for tests and paper trading
//! - OrderManager: sync, diff and apply against live orders

pub mod error;
pub mod exchange;
pub mod manager;
pub mod paper;

pub use error::{ExchangeError, ExchangeResult, OrderError, OrderResult};
pub use exchange::{
    BoxFuture, DepthCallback, DynExchange, Exchange, TradeCallback, UserStreamCallbacks,
};
pub use manager::{ApplyReport, OrderDiff, OrderManager, DEFAULT_MAX_ORDERS_PER_SIDE};
pub use paper::PaperExchange;

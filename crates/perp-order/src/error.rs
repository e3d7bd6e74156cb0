//! Exchange and order error types.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Not connected")]
    NotConnected,

    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ExchangeError {
    /// The venue no longer knows the order (already filled or cancelled).
    #[must_use]
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Self::UnknownOrder(_))
    }

    /// Worth retrying on a later cycle.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotConnected | Self::RateLimited | Self::Timeout)
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Symbol not initialized in store: {0}")]
    SymbolNotInitialized(String),
}

pub type OrderResult<T> = Result<T, OrderError>;

//! Application and per-cycle error types.

use perp_core::CoreError;
use perp_order::{ExchangeError, OrderError};
use perp_risk::RiskError;
use perp_store::StoreError;
use perp_strategy::StrategyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid symbol config: {0}")]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Runner is {0}, expected created")]
    InvalidState(String),
}

pub type AppResult<T> = Result<T, AppError>;

/// Why a quote cycle did not complete.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("{count} active orders over breaker limit, cancelled all")]
    OrderOverflow { count: u32 },

    #[error("Stop-loss triggered: {0}")]
    StopLossTriggered(String),

    #[error("Stop-loss latched, awaiting manual reset")]
    StopLossLatched,

    #[error("Stale price (age {age_secs:?}s)")]
    StalePrice { age_secs: Option<i64> },
}

impl CycleError {
    /// Toxicity pause: an expected outcome, not a failure.
    pub fn is_toxicity_pause(&self) -> bool {
        matches!(self, Self::Strategy(e) if e.is_toxicity_pause())
    }

    /// Label for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Strategy(e) => e.kind(),
            Self::Risk(_) => "risk",
            Self::Order(_) => "order",
            Self::OrderOverflow { .. } => "order_overflow",
            Self::StopLossTriggered(_) => "stop_loss",
            Self::StopLossLatched => "stop_loss_latched",
            Self::StalePrice { .. } => "stale_price",
        }
    }
}

pub type CycleResult<T> = Result<T, CycleError>;

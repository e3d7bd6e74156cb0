//! Strategy error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Symbol not configured: {0}")]
    SymbolNotConfigured(String),

    #[error("Symbol state not initialized: {0}")]
    SymbolNotInitialized(String),

    #[error("Cancel rate too high: {count}/{limit} per minute")]
    QuoteFlicker { count: u32, limit: u32 },

    #[error("Invalid mid price: {0}")]
    InvalidMidPrice(String),

    #[error("VPIN toxicity pause: vpin={vpin:.4} >= {pause_thresh:.4}")]
    HighVpinToxicity { vpin: f64, pause_thresh: f64 },

    #[error("Invalid trade quantity: {0}")]
    InvalidTradeQuantity(String),
}

impl StrategyError {
    /// Expected pause rather than a fault.
    pub fn is_toxicity_pause(&self) -> bool {
        matches!(self, Self::HighVpinToxicity { .. })
    }

    /// Short label for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SymbolNotConfigured(_) => "symbol_not_configured",
            Self::SymbolNotInitialized(_) => "symbol_not_initialized",
            Self::QuoteFlicker { .. } => "quote_flicker",
            Self::InvalidMidPrice(_) => "invalid_mid_price",
            Self::HighVpinToxicity { .. } => "vpin_pause",
            Self::InvalidTradeQuantity(_) => "invalid_trade_quantity",
        }
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;

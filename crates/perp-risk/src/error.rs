//! Risk error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Risk gate blocked: {gate} - {reason}")]
    GateBlocked { gate: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),
}

impl RiskError {
    pub(crate) fn blocked(gate: &str, reason: impl Into<String>) -> Self {
        Self::GateBlocked {
            gate: gate.to_string(),
            reason: reason.into(),
        }
    }

    /// Gate name for blocked checks, error class otherwise.
    pub fn gate(&self) -> &str {
        match self {
            Self::GateBlocked { gate, .. } => gate,
            Self::ConfigError(_) => "config",
            Self::DataUnavailable(_) => "data_unavailable",
        }
    }
}

pub type RiskResult<T> = Result<T, RiskError>;

//! Risk gate for the market maker.
//!
//! Every check reads a fresh `SymbolSnapshot` and holds no state between
//! calls:
//! - Pre-trade: min qty, reduce-only exemption, net position, worst case,
//!   global notional cap, cancel budget
//! - Batch: aggregate worst-case exposure and trimming
//! - Stop-loss: unrealized loss and drawdown against notional
//! - Quote validation: minimum spread and deviation from mid
//! - Grinding risk: safety factor and size adjustment
//!
//! Also provides:
//! - StopLossLatch: per-symbol "awaiting manual intervention" flag

pub mod error;
pub mod gates;
pub mod grinding;
pub mod stop_latch;

pub use error::{RiskError, RiskResult};
pub use gates::{is_strictly_reducing, GateResult, RiskGate};
pub use stop_latch::{LatchState, StopLossLatch};

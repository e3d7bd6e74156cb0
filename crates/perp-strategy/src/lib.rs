//! Quote generation for the market maker.
//!
//! Components:
//! - `VpinCalculator`: volume-bucketed order-flow toxicity
//! - `pricing`: reservation price, volatility scaling and spread
//! - `grid`: layered normal-mode ladder
//! - `pinning` / `grinding`: degraded inventory-reduction modes
//! - `QuoteEngine`: per-cycle entry point combining the above

pub mod engine;
pub mod error;
pub mod grid;
pub mod grinding;
pub mod pinning;
pub mod pricing;
pub mod vpin;

pub use engine::{QuoteEngine, QuoteSet};
pub use error::{StrategyError, StrategyResult};
pub use pricing::PricingModel;
pub use vpin::{VolumeBucket, VpinCalculator, VpinStats, NEUTRAL_VPIN};

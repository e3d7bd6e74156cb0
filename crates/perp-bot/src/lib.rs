//! Perpetual-futures market maker.
//!
//! Wires the components together:
//! - `AppConfig`: TOML configuration with environment overrides
//! - Depth queue: lossy bounded channel between the stream and the store
//! - `Runner`: per-symbol quote loops, global monitor, snapshot task
//! - `Application`: runner lifecycle around a shutdown signal

pub mod app;
pub mod config;
pub mod depth;
pub mod error;
pub mod runner;

pub use app::Application;
pub use config::{AppConfig, GlobalConfig};
pub use depth::{depth_queue, DepthProducer, DepthStats, DepthWorker};
pub use error::{AppError, AppResult, CycleError, CycleResult};
pub use runner::{diff_tolerance, realized_pnl, CycleOutcome, Runner, RunnerState, ORDER_OVERFLOW_LIMIT};

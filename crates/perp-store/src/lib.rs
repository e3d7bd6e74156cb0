//! State store for the market maker.
//!
//! Holds one `SymbolState` per instrument behind its own lock, plus the
//! cross-symbol total notional aggregate:
//! - `Store`: concurrent registry, mutators and derived reads
//! - `SymbolSnapshot`: value copy handed to strategy and risk
//! - Snapshot persistence to a JSON file

pub mod error;
pub mod snapshot;
pub mod state;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use state::{Position, SymbolSnapshot, SymbolState};
pub use store::Store;

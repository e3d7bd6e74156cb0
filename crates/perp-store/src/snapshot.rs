//! Full-state JSON snapshots.
//!
//! The whole store is written to a temp file and renamed into place so a
//! crash mid-write never leaves a truncated snapshot behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{StoreError, StoreResult};
use crate::state::SymbolState;
use crate::store::Store;

/// On-disk snapshot layout.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub saved_at: DateTime<Utc>,
    pub symbols: Vec<SymbolState>,
}

impl Store {
    /// Write every symbol's state to the configured snapshot path.
    pub fn save_snapshot(&self) -> StoreResult<()> {
        let path = self.snapshot_path.as_ref().ok_or(StoreError::NoSnapshotPath)?;
        let snapshot = StoreSnapshot {
            saved_at: Utc::now(),
            symbols: self.all_states(),
        };
        write_atomic(path, &serde_json::to_vec_pretty(&snapshot)?)?;
        debug!(
            path = %path.display(),
            symbols = snapshot.symbols.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Replace in-memory state with the snapshot file's contents.
    ///
    /// Returns the number of symbols restored; a missing file restores none.
    pub fn load_snapshot(&self) -> StoreResult<usize> {
        let path = self.snapshot_path.as_ref().ok_or(StoreError::NoSnapshotPath)?;
        if !path.exists() {
            return Ok(0);
        }
        let bytes = fs::read(path)?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        let count = snapshot.symbols.len();
        for state in snapshot.symbols {
            self.insert_state(state);
        }
        self.recompute_total_notional();
        info!(count, saved_at = %snapshot.saved_at, "Snapshot loaded");
        Ok(count)
    }

    /// Final checkpoint on shutdown. No-op without a snapshot path.
    pub fn close(&self) -> StoreResult<()> {
        if self.snapshot_path.is_none() {
            return Ok(());
        }
        self.save_snapshot()
    }

    /// Periodically checkpoint until `shutdown` flips to true.
    pub fn spawn_snapshot_task(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // File IO stays off the async workers.
                        let writer = Arc::clone(&store);
                        match tokio::task::spawn_blocking(move || writer.save_snapshot()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => error!(error = %e, "Periodic snapshot failed"),
                            Err(e) => error!(error = %e, "Snapshot writer panicked"),
                        }
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            debug!("Snapshot task stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_core::{PositionUpdate, QuoteMode};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn populated_store(path: &Path) -> Store {
        let store = Store::with_snapshot_path(path);
        store.init_symbol("BTC", 16);
        store.init_symbol("ETH", 16);
        for i in 0..20 {
            let bid = dec!(50000) + Decimal::from(i);
            store.update_mid_price("BTC", bid, bid + dec!(2));
        }
        store.update_mid_price("ETH", dec!(2999), dec!(3001));
        store.update_position(&PositionUpdate {
            symbol: "BTC".to_string(),
            size: dec!(0.25),
            entry_price: dec!(50000),
            unrealized_pnl: dec!(-12.5),
            ..Default::default()
        });
        store.update_funding_rate("BTC", dec!(0.0001));
        store.update_funding_rate("BTC", dec!(0.0003));
        store.update_pending_orders("BTC", dec!(0.1), dec!(0.2));
        store.record_fill("BTC", dec!(0.05), dec!(-3));
        store.increment_cancel_count("BTC");
        store.set_active_order_count("BTC", 7);
        store.set_last_mode("BTC", QuoteMode::Grinding);
        store
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let original = populated_store(&path);
        original.save_snapshot().unwrap();

        let restored = Store::with_snapshot_path(&path);
        assert_eq!(restored.symbols(), original.symbols());
        assert_eq!(restored.total_notional(), original.total_notional());
        for symbol in original.symbols() {
            assert_eq!(
                restored.symbol_snapshot(&symbol),
                original.symbol_snapshot(&symbol)
            );
        }

        // History cursor survives, so the next push lands in the same slot.
        original.update_mid_price("BTC", dec!(1), dec!(1));
        restored.update_mid_price("BTC", dec!(1), dec!(1));
        assert_eq!(
            restored.price_std_dev("BTC"),
            original.price_std_dev("BTC")
        );
    }

    #[test]
    fn test_missing_snapshot_starts_empty() {
        let dir = tempdir().unwrap();
        let store = Store::with_snapshot_path(dir.path().join("absent.json"));
        assert!(store.symbols().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_is_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();

        let store = Store::with_snapshot_path(&path);
        assert!(store.symbols().is_empty());
        assert!(store.load_snapshot().is_err());
    }

    #[test]
    fn test_save_without_path_errors() {
        let store = Store::new();
        assert!(matches!(store.save_snapshot(), Err(StoreError::NoSnapshotPath)));
        assert!(store.close().is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_task_writes_and_stops() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = Arc::new(populated_store(&path));

        let (tx, rx) = watch::channel(false);
        let handle = store.spawn_snapshot_task(Duration::from_millis(20), rx);

        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("snapshot task did not stop")
            .unwrap();

        assert!(path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_snapshot_task_output_restores() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = Arc::new(populated_store(&path));

        let (tx, rx) = watch::channel(false);
        let handle = store.spawn_snapshot_task(Duration::from_millis(20), rx);
        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let restored = Store::with_snapshot_path(&path);
        assert_eq!(restored.symbol_snapshot("BTC"), store.symbol_snapshot("BTC"));
    }
}

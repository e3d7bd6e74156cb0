//! Depth queue with lossy backpressure.
//!
//! Stream callbacks must never block, so the producer uses `try_send`. When
//! the queue is full the message still updates the store mid directly and
//! counts as a drop. The consumer collapses large backlogs to the newest
//! entry so quoting never runs on a stale book.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use perp_core::Depth;
use perp_order::DepthCallback;
use perp_store::Store;
use perp_strategy::QuoteEngine;
use perp_telemetry::Metrics;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

pub const DEPTH_QUEUE_CAPACITY: usize = 500;

/// Backlog above which the consumer drains.
pub const HIGH_WATER_MARK: usize = 50;

/// Backlog left after a drain.
pub const LOW_WATER_MARK: usize = 10;

const SLOW_PROCESSING: Duration = Duration::from_millis(100);

/// Counters shared by producer and consumer.
#[derive(Debug, Default)]
pub struct DepthStats {
    pub received: AtomicU64,
    pub dropped: AtomicU64,
    pub processed: AtomicU64,
    /// Messages skipped by backlog drains.
    pub drained: AtomicU64,
}

impl DepthStats {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }
}

/// Apply a book to the store mid. False when a side is missing.
fn apply_to_store(store: &Store, depth: &Depth) -> bool {
    match (depth.best_bid(), depth.best_ask()) {
        (Some(bid), Some(ask)) => {
            store.update_mid_price(&depth.symbol, bid.0, ask.0);
            true
        }
        _ => false,
    }
}

// ============================================================================
// Producer
// ============================================================================

#[derive(Clone)]
pub struct DepthProducer {
    tx: mpsc::Sender<Depth>,
    store: Arc<Store>,
    stats: Arc<DepthStats>,
}

impl DepthProducer {
    /// Enqueue without blocking. Returns false when the message was dropped.
    pub fn push(&self, depth: Depth) -> bool {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(depth) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(depth)) => {
                apply_to_store(&self.store, &depth);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Metrics::depth_dropped(&depth.symbol);
                debug!(symbol = %depth.symbol, "Depth queue full, applied mid directly");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stream callback feeding this producer.
    pub fn callback(&self) -> DepthCallback {
        let producer = self.clone();
        Arc::new(move |depth| {
            producer.push(depth);
        })
    }

    pub fn stats(&self) -> &Arc<DepthStats> {
        &self.stats
    }
}

// ============================================================================
// Consumer
// ============================================================================

pub struct DepthWorker {
    rx: mpsc::Receiver<Depth>,
    store: Arc<Store>,
    engine: Arc<QuoteEngine>,
    stats: Arc<DepthStats>,
}

impl DepthWorker {
    /// Consume until shutdown or until every producer is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                msg = self.rx.recv() => match msg {
                    Some(depth) => {
                        let depth = self.collapse_backlog(depth);
                        self.process(&depth);
                    }
                    None => break,
                },
            }
        }
        debug!(processed = self.stats.processed(), "Depth worker stopped");
    }

    /// Process everything currently queued. Returns how many were processed.
    pub fn drain_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(depth) = self.rx.try_recv() {
            let depth = self.collapse_backlog(depth);
            self.process(&depth);
            count += 1;
        }
        count
    }

    /// With a backlog above the high-water mark, skip ahead to the newest of
    /// the older entries, leaving the low-water mark queued.
    fn collapse_backlog(&mut self, mut depth: Depth) -> Depth {
        let backlog = self.rx.len();
        Metrics::depth_queue_len(backlog);
        if backlog <= HIGH_WATER_MARK {
            return depth;
        }
        let mut skipped = 0u64;
        while self.rx.len() > LOW_WATER_MARK {
            match self.rx.try_recv() {
                Ok(next) => {
                    depth = next;
                    skipped += 1;
                }
                Err(_) => break,
            }
        }
        self.stats.drained.fetch_add(skipped, Ordering::Relaxed);
        warn!(backlog, skipped, "Depth backlog drained");
        depth
    }

    fn process(&self, depth: &Depth) {
        let started = Instant::now();
        if apply_to_store(&self.store, depth) {
            let mid = self.store.mid_price(&depth.symbol);
            self.engine.update_vpin_mid(&depth.symbol, mid);
        }
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let elapsed = started.elapsed();
        Metrics::depth_processed(elapsed.as_secs_f64() * 1000.0);
        if elapsed > SLOW_PROCESSING {
            warn!(symbol = %depth.symbol, elapsed_ms = elapsed.as_millis() as u64, "Slow depth processing");
        }
    }
}

/// Build a connected producer/worker pair.
pub fn depth_queue(store: Arc<Store>, engine: Arc<QuoteEngine>, capacity: usize) -> (DepthProducer, DepthWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stats = Arc::new(DepthStats::default());
    (
        DepthProducer {
            tx,
            store: Arc::clone(&store),
            stats: Arc::clone(&stats),
        },
        DepthWorker {
            rx,
            store,
            engine,
            stats,
        },
    )
}

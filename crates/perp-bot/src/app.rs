//! Top-level application: owns the runner and waits for a shutdown signal.

use std::future::Future;

use perp_order::DynExchange;
use perp_telemetry::gather_text;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::runner::Runner;

pub struct Application {
    runner: Runner,
}

impl Application {
    pub fn new(config: AppConfig, exchange: DynExchange) -> AppResult<Self> {
        Ok(Self {
            runner: Runner::new(config, exchange)?,
        })
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await
    }

    /// Start the runner, wait for `signal`, then stop.
    pub async fn run_until<F>(self, signal: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.runner.start().await {
            self.runner.stop().await;
            return Err(e);
        }

        signal.await;
        info!("Shutdown signal received");
        self.runner.stop().await;

        match gather_text() {
            Ok(text) => debug!(bytes = text.len(), "Final metrics gathered"),
            Err(e) => warn!(error = %e, "Final metrics gather failed"),
        }
        if let Some(stats) = self.runner.depth_stats() {
            info!(
                processed = stats.processed(),
                dropped = stats.dropped(),
                drained = stats.drained(),
                "Depth queue totals"
            );
        }
        Ok(())
    }
}

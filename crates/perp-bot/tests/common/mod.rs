//! Shared fixtures for runner integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use perp_bot::{AppConfig, GlobalConfig, Runner};
use perp_core::{Depth, Price, PositionUpdate, PriceLevel, Size, SymbolConfig};
use perp_order::{Exchange, PaperExchange};
use perp_store::Store;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const SYMBOL: &str = "BTCUSDC";

pub fn btc_config() -> SymbolConfig {
    let mut config = SymbolConfig::new(SYMBOL);
    config.net_max = dec!(1);
    config.min_spread = dec!(0.0005);
    config.tick_size = dec!(0.1);
    config.min_qty = dec!(0.001);
    config.base_layer_size = dec!(0.01);
    config.max_cancel_per_min = 50;
    config.history_size = 64;
    config
}

pub fn app_config(dry_run: bool) -> AppConfig {
    AppConfig {
        global: GlobalConfig {
            quote_interval_ms: 100,
            dry_run,
            ..Default::default()
        },
        symbols: vec![btc_config()],
    }
}

pub fn book(bid: Decimal, ask: Decimal) -> Depth {
    let level = |price| PriceLevel {
        price: Price::new(price),
        quantity: Size::new(dec!(1)),
    };
    Depth {
        symbol: SYMBOL.to_string(),
        bids: vec![level(bid)],
        asks: vec![level(ask)],
        timestamp: Utc::now(),
    }
}

pub fn set_position(store: &Store, size: Decimal, entry: Decimal, unrealized_pnl: Decimal) {
    store.update_position(&PositionUpdate {
        symbol: SYMBOL.to_string(),
        size,
        entry_price: entry,
        unrealized_pnl,
        ..Default::default()
    });
}

/// Runner with the symbol initialized and the paper venue connected, but no
/// background tasks. Cycles are driven by calling `process_symbol`.
pub async fn ready_runner(config: AppConfig) -> (Runner, Arc<PaperExchange>) {
    let paper = Arc::new(PaperExchange::new());
    let runner = Runner::new(config, paper.clone()).unwrap();
    runner.store().init_symbol(SYMBOL, 64);
    paper.connect().await.unwrap();
    (runner, paper)
}

/// Poll `condition` every 10 ms until it holds or `limit` elapses.
pub async fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

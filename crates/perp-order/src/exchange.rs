//! Exchange collaborator trait.
//!
//! The wire client lives outside this workspace. Everything the engine needs
//! from the venue goes through this trait, so the runner can be driven by the
//! paper exchange in tests and by a real client in production.

use std::pin::Pin;
use std::sync::Arc;

use perp_core::{ClientOrderId, Depth, FundingRate, Order, PositionUpdate, Trade};

use crate::error::ExchangeResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Called for every order book update.
pub type DepthCallback = Arc<dyn Fn(Depth) + Send + Sync>;

/// Called for every public trade.
pub type TradeCallback = Arc<dyn Fn(Trade) + Send + Sync>;

/// Private stream handlers.
#[derive(Clone)]
pub struct UserStreamCallbacks {
    pub on_order_update: Arc<dyn Fn(Order) + Send + Sync>,
    pub on_account_update: Arc<dyn Fn(PositionUpdate) + Send + Sync>,
    pub on_funding: Arc<dyn Fn(FundingRate) + Send + Sync>,
}

impl std::fmt::Debug for UserStreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStreamCallbacks").finish_non_exhaustive()
    }
}

impl UserStreamCallbacks {
    /// Handlers that ignore every event.
    pub fn noop() -> Self {
        Self {
            on_order_update: Arc::new(|_| {}),
            on_account_update: Arc::new(|_| {}),
            on_funding: Arc::new(|_| {}),
        }
    }
}

/// Venue operations used by the engine.
///
/// Stream callbacks may be invoked from any task and must not block.
pub trait Exchange: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, ExchangeResult<()>>;

    fn disconnect(&self) -> BoxFuture<'_, ExchangeResult<()>>;

    fn is_connected(&self) -> bool;

    /// Submit an order. Returns the order as accepted by the venue.
    fn place_order(&self, order: Order) -> BoxFuture<'_, ExchangeResult<Order>>;

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        client_order_id: &'a ClientOrderId,
    ) -> BoxFuture<'a, ExchangeResult<()>>;

    /// Cancel every open order for `symbol`. Returns the number cancelled.
    fn cancel_all_orders<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<usize>>;

    fn get_open_orders<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Vec<Order>>>;

    fn get_position<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Option<PositionUpdate>>>;

    fn get_all_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<PositionUpdate>>>;

    /// One-shot order book fetch, used to refresh stale prices.
    fn get_depth<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Depth>>;

    fn start_depth_stream(&self, symbols: Vec<String>, on_depth: DepthCallback) -> BoxFuture<'_, ExchangeResult<()>>;

    fn start_trade_stream(&self, symbols: Vec<String>, on_trade: TradeCallback) -> BoxFuture<'_, ExchangeResult<()>>;

    fn start_user_stream(&self, callbacks: UserStreamCallbacks) -> BoxFuture<'_, ExchangeResult<()>>;
}

/// Arc wrapper for Exchange trait objects.
pub type DynExchange = Arc<dyn Exchange>;

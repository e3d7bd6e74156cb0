//! In-memory paper exchange.
//!
//! Orders rest until cancelled or explicitly filled by the caller. Market
//! data and account events are pushed by the caller and forwarded to the
//! subscribed callbacks. Failures can be queued per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use perp_core::{ClientOrderId, Depth, FundingRate, Order, OrderStatus, PositionUpdate, Size, Trade};
use tracing::{debug, info};

use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{BoxFuture, DepthCallback, Exchange, TradeCallback, UserStreamCallbacks};

#[derive(Default)]
struct Subscriptions {
    depth: Option<(Vec<String>, DepthCallback)>,
    trades: Option<(Vec<String>, TradeCallback)>,
    user: Option<UserStreamCallbacks>,
}

#[derive(Default)]
struct InjectedFailures {
    place: VecDeque<ExchangeError>,
    cancel: VecDeque<ExchangeError>,
    open_orders: VecDeque<ExchangeError>,
}

/// Paper venue for tests and dry runs.
#[derive(Default)]
pub struct PaperExchange {
    connected: AtomicBool,
    open: Mutex<HashMap<String, Vec<Order>>>,
    placed: Mutex<Vec<Order>>,
    cancelled: Mutex<Vec<ClientOrderId>>,
    positions: Mutex<HashMap<String, PositionUpdate>>,
    depths: Mutex<HashMap<String, Depth>>,
    failures: Mutex<InjectedFailures>,
    subscriptions: RwLock<Subscriptions>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Failure injection
    // ========================================================================

    /// Fail the next `place_order` with `err`.
    pub fn fail_next_place(&self, err: ExchangeError) {
        self.failures.lock().place.push_back(err);
    }

    /// Fail the next `cancel_order` with `err`.
    pub fn fail_next_cancel(&self, err: ExchangeError) {
        self.failures.lock().cancel.push_back(err);
    }

    /// Fail the next `get_open_orders` with `err`.
    pub fn fail_next_open_orders(&self, err: ExchangeError) {
        self.failures.lock().open_orders.push_back(err);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Every order accepted so far, in submission order.
    pub fn placed_orders(&self) -> Vec<Order> {
        self.placed.lock().clone()
    }

    /// Client ids of every successful single cancel.
    pub fn cancelled_orders(&self) -> Vec<ClientOrderId> {
        self.cancelled.lock().clone()
    }

    pub fn open_order_count(&self, symbol: &str) -> usize {
        self.open.lock().get(symbol).map_or(0, Vec::len)
    }

    /// Forget recorded placements and cancels. Open orders are kept.
    pub fn clear_history(&self) {
        self.placed.lock().clear();
        self.cancelled.lock().clear();
    }

    /// Rest an order directly, bypassing `place_order`.
    pub fn seed_open_order(&self, order: Order) {
        self.open.lock().entry(order.symbol.clone()).or_default().push(order);
    }

    // ========================================================================
    // Event injection
    // ========================================================================

    /// Record the book and forward it to the depth stream.
    pub fn push_depth(&self, depth: Depth) {
        self.depths.lock().insert(depth.symbol.clone(), depth.clone());
        let callback = self
            .subscriptions
            .read()
            .depth
            .as_ref()
            .filter(|(symbols, _)| symbols.contains(&depth.symbol))
            .map(|(_, cb)| cb.clone());
        if let Some(cb) = callback {
            cb(depth);
        }
    }

    pub fn push_trade(&self, trade: Trade) {
        let callback = self
            .subscriptions
            .read()
            .trades
            .as_ref()
            .filter(|(symbols, _)| symbols.contains(&trade.symbol))
            .map(|(_, cb)| cb.clone());
        if let Some(cb) = callback {
            cb(trade);
        }
    }

    pub fn push_order_update(&self, order: Order) {
        let callback = self.subscriptions.read().user.as_ref().map(|u| u.on_order_update.clone());
        if let Some(cb) = callback {
            cb(order);
        }
    }

    /// Record the position and forward it to the account stream.
    pub fn push_account_update(&self, update: PositionUpdate) {
        self.positions.lock().insert(update.symbol.clone(), update.clone());
        let callback = self.subscriptions.read().user.as_ref().map(|u| u.on_account_update.clone());
        if let Some(cb) = callback {
            cb(update);
        }
    }

    pub fn push_funding(&self, funding: FundingRate) {
        let callback = self.subscriptions.read().user.as_ref().map(|u| u.on_funding.clone());
        if let Some(cb) = callback {
            cb(funding);
        }
    }

    /// Fill a resting order completely and emit the order update.
    ///
    /// Returns `false` when the order is not open.
    pub fn fill_order(&self, symbol: &str, client_order_id: &ClientOrderId) -> bool {
        let filled = {
            let mut open = self.open.lock();
            let Some(orders) = open.get_mut(symbol) else {
                return false;
            };
            let Some(idx) = orders.iter().position(|o| &o.client_order_id == client_order_id) else {
                return false;
            };
            let mut order = orders.remove(idx);
            order.filled_qty = order.quantity;
            order.status = OrderStatus::Filled;
            order
        };
        debug!(symbol, cloid = %client_order_id, "Paper fill");
        self.push_order_update(filled);
        true
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_connected(&self) -> ExchangeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExchangeError::NotConnected)
        }
    }

    fn do_place(&self, mut order: Order) -> ExchangeResult<Order> {
        self.ensure_connected()?;
        if let Some(err) = self.failures.lock().place.pop_front() {
            return Err(err);
        }
        if order.quantity <= Size::ZERO || !order.price.is_positive() {
            return Err(ExchangeError::Rejected(format!(
                "invalid order {} @ {}",
                order.quantity, order.price
            )));
        }
        order.status = OrderStatus::New;
        order.created_at = Utc::now();
        self.open
            .lock()
            .entry(order.symbol.clone())
            .or_default()
            .push(order.clone());
        self.placed.lock().push(order.clone());
        Ok(order)
    }

    fn do_cancel(&self, symbol: &str, client_order_id: &ClientOrderId) -> ExchangeResult<()> {
        self.ensure_connected()?;
        if let Some(err) = self.failures.lock().cancel.pop_front() {
            return Err(err);
        }
        let mut open = self.open.lock();
        let orders = open.entry(symbol.to_string()).or_default();
        let Some(idx) = orders.iter().position(|o| &o.client_order_id == client_order_id) else {
            return Err(ExchangeError::UnknownOrder(client_order_id.to_string()));
        };
        orders.remove(idx);
        self.cancelled.lock().push(client_order_id.clone());
        Ok(())
    }

    fn do_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<Order>> {
        self.ensure_connected()?;
        if let Some(err) = self.failures.lock().open_orders.pop_front() {
            return Err(err);
        }
        Ok(self.open.lock().get(symbol).cloned().unwrap_or_default())
    }
}

impl Exchange for PaperExchange {
    fn connect(&self) -> BoxFuture<'_, ExchangeResult<()>> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Paper exchange connected");
        Box::pin(async { Ok(()) })
    }

    fn disconnect(&self) -> BoxFuture<'_, ExchangeResult<()>> {
        self.connected.store(false, Ordering::SeqCst);
        *self.subscriptions.write() = Subscriptions::default();
        info!("Paper exchange disconnected");
        Box::pin(async { Ok(()) })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn place_order(&self, order: Order) -> BoxFuture<'_, ExchangeResult<Order>> {
        let result = self.do_place(order);
        Box::pin(async move { result })
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        client_order_id: &'a ClientOrderId,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        let result = self.do_cancel(symbol, client_order_id);
        Box::pin(async move { result })
    }

    fn cancel_all_orders<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<usize>> {
        let result = self
            .ensure_connected()
            .map(|()| self.open.lock().remove(symbol).map_or(0, |orders| orders.len()));
        Box::pin(async move { result })
    }

    fn get_open_orders<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Vec<Order>>> {
        let result = self.do_open_orders(symbol);
        Box::pin(async move { result })
    }

    fn get_position<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Option<PositionUpdate>>> {
        let result = self
            .ensure_connected()
            .map(|()| self.positions.lock().get(symbol).cloned());
        Box::pin(async move { result })
    }

    fn get_all_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<PositionUpdate>>> {
        let result = self.ensure_connected().map(|()| {
            let mut positions: Vec<PositionUpdate> = self.positions.lock().values().cloned().collect();
            positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            positions
        });
        Box::pin(async move { result })
    }

    fn get_depth<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Depth>> {
        let result = self.ensure_connected().and_then(|()| {
            self.depths
                .lock()
                .get(symbol)
                .cloned()
                .ok_or_else(|| ExchangeError::Transport(format!("no book for {symbol}")))
        });
        Box::pin(async move { result })
    }

    fn start_depth_stream(&self, symbols: Vec<String>, on_depth: DepthCallback) -> BoxFuture<'_, ExchangeResult<()>> {
        let result = self.ensure_connected().map(|()| {
            debug!(?symbols, "Paper depth stream started");
            self.subscriptions.write().depth = Some((symbols, on_depth));
        });
        Box::pin(async move { result })
    }

    fn start_trade_stream(&self, symbols: Vec<String>, on_trade: TradeCallback) -> BoxFuture<'_, ExchangeResult<()>> {
        let result = self.ensure_connected().map(|()| {
            debug!(?symbols, "Paper trade stream started");
            self.subscriptions.write().trades = Some((symbols, on_trade));
        });
        Box::pin(async move { result })
    }

    fn start_user_stream(&self, callbacks: UserStreamCallbacks) -> BoxFuture<'_, ExchangeResult<()>> {
        let result = self.ensure_connected().map(|()| {
            self.subscriptions.write().user = Some(callbacks);
        });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_core::{OrderSide, Price, PriceLevel};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn order(side: OrderSide, price: rust_decimal::Decimal) -> Order {
        Order::limit("BTC", side, Price::new(price), Size::new(dec!(0.01)))
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let ex = PaperExchange::new();
        assert_eq!(
            ex.place_order(order(OrderSide::Buy, dec!(100))).await,
            Err(ExchangeError::NotConnected)
        );
        ex.connect().await.unwrap();
        assert!(ex.is_connected());
        assert!(ex.place_order(order(OrderSide::Buy, dec!(100))).await.is_ok());
    }

    #[tokio::test]
    async fn test_place_cancel_and_unknown() {
        let ex = PaperExchange::new();
        ex.connect().await.unwrap();
        let placed = ex.place_order(order(OrderSide::Sell, dec!(101))).await.unwrap();
        assert_eq!(ex.get_open_orders("BTC").await.unwrap().len(), 1);

        ex.cancel_order("BTC", &placed.client_order_id).await.unwrap();
        assert_eq!(ex.open_order_count("BTC"), 0);
        assert!(ex
            .cancel_order("BTC", &placed.client_order_id)
            .await
            .unwrap_err()
            .is_unknown_order());
        assert_eq!(ex.cancelled_orders(), vec![placed.client_order_id]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_one_shot() {
        let ex = PaperExchange::new();
        ex.connect().await.unwrap();
        ex.fail_next_place(ExchangeError::RateLimited);
        assert_eq!(
            ex.place_order(order(OrderSide::Buy, dec!(100))).await,
            Err(ExchangeError::RateLimited)
        );
        assert!(ex.place_order(order(OrderSide::Buy, dec!(100))).await.is_ok());

        ex.fail_next_open_orders(ExchangeError::Timeout);
        assert!(ex.get_open_orders("BTC").await.is_err());
        assert!(ex.get_open_orders("BTC").await.is_ok());
    }

    #[tokio::test]
    async fn test_depth_stream_filters_symbols() {
        let ex = PaperExchange::new();
        ex.connect().await.unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        ex.start_depth_stream(
            vec!["BTC".to_string()],
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        let depth = |symbol: &str| Depth {
            symbol: symbol.to_string(),
            bids: vec![PriceLevel {
                price: Price::new(dec!(99)),
                quantity: Size::new(dec!(1)),
            }],
            asks: vec![PriceLevel {
                price: Price::new(dec!(101)),
                quantity: Size::new(dec!(1)),
            }],
            timestamp: Utc::now(),
        };
        ex.push_depth(depth("BTC"));
        ex.push_depth(depth("ETH"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(ex.get_depth("ETH").await.unwrap().symbol, "ETH");
    }

    #[tokio::test]
    async fn test_fill_emits_order_update() {
        let ex = PaperExchange::new();
        ex.connect().await.unwrap();
        let fills = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fills);
        let mut callbacks = UserStreamCallbacks::noop();
        callbacks.on_order_update = Arc::new(move |o| sink.lock().push(o));
        ex.start_user_stream(callbacks).await.unwrap();

        let placed = ex.place_order(order(OrderSide::Buy, dec!(100))).await.unwrap();
        assert!(ex.fill_order("BTC", &placed.client_order_id));
        assert!(!ex.fill_order("BTC", &placed.client_order_id));

        let fills = fills.lock();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].status, OrderStatus::Filled);
        assert_eq!(fills[0].filled_qty, fills[0].quantity);
    }
}

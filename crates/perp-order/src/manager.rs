//! Order reconciliation.
//!
//! Keeps a cached view of live orders per symbol and turns a desired quote
//! set into the minimal cancel/place batch:
//! 1. `sync_active_orders` refreshes the cache and publishes pending totals
//! 2. `calculate_order_diff` matches live orders to desired quotes by price
//! 3. `apply_diff` cancels first, then places within the per-side cap

use std::sync::Arc;

use dashmap::DashMap;
use perp_core::{Order, OrderSide, Quote};
use perp_store::Store;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::{OrderError, OrderResult};
use crate::exchange::DynExchange;

/// Per-side live order cap when none is configured.
pub const DEFAULT_MAX_ORDERS_PER_SIDE: usize = 18;

/// Cancel/place batch for one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderDiff {
    pub to_cancel: Vec<Order>,
    pub to_place: Vec<Order>,
}

impl OrderDiff {
    pub fn is_empty(&self) -> bool {
        self.to_cancel.is_empty() && self.to_place.is_empty()
    }
}

/// Outcome of `apply_diff`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub cancelled: usize,
    /// Cancels the venue no longer knew about.
    pub already_gone: usize,
    pub cancel_failed: usize,
    pub placed: usize,
    pub place_failed: usize,
    /// Places dropped by the per-side cap.
    pub capped: usize,
}

impl ApplyReport {
    pub fn has_failures(&self) -> bool {
        self.cancel_failed > 0 || self.place_failed > 0
    }
}

pub struct OrderManager {
    exchange: DynExchange,
    store: Arc<Store>,
    active: DashMap<String, Vec<Order>>,
    max_orders_per_side: DashMap<String, usize>,
}

impl OrderManager {
    pub fn new(exchange: DynExchange, store: Arc<Store>) -> Self {
        Self {
            exchange,
            store,
            active: DashMap::new(),
            max_orders_per_side: DashMap::new(),
        }
    }

    pub fn exchange(&self) -> &DynExchange {
        &self.exchange
    }

    pub fn set_max_orders_per_side(&self, symbol: &str, max: usize) {
        self.max_orders_per_side.insert(symbol.to_string(), max);
    }

    pub fn max_orders_per_side(&self, symbol: &str) -> usize {
        self.max_orders_per_side
            .get(symbol)
            .map_or(DEFAULT_MAX_ORDERS_PER_SIDE, |m| *m)
    }

    /// Cached live orders for `symbol`.
    pub fn active_orders(&self, symbol: &str) -> Vec<Order> {
        self.active.get(symbol).map(|o| o.clone()).unwrap_or_default()
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Replace the cache with the venue's open orders and publish pending
    /// totals. Returns the live order count.
    pub async fn sync_active_orders(&self, symbol: &str) -> OrderResult<usize> {
        if !self.store.has_symbol(symbol) {
            return Err(OrderError::SymbolNotInitialized(symbol.to_string()));
        }
        let orders: Vec<Order> = self
            .exchange
            .get_open_orders(symbol)
            .await?
            .into_iter()
            .filter(|o| o.status.is_open())
            .collect();
        let count = orders.len();
        self.publish(symbol, &orders);
        self.active.insert(symbol.to_string(), orders);
        debug!(symbol, count, "Active orders synced");
        Ok(count)
    }

    /// Write pending buy/sell and active count for `orders` into the store.
    fn publish(&self, symbol: &str, orders: &[Order]) {
        let (mut buy, mut sell) = (Decimal::ZERO, Decimal::ZERO);
        for order in orders {
            match order.side {
                OrderSide::Buy => buy += order.remaining().0,
                OrderSide::Sell => sell += order.remaining().0,
            }
        }
        self.store.update_pending_orders(symbol, buy, sell);
        self.store.set_active_order_count(symbol, orders.len() as u32);
    }

    // ========================================================================
    // Diff
    // ========================================================================

    /// Match cached live orders to the desired quotes.
    ///
    /// # Arguments
    /// - `desired_buys` / `desired_sells`: innermost first
    /// - `tolerance`: max absolute price distance for a match
    pub fn calculate_order_diff(
        &self,
        symbol: &str,
        desired_buys: &[Quote],
        desired_sells: &[Quote],
        tolerance: Decimal,
    ) -> OrderDiff {
        let live = self.active_orders(symbol);
        let (mut buys, mut sells): (Vec<Order>, Vec<Order>) =
            live.into_iter().partition(|o| o.side == OrderSide::Buy);
        buys.sort_by(|a, b| b.price.cmp(&a.price));
        sells.sort_by(|a, b| a.price.cmp(&b.price));

        let mut diff = OrderDiff::default();
        diff_side(symbol, OrderSide::Buy, buys, desired_buys, tolerance, &mut diff);
        diff_side(symbol, OrderSide::Sell, sells, desired_sells, tolerance, &mut diff);
        diff
    }

    // ========================================================================
    // Apply
    // ========================================================================

    /// Execute `diff`: cancels first, then capped places.
    ///
    /// Per-order failures are logged and counted; the batch always runs to
    /// completion.
    pub async fn apply_diff(&self, symbol: &str, diff: OrderDiff) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut live = self.active_orders(symbol);

        for order in &diff.to_cancel {
            match self.exchange.cancel_order(symbol, &order.client_order_id).await {
                Ok(()) => {
                    report.cancelled += 1;
                    self.store.increment_cancel_count(symbol);
                    live.retain(|o| o.client_order_id != order.client_order_id);
                }
                Err(e) if e.is_unknown_order() => {
                    report.already_gone += 1;
                    live.retain(|o| o.client_order_id != order.client_order_id);
                    debug!(symbol, cloid = %order.client_order_id, "Cancel target already gone");
                }
                Err(e) => {
                    report.cancel_failed += 1;
                    warn!(symbol, cloid = %order.client_order_id, error = %e, "Cancel failed");
                }
            }
        }

        let max = self.max_orders_per_side(symbol);
        let mut room_buy = max.saturating_sub(live.iter().filter(|o| o.side == OrderSide::Buy).count());
        let mut room_sell = max.saturating_sub(live.iter().filter(|o| o.side == OrderSide::Sell).count());

        for order in diff.to_place {
            let room = match order.side {
                OrderSide::Buy => &mut room_buy,
                OrderSide::Sell => &mut room_sell,
            };
            if *room == 0 {
                report.capped += 1;
                continue;
            }
            let cloid = order.client_order_id.clone();
            match self.exchange.place_order(order).await {
                Ok(accepted) => {
                    *room -= 1;
                    report.placed += 1;
                    self.store.increment_place_count(symbol);
                    live.push(accepted);
                }
                Err(e) => {
                    report.place_failed += 1;
                    warn!(symbol, cloid = %cloid, error = %e, "Place failed");
                }
            }
        }

        self.publish(symbol, &live);
        self.active.insert(symbol.to_string(), live);

        if report.capped > 0 {
            warn!(symbol, capped = report.capped, max, "Per-side order cap reached");
        }
        info!(
            symbol,
            cancelled = report.cancelled,
            placed = report.placed,
            cancel_failed = report.cancel_failed,
            place_failed = report.place_failed,
            "Order diff applied"
        );
        report
    }

    /// Cancel every order for `symbol` and clear the cache.
    pub async fn cancel_all(&self, symbol: &str) -> OrderResult<usize> {
        let cancelled = self.exchange.cancel_all_orders(symbol).await?;
        self.active.insert(symbol.to_string(), Vec::new());
        self.publish(symbol, &[]);
        warn!(symbol, cancelled, "All orders cancelled");
        Ok(cancelled)
    }
}

/// Greedy price match for one side.
fn diff_side(
    symbol: &str,
    side: OrderSide,
    live: Vec<Order>,
    desired: &[Quote],
    tolerance: Decimal,
    diff: &mut OrderDiff,
) {
    let size_epsilon = Decimal::new(1, 8);
    let mut used = vec![false; desired.len()];

    for order in live {
        let matched = desired
            .iter()
            .enumerate()
            .find(|(i, q)| !used[*i] && (q.price.0 - order.price.0).abs() <= tolerance);
        match matched {
            Some((i, quote)) => {
                used[i] = true;
                if (quote.size.0 - order.quantity.0).abs() > size_epsilon {
                    diff.to_cancel.push(order);
                    diff.to_place.push(Order::limit(symbol, side, quote.price, quote.size));
                }
            }
            None => diff.to_cancel.push(order),
        }
    }

    for (quote, _) in desired.iter().zip(used).filter(|(_, used)| !used) {
        diff.to_place.push(Order::limit(symbol, side, quote.price, quote.size));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use crate::exchange::Exchange;
    use crate::paper::PaperExchange;
    use perp_core::{Price, Size};
    use rust_decimal_macros::dec;

    fn quote(price: Decimal, size: Decimal) -> Quote {
        Quote::new(Price::new(price), Size::new(size), 0)
    }

    async fn setup() -> (OrderManager, Arc<PaperExchange>, Arc<Store>) {
        let exchange = Arc::new(PaperExchange::new());
        exchange.connect().await.unwrap();
        let store = Arc::new(Store::new());
        store.init_symbol("BTC", 16);
        let manager = OrderManager::new(exchange.clone(), Arc::clone(&store));
        (manager, exchange, store)
    }

    async fn place_all(manager: &OrderManager, buys: &[Quote], sells: &[Quote]) {
        manager.sync_active_orders("BTC").await.unwrap();
        let diff = manager.calculate_order_diff("BTC", buys, sells, dec!(1));
        manager.apply_diff("BTC", diff).await;
        manager.sync_active_orders("BTC").await.unwrap();
    }

    #[tokio::test]
    async fn test_diff_is_idempotent() {
        let (manager, _ex, _store) = setup().await;
        let buys = [quote(dec!(99), dec!(0.01)), quote(dec!(98), dec!(0.01))];
        let sells = [quote(dec!(101), dec!(0.01)), quote(dec!(102), dec!(0.02))];
        place_all(&manager, &buys, &sells).await;

        let diff = manager.calculate_order_diff("BTC", &buys, &sells, dec!(1));
        assert!(diff.is_empty(), "unexpected diff: {diff:?}");
    }

    #[tokio::test]
    async fn test_diff_cancels_unmatched_and_resizes() {
        let (manager, _ex, _store) = setup().await;
        let buys = [quote(dec!(99), dec!(0.01))];
        let sells = [quote(dec!(101), dec!(0.01)), quote(dec!(102), dec!(0.01))];
        place_all(&manager, &buys, &sells).await;

        // Buy moves far away, first sell resized, second sell within tolerance.
        let new_buys = [quote(dec!(90), dec!(0.01))];
        let new_sells = [quote(dec!(101), dec!(0.03)), quote(dec!(102.5), dec!(0.01))];
        let diff = manager.calculate_order_diff("BTC", &new_buys, &new_sells, dec!(1));

        assert_eq!(diff.to_cancel.len(), 2);
        assert_eq!(diff.to_place.len(), 2);
        let prices: Vec<Decimal> = diff.to_place.iter().map(|o| o.price.0).collect();
        assert!(prices.contains(&dec!(90)));
        assert!(prices.contains(&dec!(101)));
        for order in &diff.to_place {
            assert_ne!(order.client_order_id.as_str(), "");
        }
    }

    #[tokio::test]
    async fn test_sync_publishes_pending() {
        let (manager, _ex, store) = setup().await;
        let buys = [quote(dec!(99), dec!(0.01)), quote(dec!(98), dec!(0.02))];
        let sells = [quote(dec!(101), dec!(0.05))];
        place_all(&manager, &buys, &sells).await;

        let snapshot = store.symbol_snapshot("BTC").unwrap();
        assert_eq!(snapshot.pending_buy, dec!(0.03));
        assert_eq!(snapshot.pending_sell, dec!(0.05));
        assert_eq!(snapshot.active_order_count, 3);
        assert_eq!(snapshot.place_count_last, 3);
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort_batch() {
        let (manager, ex, store) = setup().await;
        place_all(&manager, &[quote(dec!(99), dec!(0.01))], &[quote(dec!(101), dec!(0.01))]).await;

        ex.fail_next_cancel(ExchangeError::Timeout);
        ex.fail_next_place(ExchangeError::Rejected("post-only".into()));
        let diff = manager.calculate_order_diff(
            "BTC",
            &[quote(dec!(95), dec!(0.01))],
            &[quote(dec!(105), dec!(0.01))],
            dec!(1),
        );
        let report = manager.apply_diff("BTC", diff).await;

        assert_eq!(report.cancel_failed, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.place_failed, 1);
        assert_eq!(report.placed, 1);
        assert!(report.has_failures());
        assert_eq!(store.symbol_snapshot("BTC").unwrap().cancel_count_last, 1);
    }

    #[tokio::test]
    async fn test_unknown_cancel_removes_from_cache() {
        let (manager, ex, _store) = setup().await;
        place_all(&manager, &[quote(dec!(99), dec!(0.01))], &[]).await;
        let live = manager.active_orders("BTC");
        ex.cancel_all_orders("BTC").await.unwrap();

        let report = manager
            .apply_diff(
                "BTC",
                OrderDiff {
                    to_cancel: live,
                    to_place: Vec::new(),
                },
            )
            .await;
        assert_eq!(report.already_gone, 1);
        assert!(manager.active_orders("BTC").is_empty());
    }

    #[tokio::test]
    async fn test_place_cap_per_side() {
        let (manager, ex, _store) = setup().await;
        manager.set_max_orders_per_side("BTC", 2);
        let buys: Vec<Quote> = (0..4).map(|i| quote(dec!(99) - Decimal::from(i), dec!(0.01))).collect();
        manager.sync_active_orders("BTC").await.unwrap();
        let diff = manager.calculate_order_diff("BTC", &buys, &[], dec!(0.1));
        let report = manager.apply_diff("BTC", diff).await;

        assert_eq!(report.placed, 2);
        assert_eq!(report.capped, 2);
        assert_eq!(ex.open_order_count("BTC"), 2);
        assert_eq!(manager.max_orders_per_side("ETH"), DEFAULT_MAX_ORDERS_PER_SIDE);
    }

    #[tokio::test]
    async fn test_cancel_all_clears_cache() {
        let (manager, ex, store) = setup().await;
        place_all(&manager, &[quote(dec!(99), dec!(0.01))], &[quote(dec!(101), dec!(0.01))]).await;

        assert_eq!(manager.cancel_all("BTC").await.unwrap(), 2);
        assert!(manager.active_orders("BTC").is_empty());
        assert_eq!(ex.open_order_count("BTC"), 0);
        assert_eq!(store.symbol_snapshot("BTC").unwrap().pending_buy, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_sync_unknown_symbol() {
        let (manager, _ex, _store) = setup().await;
        assert!(matches!(
            manager.sync_active_orders("ETH").await,
            Err(OrderError::SymbolNotInitialized(_))
        ));
    }
}

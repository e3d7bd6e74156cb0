//! Per-symbol quoting runner.
//!
//! Lifecycle: `Created -> Started -> Stopped`. `Stopped` is terminal.
//!
//! Tasks spawned by `start`:
//! - one quote loop per symbol on `quote_interval`
//! - the depth worker
//! - the global monitor (1 s)
//! - the snapshot task when persistence is configured
//!
//! All tasks observe a shared `watch` shutdown channel; `stop` joins them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use perp_core::{
    FundingRate, Order, OrderSide, OrderStatus, PositionUpdate, Quote, QuoteMode, Size, SymbolConfig, Trade,
};
use perp_order::{ApplyReport, DynExchange, OrderManager, UserStreamCallbacks};
use perp_risk::{RiskGate, StopLossLatch};
use perp_store::Store;
use perp_strategy::{PricingModel, QuoteEngine, QuoteSet, StrategyError};
use perp_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::depth::{depth_queue, DepthStats, DEPTH_QUEUE_CAPACITY};
use crate::error::{AppError, AppResult, CycleError, CycleResult};

/// Active orders above this trip the overflow breaker.
pub const ORDER_OVERFLOW_LIMIT: u32 = 50;

const GLOBAL_MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Global monitor ticks between risk metric dumps.
const RISK_LOG_EVERY: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Started,
    Stopped,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Applied {
        mode: QuoteMode,
        buys: usize,
        sells: usize,
        report: ApplyReport,
    },
    /// Dry run: the diff was computed and logged only.
    DryRun {
        mode: QuoteMode,
        buys: usize,
        sells: usize,
        to_cancel: usize,
        to_place: usize,
    },
    /// Cancel budget nearly spent; resting orders kept as they are.
    Throttled { cancel_count: u32, limit: u32 },
}

// ============================================================================
// Helpers
// ============================================================================

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Price tolerance for matching live orders to desired quotes.
///
/// `clamp(0.9 * layer_spacing, 10 ticks, 3 * min_spread * mid)`.
pub fn diff_tolerance(config: &SymbolConfig, mid: Decimal) -> Decimal {
    let spacing = match &config.unified_grid {
        Some(grid) => grid.first_spacing,
        None if config.near_start_offset > Decimal::ZERO => config.near_start_offset * mid,
        None => Decimal::new(5, 3) * mid,
    };
    let lower = config.tick_size * Decimal::TEN;
    let upper = (Decimal::from(3) * config.min_spread * mid).max(lower);
    (spacing * Decimal::new(9, 1)).max(lower).min(upper)
}

/// PnL realized by a fill against the current position.
///
/// Only the part of the fill that closes the position realizes PnL.
pub fn realized_pnl(position: Decimal, entry_price: Decimal, side: OrderSide, price: Decimal, qty: Decimal) -> Decimal {
    if position.is_zero() || entry_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let closed = qty.min(position.abs());
    match side {
        OrderSide::Sell if position > Decimal::ZERO => (price - entry_price) * closed,
        OrderSide::Buy if position < Decimal::ZERO => (entry_price - price) * closed,
        _ => Decimal::ZERO,
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Shared state behind every spawned task.
struct RunnerContext {
    config: AppConfig,
    exchange: DynExchange,
    store: Arc<Store>,
    engine: Arc<QuoteEngine>,
    risk: RiskGate,
    orders: OrderManager,
    latch: StopLossLatch,
}

pub struct Runner {
    ctx: Arc<RunnerContext>,
    state: tokio::sync::Mutex<RunnerState>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    depth_stats: Mutex<Option<Arc<DepthStats>>>,
}

impl Runner {
    /// Validate `config` and wire every component around `exchange`.
    pub fn new(config: AppConfig, exchange: DynExchange) -> AppResult<Self> {
        config.validate()?;

        let store = Arc::new(match &config.global.snapshot_path {
            Some(path) => Store::with_snapshot_path(path),
            None => Store::new(),
        });
        let engine = Arc::new(QuoteEngine::new(config.symbols.clone(), Arc::clone(&store)));
        let risk = RiskGate::new(
            config.symbols.clone(),
            Arc::clone(&store),
            config.global.total_notional_max,
        );
        let orders = OrderManager::new(Arc::clone(&exchange), Arc::clone(&store));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            ctx: Arc::new(RunnerContext {
                config,
                exchange,
                store,
                engine,
                risk,
                orders,
                latch: StopLossLatch::new(),
            }),
            state: tokio::sync::Mutex::new(RunnerState::Created),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            depth_stats: Mutex::new(None),
        })
    }

    pub async fn state(&self) -> RunnerState {
        *self.state.lock().await
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.ctx.store
    }

    pub fn engine(&self) -> &Arc<QuoteEngine> {
        &self.ctx.engine
    }

    pub fn risk(&self) -> &RiskGate {
        &self.ctx.risk
    }

    pub fn order_manager(&self) -> &OrderManager {
        &self.ctx.orders
    }

    pub fn stop_latch(&self) -> &StopLossLatch {
        &self.ctx.latch
    }

    /// Depth queue counters. `None` before `start`.
    pub fn depth_stats(&self) -> Option<Arc<DepthStats>> {
        self.depth_stats.lock().clone()
    }

    /// Manually clear a stop-loss latch so quoting resumes.
    pub fn reset_stop_loss(&self, symbol: &str) -> bool {
        self.ctx.latch.reset(symbol).is_some()
    }

    /// Connect, subscribe and spawn all tasks.
    ///
    /// Fails unless the runner is in `Created`.
    pub async fn start(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if *state != RunnerState::Created {
            return Err(AppError::InvalidState(state.to_string()));
        }
        let ctx = &self.ctx;

        for symbol in &ctx.config.symbols {
            ctx.store.init_symbol(&symbol.symbol, symbol.history_size);
            ctx.engine.enable_vpin(&symbol.symbol);
            ctx.orders
                .set_max_orders_per_side(&symbol.symbol, symbol.max_orders_per_side as usize);
        }

        ctx.exchange.connect().await?;

        let (producer, worker) = depth_queue(Arc::clone(&ctx.store), Arc::clone(&ctx.engine), DEPTH_QUEUE_CAPACITY);
        let symbols = ctx.config.symbol_names();
        ctx.exchange
            .start_depth_stream(symbols.clone(), producer.callback())
            .await?;

        if ctx.config.any_vpin_enabled() {
            let trade_ctx = Arc::clone(ctx);
            ctx.exchange
                .start_trade_stream(
                    symbols.clone(),
                    Arc::new(move |trade: Trade| {
                        if let Err(e) = trade_ctx.engine.record_trade(&trade) {
                            debug!(symbol = %trade.symbol, error = %e, "Trade ignored by VPIN");
                        }
                    }),
                )
                .await?;
        }

        ctx.exchange.start_user_stream(user_callbacks(ctx)).await?;

        let mut handles = Vec::with_capacity(symbols.len() + 3);
        handles.push(tokio::spawn(worker.run(self.shutdown_tx.subscribe())));
        for symbol in symbols {
            handles.push(tokio::spawn(
                Arc::clone(ctx).run_symbol(symbol, self.shutdown_tx.subscribe()),
            ));
        }
        handles.push(tokio::spawn(
            Arc::clone(ctx).run_global_monitor(self.shutdown_tx.subscribe()),
        ));
        if ctx.store.snapshot_path().is_some() {
            handles.push(
                ctx.store
                    .spawn_snapshot_task(ctx.config.snapshot_interval(), self.shutdown_tx.subscribe()),
            );
        }

        *self.depth_stats.lock() = Some(Arc::clone(producer.stats()));
        self.handles.lock().extend(handles);
        *state = RunnerState::Started;
        info!(
            symbols = ctx.config.symbols.len(),
            interval_ms = ctx.config.global.quote_interval_ms,
            dry_run = ctx.config.global.dry_run,
            "Runner started"
        );
        Ok(())
    }

    /// Signal shutdown and wait for every task. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        match *state {
            RunnerState::Stopped => return,
            RunnerState::Created => {
                *state = RunnerState::Stopped;
                return;
            }
            RunnerState::Started => {}
        }

        info!("Runner stopping");
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Task ended abnormally");
            }
        }

        if let Err(e) = self.ctx.exchange.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
        if let Err(e) = self.ctx.store.close() {
            error!(error = %e, "Final snapshot failed");
        }
        *state = RunnerState::Stopped;
        info!("Runner stopped");
    }

    /// Run one quote cycle for `symbol`.
    pub async fn process_symbol(&self, symbol: &str) -> CycleResult<CycleOutcome> {
        self.ctx.process_symbol(symbol).await
    }
}

fn user_callbacks(ctx: &Arc<RunnerContext>) -> UserStreamCallbacks {
    let order_ctx = Arc::clone(ctx);
    let account_ctx = Arc::clone(ctx);
    let funding_ctx = Arc::clone(ctx);
    UserStreamCallbacks {
        on_order_update: Arc::new(move |order: Order| order_ctx.on_order_update(order)),
        on_account_update: Arc::new(move |update: PositionUpdate| {
            debug!(symbol = %update.symbol, size = %update.size, "Account update");
            account_ctx.store.update_position(&update);
        }),
        on_funding: Arc::new(move |funding: FundingRate| {
            debug!(symbol = %funding.symbol, rate = %funding.rate, "Funding update");
            funding_ctx.store.update_funding_rate(&funding.symbol, funding.rate);
        }),
    }
}

impl RunnerContext {
    // ========================================================================
    // Loops
    // ========================================================================

    async fn run_symbol(self: Arc<Self>, symbol: String, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.quote_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!(symbol = %symbol, "Quote loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_symbol(&symbol).await {
                        self.log_cycle_error(&symbol, &e);
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(symbol = %symbol, "Quote loop stopped");
    }

    async fn run_global_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(GLOBAL_MONITOR_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    self.monitor_global_state(ticks % RISK_LOG_EVERY == 0);
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    fn monitor_global_state(&self, log_risk: bool) {
        Metrics::total_notional(to_f64(self.store.total_notional()));
        if let Err(e) = self.risk.check_global() {
            warn!(error = %e, "Global notional cap exceeded");
        }

        let now = Utc::now();
        let limit = chrono::Duration::seconds(self.config.global.stale_price_secs as i64);
        for symbol in self.config.symbol_names() {
            let Some(snapshot) = self.store.symbol_snapshot(&symbol) else {
                continue;
            };
            match snapshot.price_age(now) {
                Some(age) if age > limit => {
                    error!(symbol = %symbol, age_secs = age.num_seconds(), "Price feed stale");
                    Metrics::error(&symbol, "stale_price");
                }
                None => debug!(symbol = %symbol, "No price received yet"),
                _ => {}
            }
            if log_risk {
                self.risk.log_risk_metrics(&symbol);
            }
        }
    }

    fn log_cycle_error(&self, symbol: &str, err: &CycleError) {
        if err.is_toxicity_pause() {
            info!(symbol, error = %err, "Quoting paused on toxic flow");
            Metrics::vpin_pause(symbol);
            return;
        }
        Metrics::error(symbol, err.kind());
        match err {
            CycleError::Strategy(StrategyError::SymbolNotConfigured(_))
            | CycleError::Strategy(StrategyError::SymbolNotInitialized(_)) => {
                warn!(symbol, error = %err, "Cycle skipped: symbol not ready")
            }
            CycleError::Strategy(_) | CycleError::Risk(_) | CycleError::StalePrice { .. } => {
                warn!(symbol, error = %err, "Cycle skipped")
            }
            CycleError::Order(_) => warn!(symbol, error = %err, "Order sync failed"),
            CycleError::OrderOverflow { .. } | CycleError::StopLossTriggered(_) => {
                error!(symbol, error = %err, "Cycle aborted")
            }
            CycleError::StopLossLatched => debug!(symbol, "Stop-loss latched, not quoting"),
        }
    }

    // ========================================================================
    // Quote cycle
    // ========================================================================

    async fn process_symbol(&self, symbol: &str) -> CycleResult<CycleOutcome> {
        let started = Instant::now();
        let config = self
            .config
            .symbol(symbol)
            .ok_or_else(|| StrategyError::SymbolNotConfigured(symbol.to_string()))?;

        if self.latch.is_latched(symbol) {
            return Err(CycleError::StopLossLatched);
        }

        if let Some(previous) = self.store.reset_cancel_count_if_due(symbol) {
            debug!(symbol, previous, "Cancel window reset");
        }

        self.orders.sync_active_orders(symbol).await?;

        let active = self.store.active_order_count(symbol);
        if active > ORDER_OVERFLOW_LIMIT {
            error!(symbol, active, limit = ORDER_OVERFLOW_LIMIT, "Order overflow, cancelling all");
            if let Err(e) = self.orders.cancel_all(symbol).await {
                error!(symbol, error = %e, "Emergency cancel failed");
            }
            return Err(CycleError::OrderOverflow { count: active });
        }

        let snapshot = self
            .store
            .symbol_snapshot(symbol)
            .ok_or_else(|| StrategyError::SymbolNotInitialized(symbol.to_string()))?;
        let age = snapshot.price_age(Utc::now());
        let stale_limit = chrono::Duration::seconds(self.config.global.stale_price_secs as i64);
        if age.map_or(true, |a| a > stale_limit) {
            self.refresh_mid(symbol).await;
            return Err(CycleError::StalePrice {
                age_secs: age.map(|a| a.num_seconds()),
            });
        }

        if let Some(reason) = self.risk.check_stop_loss(symbol) {
            self.latch.trigger(symbol, reason.clone());
            if let Err(e) = self.orders.cancel_all(symbol).await {
                error!(symbol, error = %e, "Cancel after stop-loss failed");
            }
            return Err(CycleError::StopLossTriggered(reason));
        }

        if let Some(target) = self.risk.should_reduce_position(symbol) {
            warn!(symbol, position = %snapshot.position.size, %target, "Position should be reduced");
        }

        let limit = config.max_cancel_per_min;
        if snapshot.cancel_count_last * 100 >= limit * 95 {
            warn!(symbol, count = snapshot.cancel_count_last, limit, "Cancel budget nearly spent, holding quotes");
            return Ok(CycleOutcome::Throttled {
                cancel_count: snapshot.cancel_count_last,
                limit,
            });
        }

        // Resting orders are about to be replaced; size risk on the new set.
        self.store
            .update_pending_orders(symbol, Decimal::ZERO, Decimal::ZERO);
        let QuoteSet {
            mode,
            mut buys,
            mut sells,
            pricing,
        } = self.engine.generate_quotes(symbol)?;

        if mode == QuoteMode::Grinding {
            self.risk.check_grinding_risk(symbol)?;
            buys = self.scale_grinding(symbol, config, buys);
            sells = self.scale_grinding(symbol, config, sells);
        }

        if let Err(e) = self.risk.check_batch_pre_trade(symbol, &buys, &sells) {
            debug!(symbol, error = %e, "Batch over worst-case budget, trimming");
            Metrics::gate_blocked(e.gate(), symbol);
            (buys, sells) = self.risk.trim_batch(symbol, buys, sells);
        }

        match mode {
            QuoteMode::Pinning | QuoteMode::Grinding => {
                self.risk.validate_reducing_quotes(symbol, &buys, &sells)?;
            }
            QuoteMode::Normal => {
                if let (Some(best_buy), Some(best_sell)) = (buys.first(), sells.first()) {
                    self.risk.validate_quotes(symbol, best_buy.price, best_sell.price)?;
                }
            }
        }

        let buys = self.filter_pre_trade(symbol, OrderSide::Buy, buys);
        let sells = self.filter_pre_trade(symbol, OrderSide::Sell, sells);

        let tolerance = diff_tolerance(config, snapshot.mid_price);
        let diff = self.orders.calculate_order_diff(symbol, &buys, &sells, tolerance);

        let outcome = if self.config.global.dry_run {
            info!(
                symbol,
                %mode,
                cancel = diff.to_cancel.len(),
                place = diff.to_place.len(),
                "Dry run, diff not submitted"
            );
            for order in &diff.to_place {
                debug!(symbol, side = %order.side, price = %order.price, size = %order.quantity, "Would place");
            }
            CycleOutcome::DryRun {
                mode,
                buys: buys.len(),
                sells: sells.len(),
                to_cancel: diff.to_cancel.len(),
                to_place: diff.to_place.len(),
            }
        } else if diff.is_empty() {
            CycleOutcome::Applied {
                mode,
                buys: buys.len(),
                sells: sells.len(),
                report: ApplyReport::default(),
            }
        } else {
            let report = self.orders.apply_diff(symbol, diff).await;
            Metrics::orders_applied(symbol, report.placed, report.cancelled);
            CycleOutcome::Applied {
                mode,
                buys: buys.len(),
                sells: sells.len(),
                report,
            }
        };

        self.update_symbol_metrics(symbol, &pricing, mode, buys.len(), sells.len());
        Metrics::quote_latency(symbol, started.elapsed().as_secs_f64() * 1000.0);
        Ok(outcome)
    }

    /// Best-effort mid refresh from a one-shot book fetch.
    async fn refresh_mid(&self, symbol: &str) {
        match self.exchange.get_depth(symbol).await {
            Ok(depth) => match (depth.best_bid(), depth.best_ask()) {
                (Some(bid), Some(ask)) => {
                    self.store.update_mid_price(symbol, bid.0, ask.0);
                    self.engine.update_vpin_mid(symbol, self.store.mid_price(symbol));
                    info!(symbol, mid = %self.store.mid_price(symbol), "Mid refreshed from book snapshot");
                }
                _ => warn!(symbol, "Book snapshot has an empty side"),
            },
            Err(e) => warn!(symbol, error = %e, "Book snapshot fetch failed"),
        }
    }

    fn scale_grinding(&self, symbol: &str, config: &SymbolConfig, quotes: Vec<Quote>) -> Vec<Quote> {
        quotes
            .into_iter()
            .filter_map(|q| {
                let size = Size::new(self.risk.adjust_grinding_size(symbol, q.size.0)).round_to_lot(config.min_qty);
                (size.0 >= config.min_qty).then(|| Quote::new(q.price, size, q.layer))
            })
            .collect()
    }

    fn filter_pre_trade(&self, symbol: &str, side: OrderSide, quotes: Vec<Quote>) -> Vec<Quote> {
        quotes
            .into_iter()
            .filter(|q| match self.risk.check_pre_trade(symbol, side, q.size.0) {
                Ok(()) => true,
                Err(e) => {
                    debug!(symbol, %side, price = %q.price, size = %q.size, error = %e, "Quote dropped by risk gate");
                    Metrics::gate_blocked(e.gate(), symbol);
                    false
                }
            })
            .collect()
    }

    fn update_symbol_metrics(&self, symbol: &str, pricing: &PricingModel, mode: QuoteMode, buys: usize, sells: usize) {
        let Some(s) = self.store.symbol_snapshot(symbol) else {
            return;
        };
        Metrics::position(
            symbol,
            to_f64(s.position.size),
            to_f64(s.position.notional),
            to_f64(s.position.unrealized_pnl),
        );
        Metrics::pending(symbol, to_f64(s.pending_buy), to_f64(s.pending_sell));
        Metrics::worst_case(symbol, to_f64(s.worst_case_long));
        Metrics::pnl(symbol, to_f64(s.total_pnl), to_f64(s.max_drawdown));
        Metrics::market(symbol, to_f64(s.mid_price), to_f64(s.funding_rate));
        Metrics::cancel_rate(symbol, s.cancel_count_last);
        Metrics::strategy_mode(symbol, mode);
        Metrics::grid_layers(symbol, buys, sells);
        if pricing.mid > Decimal::ZERO {
            Metrics::spread(symbol, to_f64(pricing.spread / pricing.mid * Decimal::from(10_000)));
        }
        if let Some(stats) = self.engine.vpin_stats(symbol) {
            Metrics::vpin(symbol, stats.vpin, stats.filled_buckets);
        }
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    fn on_order_update(&self, order: Order) {
        if order.status != OrderStatus::Filled {
            debug!(symbol = %order.symbol, cloid = %order.client_order_id, status = %order.status, "Order update");
            return;
        }
        let position = self
            .store
            .symbol_snapshot(&order.symbol)
            .map(|s| s.position)
            .unwrap_or_default();
        let pnl = realized_pnl(
            position.size,
            position.entry_price,
            order.side,
            order.price.0,
            order.filled_qty.0,
        );
        self.store.record_fill(&order.symbol, order.filled_qty.0, pnl);
        Metrics::fill(&order.symbol, order.side);
        info!(
            symbol = %order.symbol,
            side = %order.side,
            price = %order.price,
            qty = %order.filled_qty,
            %pnl,
            "Order filled"
        );
    }
}

//! Quote cycle integration tests.
//!
//! Each test drives `Runner::process_symbol` by hand against the paper venue:
//! - Flat book at 50000: two-sided ladder, idempotent on repeat
//! - Dry run, throttling and the cancel-flicker pause
//! - Overflow breaker, stale price refresh
//! - Stop-loss latch and manual reset
//! - Partial placement failure
//! - Pinning and grinding batches reach the venue

mod common;
use common::*;

use perp_bot::{CycleError, CycleOutcome};
use perp_core::{Order, OrderSide, Price, QuoteMode, Size};
use perp_order::ExchangeError;
use perp_strategy::StrategyError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_flat_book_at_50000_places_two_sided_ladder() {
    let (runner, paper) = ready_runner(app_config(false)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));

    let outcome = runner.process_symbol(SYMBOL).await.unwrap();
    let CycleOutcome::Applied { mode, buys, sells, report } = outcome else {
        panic!("expected applied cycle, got {outcome:?}");
    };
    assert_eq!(mode, QuoteMode::Normal);
    assert!(buys > 0 && sells > 0);
    assert_eq!(report.placed, buys + sells);
    assert!(!report.has_failures());

    let placed = paper.placed_orders();
    let best_buy = placed
        .iter()
        .filter(|o| o.side == OrderSide::Buy)
        .map(|o| o.price.0)
        .max()
        .unwrap();
    let best_sell = placed
        .iter()
        .filter(|o| o.side == OrderSide::Sell)
        .map(|o| o.price.0)
        .min()
        .unwrap();
    assert!(best_buy < dec!(50000));
    assert!(best_sell > dec!(50000));
    assert!((best_sell - best_buy) / dec!(50000) >= dec!(0.0005));

    let snapshot = runner.store().symbol_snapshot(SYMBOL).unwrap();
    assert_eq!(snapshot.active_order_count as usize, buys + sells);
    assert!(snapshot.pending_buy > Decimal::ZERO);
    assert!(snapshot.pending_sell > Decimal::ZERO);
}

#[tokio::test]
async fn test_repeat_cycle_is_idempotent() {
    let (runner, paper) = ready_runner(app_config(false)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));

    runner.process_symbol(SYMBOL).await.unwrap();
    let resting = paper.open_order_count(SYMBOL);
    paper.clear_history();

    let outcome = runner.process_symbol(SYMBOL).await.unwrap();
    match outcome {
        CycleOutcome::Applied { report, .. } => {
            assert_eq!(report.placed, 0);
            assert_eq!(report.cancelled, 0);
        }
        other => panic!("expected applied cycle, got {other:?}"),
    }
    assert!(paper.placed_orders().is_empty());
    assert!(paper.cancelled_orders().is_empty());
    assert_eq!(paper.open_order_count(SYMBOL), resting);
}

#[tokio::test]
async fn test_dry_run_submits_nothing() {
    let (runner, paper) = ready_runner(app_config(true)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));

    match runner.process_symbol(SYMBOL).await.unwrap() {
        CycleOutcome::DryRun { to_cancel, to_place, buys, sells, .. } => {
            assert_eq!(to_cancel, 0);
            assert_eq!(to_place, buys + sells);
            assert!(to_place > 0);
        }
        other => panic!("expected dry run, got {other:?}"),
    }
    assert!(paper.placed_orders().is_empty());
    assert_eq!(paper.open_order_count(SYMBOL), 0);
}

#[tokio::test]
async fn test_cancel_flicker_pauses_quoting() {
    let (runner, paper) = ready_runner(app_config(false)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));
    for _ in 0..45 {
        runner.store().increment_cancel_count(SYMBOL);
    }

    let err = runner.process_symbol(SYMBOL).await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Strategy(StrategyError::QuoteFlicker { count: 45, limit: 50 })
    ));
    assert_eq!(err.kind(), "quote_flicker");
    assert!(paper.placed_orders().is_empty());
}

#[tokio::test]
async fn test_cancel_budget_nearly_spent_holds_quotes() {
    let (runner, paper) = ready_runner(app_config(false)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));
    runner.process_symbol(SYMBOL).await.unwrap();
    let resting = paper.open_order_count(SYMBOL);
    for _ in 0..48 {
        runner.store().increment_cancel_count(SYMBOL);
    }

    let outcome = runner.process_symbol(SYMBOL).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Throttled {
            cancel_count: 48,
            limit: 50
        }
    );
    assert_eq!(paper.open_order_count(SYMBOL), resting);
}

#[tokio::test]
async fn test_overflow_breaker_cancels_everything() {
    let (runner, paper) = ready_runner(app_config(false)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));
    for i in 0..51 {
        paper.seed_open_order(Order::limit(
            SYMBOL,
            OrderSide::Buy,
            Price::new(dec!(40000) + Decimal::from(i)),
            Size::new(dec!(0.01)),
        ));
    }

    let err = runner.process_symbol(SYMBOL).await.unwrap_err();
    assert!(matches!(err, CycleError::OrderOverflow { count: 51 }));
    assert_eq!(paper.open_order_count(SYMBOL), 0);
    assert!(runner.order_manager().active_orders(SYMBOL).is_empty());
}

#[tokio::test]
async fn test_stale_price_refreshes_from_book() {
    let (runner, paper) = ready_runner(app_config(false)).await;

    // No book anywhere yet
    let err = runner.process_symbol(SYMBOL).await.unwrap_err();
    assert!(matches!(err, CycleError::StalePrice { age_secs: None }));

    // Book known to the venue but never streamed
    paper.push_depth(book(dec!(49999.5), dec!(50000.5)));
    let err = runner.process_symbol(SYMBOL).await.unwrap_err();
    assert!(matches!(err, CycleError::StalePrice { age_secs: None }));
    assert_eq!(runner.store().mid_price(SYMBOL), dec!(50000));

    assert!(runner.process_symbol(SYMBOL).await.is_ok());
}

#[tokio::test]
async fn test_stop_loss_latches_until_reset() {
    let (runner, paper) = ready_runner(app_config(false)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));
    runner.process_symbol(SYMBOL).await.unwrap();
    assert!(paper.open_order_count(SYMBOL) > 0);

    // 12% loss on 50000 notional
    set_position(runner.store(), dec!(1), dec!(50000), dec!(-6000));
    let err = runner.process_symbol(SYMBOL).await.unwrap_err();
    assert!(matches!(err, CycleError::StopLossTriggered(_)));
    assert_eq!(paper.open_order_count(SYMBOL), 0);
    assert!(runner.stop_latch().is_latched(SYMBOL));

    // Stays paused even after the loss recovers
    set_position(runner.store(), Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
    let err = runner.process_symbol(SYMBOL).await.unwrap_err();
    assert!(matches!(err, CycleError::StopLossLatched));
    assert_eq!(paper.open_order_count(SYMBOL), 0);

    assert!(runner.reset_stop_loss(SYMBOL));
    assert!(!runner.reset_stop_loss(SYMBOL));
    assert!(runner.process_symbol(SYMBOL).await.is_ok());
    assert!(paper.open_order_count(SYMBOL) > 0);
}

#[tokio::test]
async fn test_partial_place_failure_recovers_next_cycle() {
    let (runner, paper) = ready_runner(app_config(false)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));
    paper.fail_next_place(ExchangeError::Rejected("post-only would cross".to_string()));

    let report = match runner.process_symbol(SYMBOL).await.unwrap() {
        CycleOutcome::Applied { report, buys, sells, .. } => {
            assert_eq!(report.placed + 1, buys + sells);
            report
        }
        other => panic!("expected applied cycle, got {other:?}"),
    };
    assert_eq!(report.place_failed, 1);
    assert!(report.has_failures());
    let after_first = paper.open_order_count(SYMBOL);

    match runner.process_symbol(SYMBOL).await.unwrap() {
        CycleOutcome::Applied { report, .. } => {
            assert_eq!(report.placed, 1);
            assert_eq!(report.place_failed, 0);
        }
        other => panic!("expected applied cycle, got {other:?}"),
    }
    assert_eq!(paper.open_order_count(SYMBOL), after_first + 1);
}

#[tokio::test]
async fn test_open_orders_failure_skips_cycle() {
    let (runner, paper) = ready_runner(app_config(false)).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999.5), dec!(50000.5));
    paper.fail_next_open_orders(ExchangeError::Timeout);

    let err = runner.process_symbol(SYMBOL).await.unwrap_err();
    assert!(matches!(err, CycleError::Order(_)));
    assert_eq!(err.kind(), "order");
    assert!(paper.placed_orders().is_empty());
}

#[tokio::test]
async fn test_unknown_symbol() {
    let (runner, _paper) = ready_runner(app_config(false)).await;
    let err = runner.process_symbol("DOGEUSDC").await.unwrap_err();
    assert!(matches!(err, CycleError::Strategy(StrategyError::SymbolNotConfigured(_))));
}

#[tokio::test]
async fn test_pinning_cycle_parks_pin_at_best_ask() {
    let mut config = app_config(false);
    config.symbols[0].pinning.enabled = true;
    config.symbols[0].pinning.threshold = dec!(0.85);
    let (runner, paper) = ready_runner(config).await;
    runner.store().update_mid_price(SYMBOL, dec!(49999), dec!(50001));
    set_position(runner.store(), dec!(0.9), dec!(50000), Decimal::ZERO);

    let outcome = runner.process_symbol(SYMBOL).await.unwrap();
    let CycleOutcome::Applied { mode, report, .. } = outcome else {
        panic!("expected applied cycle, got {outcome:?}");
    };
    assert_eq!(mode, QuoteMode::Pinning);
    assert!(!report.has_failures());

    let placed = paper.placed_orders();
    let pin = placed
        .iter()
        .filter(|o| o.side == OrderSide::Sell)
        .min_by_key(|o| o.price)
        .unwrap();
    assert_eq!(pin.price.0, dec!(50001));
    assert_eq!(pin.quantity.0, dec!(0.023));

    // Far protective layers start 4.8% away on both sides.
    let best_buy = placed
        .iter()
        .filter(|o| o.side == OrderSide::Buy)
        .map(|o| o.price.0)
        .max()
        .unwrap();
    assert!(best_buy <= dec!(47600));
    assert!(placed
        .iter()
        .filter(|o| o.side == OrderSide::Sell && o.price.0 != dec!(50001))
        .all(|o| o.price.0 >= dec!(52400)));
}

#[tokio::test]
async fn test_grinding_cycle_places_crossed_taker_and_counter() {
    let mut config = app_config(false);
    config.symbols[0].grinding.enabled = true;
    config.symbols[0].grinding.threshold = dec!(0.6);
    let (runner, paper) = ready_runner(config).await;
    runner.store().update_mid_price(SYMBOL, dec!(50000), dec!(50000));
    set_position(runner.store(), dec!(0.7), dec!(50000), Decimal::ZERO);

    let outcome = runner.process_symbol(SYMBOL).await.unwrap();
    let CycleOutcome::Applied { mode, buys, sells, report } = outcome else {
        panic!("expected applied cycle, got {outcome:?}");
    };
    assert_eq!(mode, QuoteMode::Grinding);
    assert_eq!((buys, sells), (1, 2));
    assert_eq!(report.placed, 3);

    let placed = paper.placed_orders();
    let mut sell_prices: Vec<Decimal> = placed
        .iter()
        .filter(|o| o.side == OrderSide::Sell)
        .map(|o| o.price.0)
        .collect();
    sell_prices.sort();
    // Taker through mid, passive re-entry 4.2 bps above.
    assert_eq!(sell_prices, vec![dec!(49975), dec!(50021)]);

    let counter: Vec<_> = placed.iter().filter(|o| o.side == OrderSide::Buy).collect();
    assert_eq!(counter.len(), 1);
    assert_eq!(counter[0].price.0, dec!(49975));
    assert!(counter[0].quantity.0 >= dec!(0.001));
}

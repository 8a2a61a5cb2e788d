//! End-to-end scenarios driven through the dispatcher.
//!
//! Each test owns both ends of the event queue and feeds events into
//! `StrategyEngine::handle_event` directly, draining paper fills back
//! through the queue, so the scenarios are fully deterministic.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use pmm_common::{PriceLevel, Side};

use pmm_bot::config::BotConfig;
use pmm_bot::engine::StrategyEngine;
use pmm_bot::events::{Event, EventQueue, EventReceiver};

fn test_config(dir: &TempDir) -> BotConfig {
    let mut config = BotConfig::default();
    config.paths.state_file = dir.path().join("state.json");
    config.paths.log_dir = dir.path().join("logs");
    config
}

fn new_engine(dir: &TempDir) -> (StrategyEngine, EventReceiver) {
    let (tx, rx) = EventQueue::unbounded();
    (StrategyEngine::new(&test_config(dir), tx, None), rx)
}

fn levels(pairs: &[(Decimal, Decimal)]) -> Vec<PriceLevel> {
    pairs.iter().map(|(p, s)| PriceLevel::new(*p, *s)).collect()
}

fn opening_snapshot(token: &str) -> Event {
    Event::book_snapshot(
        token,
        levels(&[(dec!(0.41), dec!(7000)), (dec!(0.40), dec!(6000))]),
        levels(&[(dec!(0.42), dec!(1700)), (dec!(0.43), dec!(3700))]),
    )
}

/// Feed every queued event (paper fills) back into the engine until the
/// queue drains.
fn drain(engine: &mut StrategyEngine, rx: &mut EventReceiver) {
    while let Some(event) = rx.try_recv() {
        engine.handle_event(event);
    }
}

// =============================================================================
// S1: snapshot populates the book and produces an opening quote
// =============================================================================

#[test]
fn s1_snapshot_and_opening_quote() {
    let dir = TempDir::new().unwrap();
    let (mut engine, _rx) = new_engine(&dir);
    engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");

    engine.handle_event(opening_snapshot("T"));

    let book = engine.book("T").unwrap();
    assert_eq!(book.best_bid(), Some(dec!(0.41)));
    assert_eq!(book.best_ask(), Some(dec!(0.42)));
    assert_eq!(book.mid(), Some(dec!(0.415)));
    assert_eq!(book.spread(), Some(dec!(0.01)));

    let orders = engine.open_orders("T");
    assert_eq!(orders.len(), 2);
    let bid = orders.iter().find(|o| o.side == Side::Buy).unwrap();
    let ask = orders.iter().find(|o| o.side == Side::Sell).unwrap();
    assert!(bid.price >= dec!(0.41));
    assert!(bid.price < ask.price);
    assert!(ask.price <= dec!(0.42));
    // min(100, 1000 / 0.415) clips to 100 shares per side.
    assert_eq!(bid.size, dec!(100));
    assert_eq!(ask.size, dec!(100));

    let quote = engine.active_quote("T").unwrap();
    assert_eq!(quote.ttl, Duration::from_secs(90));
}

// =============================================================================
// S2: upward move fills our ask in paper mode
// =============================================================================

#[test]
fn s2_upward_move_fills_ask() {
    let dir = TempDir::new().unwrap();
    let (mut engine, mut rx) = new_engine(&dir);
    engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");

    engine.handle_event(opening_snapshot("T"));
    drain(&mut engine, &mut rx);
    assert_eq!(engine.fill_count(), 0);

    let ask_price = engine
        .open_orders("T")
        .iter()
        .find(|o| o.side == Side::Sell)
        .unwrap()
        .price;
    assert_eq!(ask_price, dec!(0.42));

    // The market gaps up through our ask.
    engine.handle_event(Event::book_snapshot(
        "T",
        levels(&[(dec!(0.43), dec!(5000)), (dec!(0.42), dec!(7000))]),
        levels(&[(dec!(0.44), dec!(3700)), (dec!(0.45), dec!(4000))]),
    ));
    drain(&mut engine, &mut rx);

    assert_eq!(engine.fill_count(), 1);
    let position = engine.ledger().position("T").unwrap();
    assert_eq!(position.quantity, dec!(-100));
    assert_eq!(position.avg_entry_price, dec!(0.42));
    assert_eq!(position.realized_pnl, Decimal::ZERO);
    assert_eq!(position.entry_side, Some(Side::Sell));
}

// =============================================================================
// S3: partial close realizes proportional P&L
// =============================================================================

#[test]
fn s3_long_position_partial_close() {
    let dir = TempDir::new().unwrap();
    let (mut engine, _rx) = new_engine(&dir);
    engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");

    engine.handle_event(Event::order_fill("ORD_X1", "T", dec!(0.50), dec!(100), Side::Buy));
    engine.handle_event(Event::order_fill("ORD_X2", "T", dec!(0.55), dec!(60), Side::Sell));

    let position = engine.ledger().position("T").unwrap();
    assert_eq!(position.quantity, dec!(40));
    assert_eq!(position.avg_entry_price, dec!(0.50));
    assert_eq!(position.realized_pnl, dec!(3.00));
    assert_eq!(position.num_fills, 2);
    assert_eq!(engine.fill_count(), 2);
}

// =============================================================================
// S4: toxic fill raises the spread multiplier (covered in unit tests of
// the adverse module; here we check the engine feeds the history)
// =============================================================================

#[test]
fn s4_fill_history_feeds_adverse_tracking() {
    let dir = TempDir::new().unwrap();
    let (mut engine, mut rx) = new_engine(&dir);
    engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");

    engine.handle_event(opening_snapshot("T"));
    drain(&mut engine, &mut rx);

    engine.handle_event(Event::order_fill("ORD_F", "T", dec!(0.41), dec!(100), Side::Buy));
    drain(&mut engine, &mut rx);

    // A later price update measures the pending fill-quality record; the
    // wider standing quote after toxic history is asserted in the
    // adverse-selection unit tests.
    engine.handle_event(Event::price_level_update(
        "T",
        levels(&[(dec!(0.40), dec!(7000))]),
        vec![],
    ));
    assert_eq!(engine.fill_count(), 1);
}

// =============================================================================
// S5: TTL expiry cancels and re-quotes
// =============================================================================

#[test]
fn s5_ttl_expiry_requotes() {
    let dir = TempDir::new().unwrap();
    let (mut engine, mut rx) = new_engine(&dir);
    engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");

    engine.handle_event(opening_snapshot("T"));
    drain(&mut engine, &mut rx);

    let before: Vec<String> = engine
        .open_orders("T")
        .iter()
        .map(|o| o.order_id.clone())
        .collect();
    assert_eq!(before.len(), 2);
    let created_at = engine.active_quote("T").unwrap().created_at;

    // Not expired one second in.
    engine.run_ttl_scan(created_at + Duration::from_secs(1));
    let unchanged: Vec<String> = engine
        .open_orders("T")
        .iter()
        .map(|o| o.order_id.clone())
        .collect();
    assert_eq!(before, unchanged);

    // Past the 90 s TTL the quote is cancelled and replaced.
    engine.run_ttl_scan(created_at + Duration::from_secs(91));
    let after: Vec<String> = engine
        .open_orders("T")
        .iter()
        .map(|o| o.order_id.clone())
        .collect();
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|id| !before.contains(id)));
}

// =============================================================================
// S6: restart round-trip through the persisted snapshot
// =============================================================================

#[test]
fn s6_restart_recovers_positions() {
    let dir = TempDir::new().unwrap();

    {
        let (mut engine, _rx) = new_engine(&dir);
        engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");
        engine.handle_event(Event::order_fill("ORD_1", "T", dec!(0.46), dec!(100), Side::Buy));
        engine.handle_event(Event::order_fill("ORD_2", "T", dec!(0.52), dec!(50), Side::Sell));

        let position = engine.ledger().position("T").unwrap();
        assert_eq!(position.quantity, dec!(50));
        assert_eq!(position.avg_entry_price, dec!(0.46));
        assert_eq!(position.realized_pnl, dec!(3.00));

        engine.snapshot_state();
    }

    let restart_time = chrono::Utc::now();
    let (engine, _rx) = new_engine(&dir);
    let position = engine.ledger().position("T").unwrap();
    assert_eq!(position.quantity, dec!(50));
    assert_eq!(position.avg_entry_price, dec!(0.46));
    assert_eq!(position.realized_pnl, dec!(3.00));
    assert_eq!(position.num_fills, 0);
    assert!(position.opened_at >= restart_time - chrono::Duration::seconds(5));
    assert!(position.last_updated >= restart_time - chrono::Duration::seconds(5));
}

// =============================================================================
// Restored state reaches the quoter on the first quote attempt
// =============================================================================

#[test]
fn restored_inventory_shapes_first_quote() {
    let dir = TempDir::new().unwrap();

    {
        let (mut engine, _rx) = new_engine(&dir);
        engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");
        // Build a position close to the cap, then persist it.
        engine.handle_event(Event::order_fill("ORD_1", "T", dec!(0.41), dec!(997), Side::Buy));
        engine.snapshot_state();
    }

    let (mut engine, _rx) = new_engine(&dir);
    engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");
    engine.handle_event(opening_snapshot("T"));

    // Remaining capacity is three dollars, under the minimum clip: the
    // quoter stands aside.
    assert!(engine.open_orders("T").is_empty());
    assert!(engine.active_quote("T").is_none());
}

// =============================================================================
// Requote on quote drift only
// =============================================================================

#[test]
fn identical_book_does_not_churn_orders() {
    let dir = TempDir::new().unwrap();
    let (mut engine, mut rx) = new_engine(&dir);
    engine.register_market("T", "Aston Villa vs Bournemouth", "Villa Win", "mkt", "cond");

    engine.handle_event(opening_snapshot("T"));
    drain(&mut engine, &mut rx);
    let before: Vec<String> = engine
        .open_orders("T")
        .iter()
        .map(|o| o.order_id.clone())
        .collect();

    // The same snapshot again produces the same target prices, so the
    // standing orders survive.
    engine.handle_event(opening_snapshot("T"));
    drain(&mut engine, &mut rx);
    let after: Vec<String> = engine
        .open_orders("T")
        .iter()
        .map(|o| o.order_id.clone())
        .collect();

    assert_eq!(before, after);
}

// =============================================================================
// Shutdown event ends the run loop
// =============================================================================

#[tokio::test]
async fn shutdown_event_stops_the_loop() {
    let dir = TempDir::new().unwrap();
    let (tx, rx) = EventQueue::unbounded();
    let engine = StrategyEngine::new(&test_config(&dir), tx.clone(), None);
    let status = engine.status();

    let task = tokio::spawn(engine.run(rx));
    tx.push(Event::timer_tick());
    tx.push(Event::shutdown("test shutdown"));

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("engine should stop on shutdown")
        .expect("engine task should not panic");

    // Final snapshot was written on the way out.
    assert!(test_config(&dir).paths.state_file.exists());
    let snapshot = status.snapshot();
    assert_eq!(snapshot.open_orders, 0);
}

// =============================================================================
// Observation without registration never trades (engine-level guard)
// =============================================================================

#[test]
fn unregistered_token_never_trades() {
    let dir = TempDir::new().unwrap();
    let (mut engine, mut rx) = new_engine(&dir);

    engine.handle_event(opening_snapshot("U"));
    engine.handle_event(Event::price_level_update(
        "U",
        levels(&[(dec!(0.45), dec!(100))]),
        vec![],
    ));
    drain(&mut engine, &mut rx);

    assert!(engine.book("U").is_some());
    assert!(engine.open_orders("U").is_empty());
    assert_eq!(engine.fill_count(), 0);
}

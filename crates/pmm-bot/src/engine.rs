//! The strategy engine: single consumer of the event queue.
//!
//! All trading state lives here and is mutated by exactly one task. The
//! event loop applies book updates, routes fills into the ledger and the
//! adverse-selection history, and revises quotes through the order
//! manager. Periodic work rides the same loop: a TTL scan at roughly
//! one-second cadence and a once-a-minute maintenance pass (ledger
//! snapshot, post-fill metrics, quote summary, multiplier decay).
//!
//! Outside observers (the status task) read through [`EngineStatus`],
//! which the loop refreshes; nothing else crosses the task boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

use pmm_common::{CancelReason, ConditionId, OrderId, PriceLevel, Side, TokenId, TradingMode};

use crate::book::{OrderBook, DEPTH_LEVELS};
use crate::config::BotConfig;
use crate::events::{
    BookSnapshotPayload, Event, EventKind, EventReceiver, EventSender, OrderFillPayload,
    OrderRejectedPayload, PriceLevelUpdatePayload,
};
use crate::adverse::AdverseSelectionManager;
use crate::ledger::PositionLedger;
use crate::logging::{PriceUpdateRecord, TradingLogger};
use crate::order_manager::{OrderManager, VenueHandle};
use crate::persistence::{PersistedPosition, PersistedState, StatePersistence};
use crate::quoter::{Quoter, QuoterConfig};
use crate::types::{MarketMetadata, Quote};

/// Quotes within this distance of the standing orders are left alone.
const QUOTE_EPSILON: Decimal = dec!(0.001);

/// Cadence of the TTL scan.
const TTL_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence of the snapshot / metrics / decay maintenance pass.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// The standing quote for one token, tracked for TTL expiry and the
/// periodic summary.
#[derive(Debug, Clone)]
pub struct ActiveQuote {
    pub market_name: String,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub mid: Decimal,
    pub spread_bps: f64,
    pub inventory: f64,
    pub ttl: Duration,
    pub created_at: Instant,
}

impl ActiveQuote {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

/// Market context captured at fill time, completed by the maintenance
/// pass once the 30 s and 60 s post-fill mids are known.
#[derive(Debug, Clone)]
#[allow(dead_code)]
struct FillMetrics {
    fill_time: Instant,
    token_id: TokenId,
    order_id: OrderId,
    side: Side,
    fill_price: Decimal,
    mid_at_fill: Option<Decimal>,
    spread_at_fill: Option<Decimal>,
    imbalance_at_fill: Decimal,
    inventory_before: f64,
    inventory_after: f64,
    mid_30s_after: Option<Decimal>,
    mid_60s_after: Option<Decimal>,
    complete: bool,
}

/// Read-only aggregate view for the status task. Always callable; every
/// getter returns zeros until the first refresh.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub position_count: usize,
    pub open_orders: usize,
    pub bid_orders: usize,
    pub ask_orders: usize,
    pub active_markets: usize,
    pub total_fills: u64,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_inventory: Decimal,
    pub average_spread_bps: f64,
}

/// Cloneable handle to the engine's status snapshot.
#[derive(Clone, Default)]
pub struct EngineStatus {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl EngineStatus {
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().clone()
    }
}

struct LastPrice {
    mid: Decimal,
    at: Instant,
}

/// Event dispatcher and owner of all per-token trading state.
pub struct StrategyEngine {
    mode: TradingMode,
    quoter_config: QuoterConfig,

    books: HashMap<TokenId, OrderBook>,
    quoters: HashMap<TokenId, Quoter>,
    metadata: HashMap<TokenId, MarketMetadata>,

    ledger: PositionLedger,
    order_manager: OrderManager,
    as_manager: AdverseSelectionManager,
    persistence: StatePersistence,
    logger: Arc<TradingLogger>,

    active_quotes: HashMap<TokenId, ActiveQuote>,
    pending_fill_metrics: Vec<FillMetrics>,
    last_price: HashMap<TokenId, LastPrice>,

    total_fills: u64,
    total_trades: u64,
    total_volume: Decimal,

    last_ttl_scan: Instant,
    last_maintenance: Instant,
    status: EngineStatus,
}

impl StrategyEngine {
    /// Build the engine and restore the ledger from the persisted state.
    /// Live mode needs a venue handle; paper mode passes `None`.
    pub fn new(config: &BotConfig, events: EventSender, venue: Option<VenueHandle>) -> Self {
        let logger = Arc::new(TradingLogger::new(&config.paths.log_dir));
        let persistence = StatePersistence::new(&config.paths.state_file);
        let restored = persistence.load_state();

        let ledger = PositionLedger::new();
        for (token_id, pos) in &restored.positions {
            ledger.restore(token_id, pos.quantity, pos.avg_cost, pos.realized_pnl);
        }

        let order_manager =
            OrderManager::new(config.mode, events, venue, Some(Arc::clone(&logger)));
        let as_manager = AdverseSelectionManager::new(
            config.adverse.manager_config(config.trading.max_position),
        );

        let now = Instant::now();
        info!(
            mode = %config.mode,
            restored_positions = restored.positions.len(),
            "strategy engine initialized"
        );

        Self {
            mode: config.mode,
            quoter_config: config.trading.quoter_config(),
            books: HashMap::new(),
            quoters: HashMap::new(),
            metadata: HashMap::new(),
            ledger,
            order_manager,
            as_manager,
            persistence,
            logger,
            active_quotes: HashMap::new(),
            pending_fill_metrics: Vec::new(),
            last_price: HashMap::new(),
            total_fills: 0,
            total_trades: restored.total_trades,
            total_volume: restored.total_volume,
            last_ttl_scan: now,
            last_maintenance: now,
            status: EngineStatus::default(),
        }
    }

    /// Register a tradable market: creates its metadata entry and its
    /// quoter. Unregistered tokens stay observation-only.
    pub fn register_market(
        &mut self,
        token_id: &str,
        title: &str,
        outcome: &str,
        market_id: &str,
        condition_id: &str,
    ) {
        self.metadata.insert(
            token_id.to_string(),
            MarketMetadata::new(title, outcome, market_id, condition_id),
        );
        self.quoters
            .entry(token_id.to_string())
            .or_insert_with(|| Quoter::new(self.quoter_config.clone()));
        debug!(token_id, title, outcome, "market registered");
    }

    /// Stamp every metadata entry sharing `condition_id` with the event
    /// end time and propagate it into the affected quoters.
    pub fn set_event_end_time(&mut self, condition_id: &ConditionId, end_time: DateTime<Utc>) {
        for (token_id, metadata) in &mut self.metadata {
            if &metadata.condition_id == condition_id {
                metadata.event_end_time = Some(end_time);
                if let Some(quoter) = self.quoters.get_mut(token_id) {
                    quoter.set_market_close_time(end_time);
                }
                debug!(%token_id, %condition_id, "event end time set");
            }
        }
    }

    /// Open the CSV trace session.
    pub fn start_logging(&self, event_name: &str) -> std::io::Result<()> {
        self.logger.start_session(event_name)
    }

    pub fn status(&self) -> EngineStatus {
        self.status.clone()
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn book(&self, token_id: &str) -> Option<&OrderBook> {
        self.books.get(token_id)
    }

    pub fn active_quote(&self, token_id: &str) -> Option<&ActiveQuote> {
        self.active_quotes.get(token_id)
    }

    pub fn open_orders(&self, token_id: &str) -> Vec<crate::types::Order> {
        self.order_manager.open_orders(token_id)
    }

    pub fn fill_count(&self) -> u64 {
        self.total_fills
    }

    /// Consume the queue until shutdown, then flush state and traces.
    pub async fn run(mut self, mut queue: EventReceiver) {
        info!("strategy engine event loop started");
        while let Some(event) = queue.recv().await {
            let stop = event.is_shutdown();
            self.handle_event(event);
            self.periodic(Instant::now());
            if stop {
                break;
            }
        }
        self.finalize();
    }

    /// Dispatch one event. Handlers are synchronous and bounded; no error
    /// escapes this boundary.
    pub fn handle_event(&mut self, event: Event) {
        match event.kind {
            EventKind::BookSnapshot(payload) => self.handle_book_snapshot(payload),
            EventKind::PriceLevelUpdate(payload) => self.handle_price_update(payload),
            EventKind::OrderFill(payload) => self.handle_order_fill(payload),
            EventKind::OrderRejected(payload) => self.handle_order_rejected(payload),
            EventKind::TimerTick => {}
            EventKind::Shutdown(payload) => {
                info!(reason = %payload.reason, "shutdown event received");
            }
        }
    }

    /// Timed work riding the event loop: TTL scan every second,
    /// maintenance every minute.
    pub fn periodic(&mut self, now: Instant) {
        if now.duration_since(self.last_ttl_scan) >= TTL_SCAN_INTERVAL {
            self.last_ttl_scan = now;
            self.run_ttl_scan(now);
            self.refresh_status();
        }
        if now.duration_since(self.last_maintenance) >= MAINTENANCE_INTERVAL {
            self.last_maintenance = now;
            self.run_maintenance();
        }
    }

    /// Cancel and re-quote every token whose standing quote outlived its
    /// TTL.
    pub fn run_ttl_scan(&mut self, now: Instant) {
        let expired: Vec<TokenId> = self
            .active_quotes
            .iter()
            .filter(|(_, quote)| quote.is_expired(now))
            .map(|(token_id, _)| token_id.clone())
            .collect();

        for token_id in expired {
            let market_id = self.market_id_for(&token_id);
            info!(%token_id, "quote TTL expired, requoting");
            self.order_manager
                .cancel_all_orders(Some(&token_id), &market_id, CancelReason::TtlExpired);
            self.active_quotes.remove(&token_id);
            self.calculate_quotes(&token_id, CancelReason::TtlExpired);
        }
    }

    /// Snapshot, post-fill metrics, quote summary and multiplier decay.
    pub fn run_maintenance(&mut self) {
        self.snapshot_state();
        self.check_pending_fill_metrics(Instant::now());
        self.log_quote_summary();
        self.as_manager.decay();
    }

    fn handle_book_snapshot(&mut self, payload: BookSnapshotPayload) {
        let token_id = payload.token_id.clone();
        let market_name = self.market_name(&token_id);
        debug!(
            %token_id,
            market = %market_name,
            bids = payload.bids.len(),
            asks = payload.asks.len(),
            "book snapshot"
        );

        let mut candidate = OrderBook::new(token_id.clone());
        if !apply_levels(&mut candidate, &payload.bids, &payload.asks) {
            warn!(%token_id, "rejected book snapshot with negative size");
            return;
        }
        if is_crossed(&candidate) {
            warn!(%token_id, "rejected crossed book snapshot");
            return;
        }

        self.books.insert(token_id.clone(), candidate.clone());
        self.order_manager.update_order_book(&token_id, candidate);
        self.calculate_quotes(&token_id, CancelReason::QuoteUpdate);
    }

    fn handle_price_update(&mut self, payload: PriceLevelUpdatePayload) {
        let token_id = payload.token_id.clone();
        let mut candidate = self
            .books
            .get(&token_id)
            .cloned()
            .unwrap_or_else(|| OrderBook::new(token_id.clone()));
        if !apply_levels(&mut candidate, &payload.bids, &payload.asks) {
            warn!(%token_id, "rejected price update with negative size");
            return;
        }
        if is_crossed(&candidate) {
            warn!(%token_id, "rejected crossing price update");
            return;
        }

        self.books.insert(token_id.clone(), candidate.clone());

        if let Some(mid) = candidate.mid() {
            self.as_manager.update_metrics(&token_id, mid);
            self.trace_price_update(&token_id, &candidate, mid);
        }

        self.order_manager.update_order_book(&token_id, candidate);
        self.calculate_quotes(&token_id, CancelReason::QuoteUpdate);
    }

    fn handle_order_fill(&mut self, payload: OrderFillPayload) {
        let OrderFillPayload {
            order_id,
            token_id,
            fill_price,
            filled_size,
            side,
        } = payload;

        let market_name = self.market_name(&token_id);
        info!(
            %order_id,
            market = %market_name,
            %side,
            size = %filled_size,
            price = %fill_price,
            "fill"
        );

        let (mid, spread, imbalance) = match self.books.get(&token_id) {
            Some(book) => (book.mid(), book.spread(), book.imbalance()),
            None => (None, None, Decimal::ZERO),
        };

        self.total_fills += 1;
        self.total_trades += 1;
        self.total_volume += fill_price * filled_size;

        let inventory_before = self
            .quoters
            .get(&token_id)
            .map(|q| q.inventory())
            .unwrap_or_else(|| {
                self.ledger
                    .position(&token_id)
                    .map(|p| p.quantity.to_f64().unwrap_or(0.0))
                    .unwrap_or(0.0)
            });

        let position = self
            .ledger
            .apply_fill(&token_id, filled_size, fill_price, side);

        if let Some(quoter) = self.quoters.get_mut(&token_id) {
            quoter.apply_fill(side, filled_size, fill_price);
        }
        let inventory_after = self
            .quoters
            .get(&token_id)
            .map(|q| q.inventory())
            .unwrap_or_else(|| position.quantity.to_f64().unwrap_or(0.0));

        self.as_manager.record_fill(
            &token_id,
            &order_id,
            side,
            fill_price,
            mid.unwrap_or(fill_price),
            inventory_before,
            inventory_after,
        );

        self.pending_fill_metrics.push(FillMetrics {
            fill_time: Instant::now(),
            token_id: token_id.clone(),
            order_id: order_id.clone(),
            side,
            fill_price,
            mid_at_fill: mid,
            spread_at_fill: spread,
            imbalance_at_fill: imbalance,
            inventory_before,
            inventory_after,
            mid_30s_after: None,
            mid_60s_after: None,
            complete: false,
        });

        info!(
            market = %market_name,
            position = %position.quantity,
            avg_entry = %position.avg_entry_price,
            realized_pnl = %position.realized_pnl,
            "position updated"
        );

        self.logger.log_fill(
            &market_name,
            &order_id,
            &token_id,
            side,
            fill_price,
            filled_size,
            position.realized_pnl,
        );
        self.logger.log_position(&market_name, &token_id, &position);

        self.calculate_quotes(&token_id, CancelReason::QuoteUpdate);
    }

    fn handle_order_rejected(&mut self, payload: OrderRejectedPayload) {
        // No automatic retry; the next quote revision replaces the order.
        warn!(
            order_id = %payload.order_id,
            reason = %payload.reason,
            "order rejected"
        );
    }

    /// Revise the standing quote for one token. Requires registration and
    /// a valid BBO; leaves orders alone when the target prices are within
    /// epsilon of what is already resting.
    fn calculate_quotes(&mut self, token_id: &str, reason: CancelReason) {
        if !self.quoters.contains_key(token_id) {
            return;
        }
        let Some(book) = self.books.get(token_id) else {
            return;
        };
        if !book.has_valid_bbo() {
            debug!(token_id, "no valid BBO, skipping quote");
            return;
        }

        // First quote attempt after a restart copies ledger state in.
        if !self.quoters[token_id].is_restored() {
            let (quantity, avg_cost, realized) = self
                .ledger
                .position(token_id)
                .map(|p| (p.quantity, p.avg_entry_price, p.realized_pnl))
                .unwrap_or((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
            if let Some(quoter) = self.quoters.get_mut(token_id) {
                quoter.restore_state(quantity, avg_cost, realized);
            }
        }

        let inventory = self.quoters[token_id].inventory();
        let buy_multiplier = self
            .as_manager
            .spread_multiplier(token_id, Side::Buy, inventory);
        let sell_multiplier = self
            .as_manager
            .spread_multiplier(token_id, Side::Sell, inventory);
        let spread_multiplier = buy_multiplier.max(sell_multiplier);

        let Some(book) = self.books.get(token_id) else {
            return;
        };
        let metadata = self.metadata.get(token_id);
        let mid = book.mid().unwrap_or_default();
        let spread_bps = spread_bps(book).unwrap_or(0.0);

        let Some(quoter) = self.quoters.get_mut(token_id) else {
            return;
        };
        let Some(quote) = quoter.generate_quote(book, metadata, spread_multiplier) else {
            debug!(token_id, "quoter declined to quote");
            return;
        };
        let quoter_inventory = quoter.inventory();

        let market_name = self.market_name(token_id);
        let market_id = self.market_id_for(token_id);

        let open_orders = self.order_manager.open_orders(token_id);
        let has_matching_bid = open_orders.iter().any(|o| {
            o.side == Side::Buy && (o.price - quote.bid_price).abs() < QUOTE_EPSILON
        });
        let has_matching_ask = open_orders.iter().any(|o| {
            o.side == Side::Sell && (o.price - quote.ask_price).abs() < QUOTE_EPSILON
        });

        if has_matching_bid && has_matching_ask {
            // Orders already at target; keep the standing quote's age for
            // TTL purposes but refresh the observed context.
            if let Some(active) = self.active_quotes.get_mut(token_id) {
                active.mid = mid;
                active.spread_bps = spread_bps;
                active.inventory = quoter_inventory;
            }
            debug!(token_id, "orders already at target prices");
            return;
        }

        self.order_manager
            .cancel_all_orders(Some(token_id), &market_id, reason);

        info!(
            token_id,
            market = %market_name,
            bid = %quote.bid_price,
            bid_size = %quote.bid_size,
            ask = %quote.ask_price,
            ask_size = %quote.ask_size,
            ttl_secs = quote.ttl.as_secs(),
            "placing quote"
        );
        self.order_manager.place_order(
            token_id,
            Side::Buy,
            quote.bid_price,
            quote.bid_size,
            &market_id,
        );
        self.order_manager.place_order(
            token_id,
            Side::Sell,
            quote.ask_price,
            quote.ask_size,
            &market_id,
        );

        self.record_active_quote(
            token_id,
            &market_name,
            &quote,
            mid,
            spread_bps,
            quoter_inventory,
        );
    }

    fn record_active_quote(
        &mut self,
        token_id: &str,
        market_name: &str,
        quote: &Quote,
        mid: Decimal,
        spread_bps: f64,
        inventory: f64,
    ) {
        self.active_quotes.insert(
            token_id.to_string(),
            ActiveQuote {
                market_name: market_name.to_string(),
                bid_price: quote.bid_price,
                ask_price: quote.ask_price,
                mid,
                spread_bps,
                inventory,
                ttl: quote.ttl,
                created_at: quote.created_at,
            },
        );
    }

    /// Persist the ledger plus session totals.
    pub fn snapshot_state(&mut self) {
        let mut state = PersistedState {
            last_session_id: self.logger.session_id().unwrap_or_default(),
            last_updated: Utc::now().timestamp(),
            total_trades: self.total_trades,
            total_volume: self.total_volume,
            total_realized_pnl: self.ledger.total_realized_pnl(),
            positions: HashMap::new(),
        };
        for (token_id, position) in self.ledger.all_positions() {
            state.positions.insert(
                token_id.clone(),
                PersistedPosition {
                    quantity: position.quantity,
                    avg_cost: position.avg_entry_price,
                    realized_pnl: position.realized_pnl,
                },
            );
            let market_name = self.market_name(&token_id);
            self.logger.log_position(&market_name, &token_id, &position);
        }

        if let Err(e) = self.persistence.save_state(&state) {
            error!(error = %e, "state snapshot failed, will retry next interval");
        }
    }

    /// Capture 30 s / 60 s post-fill mids and flag adverse fills.
    fn check_pending_fill_metrics(&mut self, now: Instant) {
        for metrics in &mut self.pending_fill_metrics {
            if metrics.complete {
                continue;
            }
            let Some(mid) = self.books.get(&metrics.token_id).and_then(|b| b.mid()) else {
                continue;
            };
            let elapsed = now.duration_since(metrics.fill_time);

            if elapsed >= Duration::from_secs(30) && metrics.mid_30s_after.is_none() {
                metrics.mid_30s_after = Some(mid);
            }
            if elapsed >= Duration::from_secs(60) {
                metrics.mid_60s_after = Some(mid);
                metrics.complete = true;

                let adverse_move = match metrics.side {
                    Side::Buy => metrics.fill_price - mid,
                    Side::Sell => mid - metrics.fill_price,
                };
                if adverse_move > dec!(0.01) {
                    warn!(
                        token_id = %metrics.token_id,
                        order_id = %metrics.order_id,
                        side = %metrics.side,
                        fill_price = %metrics.fill_price,
                        mid_60s = %mid,
                        adverse_move = %adverse_move,
                        "adverse fill"
                    );
                }
            }
        }
        self.pending_fill_metrics.retain(|m| !m.complete);
    }

    /// Log the five largest positions' standing quotes.
    fn log_quote_summary(&self) {
        if self.active_quotes.is_empty() {
            return;
        }
        let mut quotes: Vec<&ActiveQuote> = self.active_quotes.values().collect();
        quotes.sort_by(|a, b| {
            b.inventory
                .abs()
                .partial_cmp(&a.inventory.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for quote in quotes.iter().take(5) {
            info!(
                market = %quote.market_name,
                bid = %quote.bid_price,
                ask = %quote.ask_price,
                mid = %quote.mid,
                spread_bps = quote.spread_bps,
                inventory = quote.inventory,
                age_secs = quote.created_at.elapsed().as_secs(),
                "quote summary"
            );
        }
    }

    fn trace_price_update(&mut self, token_id: &str, book: &OrderBook, mid: Decimal) {
        let now = Instant::now();
        let (price_change_abs, price_change_pct, seconds_since) =
            match self.last_price.get(token_id) {
                Some(last) if !last.mid.is_zero() => {
                    let change = mid - last.mid;
                    let pct = (change / last.mid * dec!(100)).to_f64().unwrap_or(0.0);
                    (change, pct, now.duration_since(last.at).as_secs_f64())
                }
                _ => (Decimal::ZERO, 0.0, 0.0),
            };
        self.last_price
            .insert(token_id.to_string(), LastPrice { mid, at: now });

        let (market_name, market_id, condition_id, hours) = match self.metadata.get(token_id) {
            Some(meta) => (
                meta.display_name(),
                meta.market_id.clone(),
                meta.condition_id.clone(),
                meta.hours_to_event(Utc::now()).unwrap_or(0.0),
            ),
            None => (token_id.to_string(), String::new(), String::new(), 0.0),
        };

        let bid_volume = book.total_bid_volume(DEPTH_LEVELS);
        let ask_volume = book.total_ask_volume(DEPTH_LEVELS);
        self.logger.log_price_update(&PriceUpdateRecord {
            market_name,
            market_id,
            condition_id,
            token_id: token_id.to_string(),
            mid_price: mid,
            price_change_pct,
            price_change_abs,
            best_bid: book.best_bid().unwrap_or_default(),
            best_ask: book.best_ask().unwrap_or_default(),
            spread: book.spread().unwrap_or_default(),
            spread_bps: spread_bps(book).unwrap_or(0.0),
            bid_volume,
            ask_volume,
            total_volume: bid_volume + ask_volume,
            volume_imbalance: book.imbalance(),
            bid_levels: book.bid_level_count(),
            ask_levels: book.ask_level_count(),
            our_inventory: self
                .quoters
                .get(token_id)
                .map(|q| q.inventory())
                .unwrap_or(0.0),
            time_to_event_hours: hours,
            seconds_since_last_update: seconds_since,
        });
    }

    fn refresh_status(&self) {
        let mut unrealized = Decimal::ZERO;
        for (token_id, position) in self.ledger.all_positions() {
            if let Some(mid) = self.books.get(&token_id).and_then(|b| b.mid()) {
                unrealized += position.unrealized_pnl(mid);
            }
        }

        let spreads: Vec<f64> = self.books.values().filter_map(spread_bps).collect();
        let average_spread_bps = if spreads.is_empty() {
            0.0
        } else {
            spreads.iter().sum::<f64>() / spreads.len() as f64
        };

        *self.status.inner.write() = StatusSnapshot {
            position_count: self.ledger.position_count(),
            open_orders: self.order_manager.open_order_count(),
            bid_orders: self.order_manager.bid_order_count(),
            ask_orders: self.order_manager.ask_order_count(),
            active_markets: self.books.len(),
            total_fills: self.total_fills,
            realized_pnl: self.ledger.total_realized_pnl(),
            unrealized_pnl: unrealized,
            total_inventory: self.ledger.total_inventory(),
            average_spread_bps,
        };
    }

    fn finalize(&mut self) {
        info!("strategy engine stopping");
        self.order_manager
            .cancel_all_orders(None, "shutdown", CancelReason::Shutdown);
        self.snapshot_state();
        self.refresh_status();
        self.logger.end_session();
        info!("strategy engine stopped");
    }

    fn market_name(&self, token_id: &str) -> String {
        self.metadata
            .get(token_id)
            .map(|m| m.display_name())
            .unwrap_or_else(|| token_id.to_string())
    }

    fn market_id_for(&self, token_id: &str) -> String {
        self.metadata
            .get(token_id)
            .map(|m| m.market_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| token_id.to_string())
    }
}

/// Apply snapshot/delta levels; false when any size is negative.
fn apply_levels(book: &mut OrderBook, bids: &[PriceLevel], asks: &[PriceLevel]) -> bool {
    for level in bids.iter().chain(asks) {
        if level.size.is_sign_negative() && !level.size.is_zero() {
            return false;
        }
    }
    for level in bids {
        book.update_bid(level.price, level.size);
    }
    for level in asks {
        book.update_ask(level.price, level.size);
    }
    true
}

fn is_crossed(book: &OrderBook) -> bool {
    match (book.best_bid(), book.best_ask()) {
        (Some(bid), Some(ask)) => bid >= ask,
        _ => false,
    }
}

fn spread_bps(book: &OrderBook) -> Option<f64> {
    let spread = book.spread()?;
    let mid = book.mid()?;
    if mid.is_zero() {
        return None;
    }
    (spread / mid * dec!(10000)).to_f64()
}

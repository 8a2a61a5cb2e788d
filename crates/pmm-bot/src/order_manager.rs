//! Order lifecycle management.
//!
//! The OrderManager sits between the strategy and the venue:
//!
//! - Owns the order registry and the monotonic `ORD_<n>` id counter.
//! - In paper mode, simulates fills against the latest book for each
//!   token: a resting BUY fills when the market ask comes down to it, a
//!   resting SELL when the market bid comes up to it, always at our
//!   price and for the full size.
//! - In live mode, forwards placements and cancels to the venue adapter
//!   as idempotent commands over a channel.
//!
//! Fill events are pushed back onto the event queue rather than handled
//! in place, so the dispatcher observes fills strictly after it recorded
//! the order as open. The queue handle and the optional trade logger are
//! injected at construction; nothing here points back at the engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pmm_common::{CancelReason, OrderId, OrderStatus, Side, TokenId, TradingMode};

use crate::book::OrderBook;
use crate::events::{Event, EventSender};
use crate::logging::TradingLogger;
use crate::types::Order;

/// Idempotent command to the live venue adapter. Retrying a command for
/// an order id the venue has already seen must be a no-op on its side.
#[derive(Debug, Clone)]
pub enum VenueCommand {
    Place(Order),
    Cancel(OrderId),
}

/// Sending half of the venue adapter channel.
#[derive(Clone)]
pub struct VenueHandle {
    tx: mpsc::UnboundedSender<VenueCommand>,
}

impl VenueHandle {
    pub fn new(tx: mpsc::UnboundedSender<VenueCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, command: VenueCommand) {
        if self.tx.send(command).is_err() {
            warn!("venue adapter task is gone, dropping command");
        }
    }
}

/// Spawn the stub venue adapter used until a real placement adapter is
/// wired in. Every placement is surfaced back as an `OrderRejected`
/// event; cancels are acknowledged silently.
pub fn spawn_stub_venue(events: EventSender) -> VenueHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<VenueCommand>();
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                VenueCommand::Place(order) => {
                    warn!(order_id = %order.order_id, "live order placement not implemented");
                    events.push(Event::order_rejected(
                        order.order_id,
                        "live placement not implemented",
                    ));
                }
                VenueCommand::Cancel(order_id) => {
                    warn!(%order_id, "live order cancellation not implemented");
                }
            }
        }
    });
    VenueHandle::new(tx)
}

/// Open-order registry and paper-fill simulator.
pub struct OrderManager {
    mode: TradingMode,
    orders: HashMap<OrderId, Order>,
    /// Latest book per token, for paper-fill checks.
    books: HashMap<TokenId, OrderBook>,
    next_order_id: u64,
    events: EventSender,
    venue: Option<VenueHandle>,
    logger: Option<Arc<TradingLogger>>,
}

impl OrderManager {
    pub fn new(
        mode: TradingMode,
        events: EventSender,
        venue: Option<VenueHandle>,
        logger: Option<Arc<TradingLogger>>,
    ) -> Self {
        info!(%mode, "order manager initialized");
        Self {
            mode,
            orders: HashMap::new(),
            books: HashMap::new(),
            next_order_id: 1,
            events,
            venue,
            logger,
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    /// Register a new open order. Returns its id, unique for the process.
    pub fn place_order(
        &mut self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        market_id: &str,
    ) -> OrderId {
        let order_id = format!("ORD_{}", self.next_order_id);
        self.next_order_id += 1;

        let order = Order {
            order_id: order_id.clone(),
            token_id: token_id.to_string(),
            side,
            price,
            size,
            filled_size: Decimal::ZERO,
            status: OrderStatus::Open,
            created_at: Instant::now(),
        };

        if let Some(logger) = &self.logger {
            logger.log_order_placed(&order, market_id);
        }

        info!(
            mode = %self.mode,
            %order_id,
            token_id,
            %side,
            %price,
            %size,
            "order placed"
        );

        if self.mode == TradingMode::Live {
            if let Some(venue) = &self.venue {
                venue.send(VenueCommand::Place(order.clone()));
            }
        }

        self.orders.insert(order_id.clone(), order);
        order_id
    }

    /// Cancel one order. Returns false for an unknown id.
    pub fn cancel_order(&mut self, order_id: &str, market_id: &str, reason: CancelReason) -> bool {
        let Some(order) = self.orders.get_mut(order_id) else {
            warn!(order_id, "cancel of unknown order");
            return false;
        };
        order.status = OrderStatus::Cancelled;

        if let Some(logger) = &self.logger {
            logger.log_order_cancelled(order, market_id, reason);
        }
        debug!(mode = %self.mode, order_id, %reason, "order cancelled");

        if self.mode == TradingMode::Paper {
            self.orders.remove(order_id);
        } else if let Some(venue) = &self.venue {
            venue.send(VenueCommand::Cancel(order_id.to_string()));
        }
        true
    }

    /// Cancel every open order, optionally restricted to one token.
    /// Returns the number of orders cancelled.
    pub fn cancel_all_orders(
        &mut self,
        token_id: Option<&str>,
        market_id: &str,
        reason: CancelReason,
    ) -> usize {
        let to_cancel: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.is_open() && token_id.is_none_or(|t| o.token_id == t))
            .map(|o| o.order_id.clone())
            .collect();

        for order_id in &to_cancel {
            self.cancel_order(order_id, market_id, reason);
        }
        to_cancel.len()
    }

    /// Store the latest book for a token; in paper mode this is also the
    /// fill trigger.
    pub fn update_order_book(&mut self, token_id: &str, book: OrderBook) {
        self.books.insert(token_id.to_string(), book);
        if self.mode == TradingMode::Paper {
            self.check_for_fills(token_id);
        }
    }

    fn check_for_fills(&mut self, token_id: &str) {
        let Some(book) = self.books.get(token_id) else {
            return;
        };
        let best_bid = book.best_bid();
        let best_ask = book.best_ask();

        let mut fills: Vec<(OrderId, Decimal, Decimal, Side, TokenId)> = Vec::new();
        for order in self.orders.values() {
            if order.token_id != token_id || !order.is_open() {
                continue;
            }
            let crossed = match order.side {
                // Market came down to our bid; we pay our price.
                Side::Buy => best_ask.is_some_and(|ask| ask <= order.price),
                // Market came up to our ask; we receive our price.
                Side::Sell => best_bid.is_some_and(|bid| bid >= order.price),
            };
            if crossed {
                fills.push((
                    order.order_id.clone(),
                    order.price,
                    order.size,
                    order.side,
                    order.token_id.clone(),
                ));
            }
        }

        for (order_id, price, size, side, token) in fills {
            if let Some(order) = self.orders.get_mut(&order_id) {
                order.filled_size = order.size;
                order.status = OrderStatus::Filled;
            }
            info!(%order_id, %side, %size, %price, "paper fill");
            self.events
                .push(Event::order_fill(order_id, token, price, size, side));
        }
    }

    /// Open orders for one token.
    pub fn open_orders(&self, token_id: &str) -> Vec<Order> {
        self.orders
            .values()
            .filter(|o| o.is_open() && o.token_id == token_id)
            .cloned()
            .collect()
    }

    pub fn open_order_count(&self) -> usize {
        self.orders.values().filter(|o| o.is_open()).count()
    }

    pub fn bid_order_count(&self) -> usize {
        self.orders
            .values()
            .filter(|o| o.is_open() && o.side == Side::Buy)
            .count()
    }

    pub fn ask_order_count(&self) -> usize {
        self.orders
            .values()
            .filter(|o| o.is_open() && o.side == Side::Sell)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQueue;
    use crate::events::EventKind;
    use rust_decimal_macros::dec;

    fn paper_manager() -> (OrderManager, crate::events::EventReceiver) {
        let (tx, rx) = EventQueue::unbounded();
        (OrderManager::new(TradingMode::Paper, tx, None, None), rx)
    }

    fn book_with(bid: Decimal, ask: Decimal) -> OrderBook {
        let mut book = OrderBook::new("tok");
        book.update_bid(bid, dec!(1000));
        book.update_ask(ask, dec!(1000));
        book
    }

    // =========================================================================
    // Registry
    // =========================================================================

    #[test]
    fn test_order_ids_are_unique_and_sequential() {
        let (mut om, _rx) = paper_manager();
        let a = om.place_order("tok", Side::Buy, dec!(0.41), dec!(100), "mkt");
        let b = om.place_order("tok", Side::Sell, dec!(0.43), dec!(100), "mkt");
        assert_eq!(a, "ORD_1");
        assert_eq!(b, "ORD_2");
        assert_eq!(om.open_order_count(), 2);
        assert_eq!(om.bid_order_count(), 1);
        assert_eq!(om.ask_order_count(), 1);
    }

    #[test]
    fn test_cancel_unknown_order_returns_false() {
        let (mut om, _rx) = paper_manager();
        assert!(!om.cancel_order("ORD_404", "mkt", CancelReason::Manual));
    }

    #[test]
    fn test_paper_cancel_removes_order() {
        let (mut om, _rx) = paper_manager();
        let id = om.place_order("tok", Side::Buy, dec!(0.41), dec!(100), "mkt");
        assert!(om.cancel_order(&id, "mkt", CancelReason::QuoteUpdate));
        assert_eq!(om.open_order_count(), 0);
        assert!(om.open_orders("tok").is_empty());
    }

    #[test]
    fn test_cancel_all_filters_by_token() {
        let (mut om, _rx) = paper_manager();
        om.place_order("tok_a", Side::Buy, dec!(0.41), dec!(100), "mkt");
        om.place_order("tok_a", Side::Sell, dec!(0.43), dec!(100), "mkt");
        om.place_order("tok_b", Side::Buy, dec!(0.30), dec!(100), "mkt");

        let cancelled = om.cancel_all_orders(Some("tok_a"), "mkt", CancelReason::TtlExpired);
        assert_eq!(cancelled, 2);
        assert_eq!(om.open_order_count(), 1);

        let cancelled = om.cancel_all_orders(None, "mkt", CancelReason::Shutdown);
        assert_eq!(cancelled, 1);
        assert_eq!(om.open_order_count(), 0);
    }

    // =========================================================================
    // Paper fills
    // =========================================================================

    #[test]
    fn test_buy_fills_when_ask_reaches_bid() {
        let (mut om, mut rx) = paper_manager();
        let id = om.place_order("tok", Side::Buy, dec!(0.41), dec!(100), "mkt");

        // Ask still above our bid: no fill.
        om.update_order_book("tok", book_with(dec!(0.40), dec!(0.42)));
        assert!(rx.try_recv().is_none());

        // Ask drops onto our bid: fill at our price, full size.
        om.update_order_book("tok", book_with(dec!(0.39), dec!(0.41)));
        let event = rx.try_recv().expect("fill event");
        match event.kind {
            EventKind::OrderFill(fill) => {
                assert_eq!(fill.order_id, id);
                assert_eq!(fill.fill_price, dec!(0.41));
                assert_eq!(fill.filled_size, dec!(100));
                assert_eq!(fill.side, Side::Buy);
            }
            other => panic!("unexpected event: {}", other),
        }
        assert_eq!(om.open_order_count(), 0);
    }

    #[test]
    fn test_sell_fills_when_bid_reaches_ask() {
        let (mut om, mut rx) = paper_manager();
        let id = om.place_order("tok", Side::Sell, dec!(0.42), dec!(100), "mkt");

        om.update_order_book("tok", book_with(dec!(0.43), dec!(0.44)));
        let event = rx.try_recv().expect("fill event");
        match event.kind {
            EventKind::OrderFill(fill) => {
                assert_eq!(fill.order_id, id);
                assert_eq!(fill.fill_price, dec!(0.42));
                assert_eq!(fill.side, Side::Sell);
            }
            other => panic!("unexpected event: {}", other),
        }
    }

    #[test]
    fn test_filled_order_never_fills_again() {
        let (mut om, mut rx) = paper_manager();
        om.place_order("tok", Side::Sell, dec!(0.42), dec!(100), "mkt");

        om.update_order_book("tok", book_with(dec!(0.43), dec!(0.44)));
        assert!(rx.try_recv().is_some());

        om.update_order_book("tok", book_with(dec!(0.45), dec!(0.46)));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_cancelled_order_never_fills() {
        let (mut om, mut rx) = paper_manager();
        let id = om.place_order("tok", Side::Buy, dec!(0.41), dec!(100), "mkt");
        om.cancel_order(&id, "mkt", CancelReason::QuoteUpdate);

        om.update_order_book("tok", book_with(dec!(0.39), dec!(0.40)));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_fills_only_for_matching_token() {
        let (mut om, mut rx) = paper_manager();
        om.place_order("tok_a", Side::Buy, dec!(0.41), dec!(100), "mkt");

        let mut book = OrderBook::new("tok_b");
        book.update_bid(dec!(0.30), dec!(100));
        book.update_ask(dec!(0.31), dec!(100));
        om.update_order_book("tok_b", book);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_one_sided_book_can_still_fill() {
        let (mut om, mut rx) = paper_manager();
        om.place_order("tok", Side::Sell, dec!(0.42), dec!(100), "mkt");

        // Bid-only book at our ask price triggers the sell.
        let mut book = OrderBook::new("tok");
        book.update_bid(dec!(0.42), dec!(500));
        om.update_order_book("tok", book);
        assert!(rx.try_recv().is_some());
    }
}

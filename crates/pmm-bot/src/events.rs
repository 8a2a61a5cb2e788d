//! Typed market events and the dispatcher queue.
//!
//! Every piece of state in the engine is mutated by exactly one task: the
//! strategy dispatcher. Producers (the venue transport, the timer, the
//! paper-fill simulator) communicate with it only by pushing events onto
//! the queue, which preserves per-producer FIFO ordering.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use pmm_common::{OrderId, PriceLevel, Side, TokenId};

/// A timestamped event consumed by the strategy dispatcher.
#[derive(Debug, Clone)]
pub struct Event {
    /// Wall-clock creation time (user-visible timestamps only; interval
    /// arithmetic inside the engine uses the monotonic clock).
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// The event union.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// Full book replacement for one token.
    BookSnapshot(BookSnapshotPayload),
    /// Incremental level updates; size zero deletes a level.
    PriceLevelUpdate(PriceLevelUpdatePayload),
    /// One of our orders (paper or live) was executed.
    OrderFill(OrderFillPayload),
    /// The venue refused an order.
    OrderRejected(OrderRejectedPayload),
    /// Periodic tick from the timer task, at roughly 1 Hz.
    TimerTick,
    /// Stop the dispatcher.
    Shutdown(ShutdownPayload),
}

#[derive(Debug, Clone)]
pub struct BookSnapshotPayload {
    pub token_id: TokenId,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone)]
pub struct PriceLevelUpdatePayload {
    pub token_id: TokenId,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone)]
pub struct OrderFillPayload {
    pub order_id: OrderId,
    pub token_id: TokenId,
    pub fill_price: Decimal,
    pub filled_size: Decimal,
    pub side: Side,
}

#[derive(Debug, Clone)]
pub struct OrderRejectedPayload {
    pub order_id: OrderId,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ShutdownPayload {
    pub reason: String,
}

impl Event {
    fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn book_snapshot(
        token_id: impl Into<TokenId>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        Self::now(EventKind::BookSnapshot(BookSnapshotPayload {
            token_id: token_id.into(),
            bids,
            asks,
        }))
    }

    pub fn price_level_update(
        token_id: impl Into<TokenId>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        Self::now(EventKind::PriceLevelUpdate(PriceLevelUpdatePayload {
            token_id: token_id.into(),
            bids,
            asks,
        }))
    }

    pub fn order_fill(
        order_id: impl Into<OrderId>,
        token_id: impl Into<TokenId>,
        fill_price: Decimal,
        filled_size: Decimal,
        side: Side,
    ) -> Self {
        Self::now(EventKind::OrderFill(OrderFillPayload {
            order_id: order_id.into(),
            token_id: token_id.into(),
            fill_price,
            filled_size,
            side,
        }))
    }

    pub fn order_rejected(order_id: impl Into<OrderId>, reason: impl Into<String>) -> Self {
        Self::now(EventKind::OrderRejected(OrderRejectedPayload {
            order_id: order_id.into(),
            reason: reason.into(),
        }))
    }

    pub fn timer_tick() -> Self {
        Self::now(EventKind::TimerTick)
    }

    pub fn shutdown(reason: impl Into<String>) -> Self {
        Self::now(EventKind::Shutdown(ShutdownPayload {
            reason: reason.into(),
        }))
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self.kind, EventKind::Shutdown(_))
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::BookSnapshot(p) => write!(f, "BookSnapshot({})", p.token_id),
            EventKind::PriceLevelUpdate(p) => write!(f, "PriceLevelUpdate({})", p.token_id),
            EventKind::OrderFill(p) => write!(
                f,
                "OrderFill({} {} {} @ {})",
                p.order_id, p.side, p.filled_size, p.fill_price
            ),
            EventKind::OrderRejected(p) => write!(f, "OrderRejected({})", p.order_id),
            EventKind::TimerTick => write!(f, "TimerTick"),
            EventKind::Shutdown(p) => write!(f, "Shutdown({})", p.reason),
        }
    }
}

/// Multi-producer, single-consumer event queue.
///
/// Producers hold cloned [`EventSender`] handles; the dispatcher owns the
/// single [`EventReceiver`]. The queue is unbounded, so pushes never block;
/// the consumer suspends only in [`EventReceiver::recv`].
pub struct EventQueue;

impl EventQueue {
    pub fn unbounded() -> (EventSender, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, EventReceiver { rx })
    }
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Push an event. Returns false when the dispatcher is gone.
    pub fn push(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The dispatcher's end of the queue.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    /// Wait for the next event. `None` means every sender was dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking pop, used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

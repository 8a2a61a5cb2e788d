//! Core value types for the trading engine.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use pmm_common::{ConditionId, MarketId, OrderId, OrderStatus, Side, TokenId};

/// A resting limit order in the registry.
#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: OrderId,
    pub token_id: TokenId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub filled_size: Decimal,
    pub status: OrderStatus,
    pub created_at: Instant,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    /// Quantity still resting on the book.
    pub fn remaining_size(&self) -> Decimal {
        self.size - self.filled_size
    }
}

/// A two-sided quote produced by the market maker.
///
/// Invariants: `0.01 <= bid_price < ask_price <= 0.99`; both sizes are
/// strictly positive.
#[derive(Debug, Clone)]
pub struct Quote {
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
    /// How long the quote may stand before it must be refreshed.
    pub ttl: Duration,
    pub created_at: Instant,
}

impl Quote {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

/// Coarse bucket of time-to-event that parameterises quote lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    /// More than an hour to close.
    PreMatchEarly,
    /// 10 to 60 minutes to close.
    PreMatchLate,
    /// Under 10 minutes to close.
    PreMatchCritical,
    /// Past the scheduled close time.
    InPlay,
}

impl MarketPhase {
    /// Quote lifetime for this phase.
    pub fn quote_ttl(&self) -> Duration {
        match self {
            MarketPhase::PreMatchEarly => Duration::from_secs(90),
            MarketPhase::PreMatchLate => Duration::from_secs(45),
            MarketPhase::PreMatchCritical => Duration::from_secs(20),
            MarketPhase::InPlay => Duration::from_secs(3),
        }
    }

    /// How often standing quotes should be revised in this phase.
    pub fn requote_interval(&self) -> Duration {
        match self {
            MarketPhase::PreMatchEarly => Duration::from_secs(45),
            MarketPhase::PreMatchLate => Duration::from_secs(22),
            MarketPhase::PreMatchCritical => Duration::from_secs(7),
            MarketPhase::InPlay => Duration::from_secs(1),
        }
    }
}

impl std::fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketPhase::PreMatchEarly => write!(f, "PRE_MATCH_EARLY"),
            MarketPhase::PreMatchLate => write!(f, "PRE_MATCH_LATE"),
            MarketPhase::PreMatchCritical => write!(f, "PRE_MATCH_CRITICAL"),
            MarketPhase::InPlay => write!(f, "IN_PLAY"),
        }
    }
}

/// TTL applied when a market has no metadata or no known close time.
pub const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(90);

/// Descriptive data for a registered outcome token.
#[derive(Debug, Clone)]
pub struct MarketMetadata {
    /// Event title, e.g. "Aston Villa vs Bournemouth".
    pub title: String,
    /// Outcome label, e.g. "Villa Win".
    pub outcome: String,
    pub market_id: MarketId,
    pub condition_id: ConditionId,
    pub event_end_time: Option<DateTime<Utc>>,
}

impl MarketMetadata {
    pub fn new(
        title: impl Into<String>,
        outcome: impl Into<String>,
        market_id: impl Into<MarketId>,
        condition_id: impl Into<ConditionId>,
    ) -> Self {
        Self {
            title: title.into(),
            outcome: outcome.into(),
            market_id: market_id.into(),
            condition_id: condition_id.into(),
            event_end_time: None,
        }
    }

    /// Human name used in logs and CSV traces.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.title, self.outcome)
    }

    /// Phase at `now`, or `None` when no close time is known.
    pub fn phase_at(&self, now: DateTime<Utc>) -> Option<MarketPhase> {
        let end = self.event_end_time?;
        let remaining = end - now;
        Some(if remaining <= chrono::Duration::zero() {
            MarketPhase::InPlay
        } else if remaining < chrono::Duration::minutes(10) {
            MarketPhase::PreMatchCritical
        } else if remaining <= chrono::Duration::minutes(60) {
            MarketPhase::PreMatchLate
        } else {
            MarketPhase::PreMatchEarly
        })
    }

    pub fn phase(&self) -> Option<MarketPhase> {
        self.phase_at(Utc::now())
    }

    /// Quote TTL for the current phase, falling back to the default.
    pub fn quote_ttl(&self) -> Duration {
        self.phase()
            .map(|p| p.quote_ttl())
            .unwrap_or(DEFAULT_QUOTE_TTL)
    }

    /// Hours until the event closes; `None` when unknown.
    pub fn hours_to_event(&self, now: DateTime<Utc>) -> Option<f64> {
        self.event_end_time
            .map(|end| (end - now).num_seconds() as f64 / 3600.0)
    }
}

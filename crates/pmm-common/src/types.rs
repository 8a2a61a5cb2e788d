//! Primitive domain types for binary-outcome market making.
//!
//! Prices, sizes and P&L values that are stored, compared, persisted or
//! logged use `rust_decimal::Decimal`. Statistical estimates (volatility,
//! spread multipliers) live in f64 inside the strategy crates and are
//! converted at the boundary.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Outcome-token identifier on the venue (opaque; equality and hashing only).
pub type TokenId = String;

/// Order identifier. Synthetic ids have the form `ORD_<n>`.
pub type OrderId = String;

/// Market identifier (a venue condition's market).
pub type MarketId = String;

/// Condition identifier shared by all outcome tokens of one event.
pub type ConditionId = String;

/// Lowest quotable price for a binary outcome token.
pub const PRICE_MIN: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Highest quotable price for a binary outcome token.
pub const PRICE_MAX: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

/// Order side for trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Signed direction of the side: +1 for buys, -1 for sells.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order lifecycle status. Transitions are monotone: OPEN -> FILLED or
/// OPEN -> CANCELLED; terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "OPEN"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Why an order (or a token's whole quote pair) was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    /// Quote revision moved the target prices.
    QuoteUpdate,
    /// Standing quote outlived its TTL.
    TtlExpired,
    /// Inventory cap reached.
    InventoryLimit,
    /// Engine is shutting down.
    Shutdown,
    /// Operator-initiated cancel.
    Manual,
    Unknown,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::QuoteUpdate => write!(f, "QUOTE_UPDATE"),
            CancelReason::TtlExpired => write!(f, "TTL_EXPIRED"),
            CancelReason::InventoryLimit => write!(f, "INVENTORY_LIMIT"),
            CancelReason::Shutdown => write!(f, "SHUTDOWN"),
            CancelReason::Manual => write!(f, "MANUAL"),
            CancelReason::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Execution mode: simulated fills against the live book, or real venue
/// orders through the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn is_paper(&self) -> bool {
        matches!(self, TradingMode::Paper)
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            _ => Err(format!("Unknown trading mode: {}", s)),
        }
    }
}

/// A single level in an order book (price + size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price in USDC (0.00 to 1.00 for binary markets).
    pub price: Decimal,
    /// Quantity available at this price.
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Round a price to the venue tick of $0.01.
pub fn round_to_tick(price: Decimal) -> Decimal {
    price.round_dp(2)
}

/// Round an f64 price to the venue tick and return it as a `Decimal`.
///
/// Returns `None` for non-finite inputs.
pub fn decimal_price(price: f64) -> Option<Decimal> {
    Decimal::from_f64(price).map(|p| p.round_dp(2))
}

/// Clamp a price into the quotable band [0.01, 0.99].
pub fn clamp_to_price_band(price: Decimal) -> Decimal {
    price.max(PRICE_MIN).min(PRICE_MAX)
}

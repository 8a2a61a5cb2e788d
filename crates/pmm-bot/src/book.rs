//! Per-token L2 order book.
//!
//! Maintains sorted price ladders from snapshot and delta updates. The book
//! is single-owner: only the strategy dispatcher mutates it, so there is no
//! locking and no I/O here.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use pmm_common::TokenId;

/// Number of levels summed by the depth and imbalance queries.
pub const DEPTH_LEVELS: usize = 5;

/// In-memory order book state for a single token.
///
/// Bids and asks are price -> size ladders; a size of zero removes the
/// level. All stored sizes are strictly positive.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Token this book belongs to.
    pub token_id: TokenId,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl OrderBook {
    pub fn new(token_id: impl Into<TokenId>) -> Self {
        Self {
            token_id: token_id.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    /// Insert or replace a bid level; size zero removes the level.
    pub fn update_bid(&mut self, price: Decimal, size: Decimal) {
        if size.is_zero() {
            self.bids.remove(&price);
        } else {
            self.bids.insert(price, size);
        }
    }

    /// Insert or replace an ask level; size zero removes the level.
    pub fn update_ask(&mut self, price: Decimal, size: Decimal) {
        if size.is_zero() {
            self.asks.remove(&price);
        } else {
            self.asks.insert(price, size);
        }
    }

    /// Remove every level on both sides.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Highest bid price, if any.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Lowest ask price, if any.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// True when both sides of the book are non-empty.
    pub fn has_valid_bbo(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    /// Midpoint of the BBO. `None` without a valid BBO.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// `best_ask - best_bid`. `None` without a valid BBO.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Sum of the top `levels` bid sizes, best-first.
    pub fn total_bid_volume(&self, levels: usize) -> Decimal {
        self.bids.values().rev().take(levels).copied().sum()
    }

    /// Sum of the top `levels` ask sizes, best-first.
    pub fn total_ask_volume(&self, levels: usize) -> Decimal {
        self.asks.values().take(levels).copied().sum()
    }

    /// Depth imbalance over the top [`DEPTH_LEVELS`] levels.
    ///
    /// `(bid_vol - ask_vol) / (bid_vol + ask_vol)`, in [-1, 1]; zero when
    /// both sides are empty.
    pub fn imbalance(&self) -> Decimal {
        let bid_vol = self.total_bid_volume(DEPTH_LEVELS);
        let ask_vol = self.total_ask_volume(DEPTH_LEVELS);
        let total = bid_vol + ask_vol;

        if total.is_zero() {
            return Decimal::ZERO;
        }

        (bid_vol - ask_vol) / total
    }

    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

//! Position and realized-P&L accounting.
//!
//! The ledger is the single source of truth for per-token positions. All
//! writes happen on the dispatcher task; the status task reads through the
//! same handle, so the map lives behind one reader-writer lock rather than
//! per-token locks.
//!
//! ## Accounting rules
//!
//! For an executed trade `(qty, price, side)` with `signed_qty = +qty` on a
//! buy and `-qty` on a sell:
//!
//! - Same sign as the existing quantity (or flat): weighted-average the
//!   entry price and grow the position.
//! - Opposite sign, smaller than the position: realize
//!   `-signed_qty * (price - avg)` and shrink; entry price unchanged.
//! - Opposite sign, equal or larger: realize `quantity * (price - avg)`,
//!   then the remainder (if any) opens a fresh position at `price`.
//!
//! A flat position always has `avg_entry_price == 0`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use pmm_common::{Side, TokenId};

use crate::book::OrderBook;

/// Position in a single outcome token.
///
/// `quantity > 0` is long (avg_entry_price is the cost basis),
/// `quantity < 0` is short (avg_entry_price is the short entry price).
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Side of the fill that opened the current position.
    pub entry_side: Option<Side>,
    /// Fills applied since the position was opened (zero after a restore).
    pub num_fills: u32,
}

impl Position {
    fn flat(now: DateTime<Utc>) -> Self {
        Self {
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            opened_at: now,
            last_updated: now,
            entry_side: None,
            num_fills: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Notional cost of the position at its entry price.
    pub fn total_cost(&self) -> Decimal {
        self.quantity * self.avg_entry_price
    }

    /// Mark-to-market P&L against `mid`. Zero when flat.
    pub fn unrealized_pnl(&self, mid: Decimal) -> Decimal {
        if self.is_flat() {
            return Decimal::ZERO;
        }
        self.quantity * (mid - self.avg_entry_price)
    }
}

/// Thread-shareable map of per-token positions.
///
/// Cloning the ledger clones the handle, not the data.
#[derive(Clone, Default)]
pub struct PositionLedger {
    positions: Arc<RwLock<HashMap<TokenId, Position>>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an executed trade and return the resulting position.
    pub fn apply_fill(
        &self,
        token_id: &str,
        qty: Decimal,
        price: Decimal,
        side: Side,
    ) -> Position {
        let now = Utc::now();
        let mut positions = self.positions.write();
        let pos = positions
            .entry(token_id.to_string())
            .or_insert_with(|| Position::flat(now));

        let signed_qty = side.sign() * qty;
        let same_direction = pos.quantity.is_zero()
            || (pos.quantity.is_sign_positive() == signed_qty.is_sign_positive());

        if same_direction {
            if pos.quantity.is_zero() {
                pos.opened_at = now;
                pos.entry_side = Some(side);
                pos.num_fills = 0;
            }
            let total = pos.quantity.abs() + signed_qty.abs();
            pos.avg_entry_price =
                (pos.quantity.abs() * pos.avg_entry_price + signed_qty.abs() * price) / total;
            pos.quantity += signed_qty;
        } else if signed_qty.abs() < pos.quantity.abs() {
            // Partial close: realize on the closed slice, entry unchanged.
            pos.realized_pnl += -signed_qty * (price - pos.avg_entry_price);
            pos.quantity += signed_qty;
        } else {
            // Full close, possibly flipping through zero.
            pos.realized_pnl += pos.quantity * (price - pos.avg_entry_price);
            pos.quantity += signed_qty;
            if pos.quantity.is_zero() {
                pos.avg_entry_price = Decimal::ZERO;
                pos.entry_side = None;
            } else {
                pos.avg_entry_price = price;
                pos.entry_side = Some(side);
                pos.opened_at = now;
                pos.num_fills = 0;
            }
        }

        pos.num_fills += 1;
        pos.last_updated = now;
        pos.clone()
    }

    /// Seed a position from persisted state. Open timestamps are not
    /// persisted, so the position reads as opened "now" with zero fills.
    pub fn restore(
        &self,
        token_id: &str,
        quantity: Decimal,
        avg_cost: Decimal,
        realized_pnl: Decimal,
    ) {
        let now = Utc::now();
        let entry_side = if quantity.is_zero() {
            None
        } else if quantity.is_sign_positive() {
            Some(Side::Buy)
        } else {
            Some(Side::Sell)
        };
        self.positions.write().insert(
            token_id.to_string(),
            Position {
                quantity,
                avg_entry_price: if quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    avg_cost
                },
                realized_pnl,
                opened_at: now,
                last_updated: now,
                entry_side,
                num_fills: 0,
            },
        );
    }

    pub fn position(&self, token_id: &str) -> Option<Position> {
        self.positions.read().get(token_id).cloned()
    }

    /// Unrealized P&L for one token against the given book; zero without a
    /// valid BBO or a position.
    pub fn unrealized_pnl(&self, token_id: &str, book: &OrderBook) -> Decimal {
        match (self.positions.read().get(token_id), book.mid()) {
            (Some(pos), Some(mid)) => pos.unrealized_pnl(mid),
            _ => Decimal::ZERO,
        }
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions
            .read()
            .values()
            .map(|p| p.realized_pnl)
            .sum()
    }

    /// Number of tokens with a non-flat position.
    pub fn position_count(&self) -> usize {
        self.positions
            .read()
            .values()
            .filter(|p| !p.is_flat())
            .count()
    }

    /// Absolute sum of all position quantities.
    pub fn total_inventory(&self) -> Decimal {
        self.positions
            .read()
            .values()
            .map(|p| p.quantity.abs())
            .sum()
    }

    /// Copy of every position, for snapshots and audit traces.
    pub fn all_positions(&self) -> Vec<(TokenId, Position)> {
        self.positions
            .read()
            .iter()
            .map(|(token, pos)| (token.clone(), pos.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // =========================================================================
    // Accounting arithmetic
    // =========================================================================

    #[test]
    fn test_open_long() {
        let ledger = PositionLedger::new();
        let pos = ledger.apply_fill("tok", dec!(100), dec!(0.50), Side::Buy);

        assert_eq!(pos.quantity, dec!(100));
        assert_eq!(pos.avg_entry_price, dec!(0.50));
        assert_eq!(pos.realized_pnl, Decimal::ZERO);
        assert_eq!(pos.entry_side, Some(Side::Buy));
        assert_eq!(pos.num_fills, 1);
    }

    #[test]
    fn test_add_to_long_averages_entry() {
        let ledger = PositionLedger::new();
        ledger.apply_fill("tok", dec!(100), dec!(0.40), Side::Buy);
        let pos = ledger.apply_fill("tok", dec!(100), dec!(0.50), Side::Buy);

        assert_eq!(pos.quantity, dec!(200));
        assert_eq!(pos.avg_entry_price, dec!(0.45));
        assert_eq!(pos.num_fills, 2);
    }

    #[test]
    fn test_partial_close_realizes_proportionally() {
        // S3: BUY 100 @ 0.50, then SELL 60 @ 0.55.
        let ledger = PositionLedger::new();
        ledger.apply_fill("tok", dec!(100), dec!(0.50), Side::Buy);
        let pos = ledger.apply_fill("tok", dec!(60), dec!(0.55), Side::Sell);

        assert_eq!(pos.quantity, dec!(40));
        assert_eq!(pos.avg_entry_price, dec!(0.50));
        assert_eq!(pos.realized_pnl, dec!(3.00));
    }

    #[test]
    fn test_full_close_resets_entry() {
        let ledger = PositionLedger::new();
        ledger.apply_fill("tok", dec!(100), dec!(0.50), Side::Buy);
        let pos = ledger.apply_fill("tok", dec!(100), dec!(0.45), Side::Sell);

        assert!(pos.is_flat());
        assert_eq!(pos.avg_entry_price, Decimal::ZERO);
        assert_eq!(pos.realized_pnl, dec!(-5.00));
        assert_eq!(pos.entry_side, None);
    }

    #[test]
    fn test_flip_long_to_short() {
        let ledger = PositionLedger::new();
        ledger.apply_fill("tok", dec!(100), dec!(0.50), Side::Buy);
        let pos = ledger.apply_fill("tok", dec!(150), dec!(0.55), Side::Sell);

        assert_eq!(pos.quantity, dec!(-50));
        assert_eq!(pos.avg_entry_price, dec!(0.55));
        assert_eq!(pos.realized_pnl, dec!(5.00));
        assert_eq!(pos.entry_side, Some(Side::Sell));
        // Flip opened a new position; this fill is its first.
        assert_eq!(pos.num_fills, 1);
    }

    #[test]
    fn test_short_from_flat() {
        let ledger = PositionLedger::new();
        let pos = ledger.apply_fill("tok", dec!(100), dec!(0.42), Side::Sell);

        assert_eq!(pos.quantity, dec!(-100));
        assert_eq!(pos.avg_entry_price, dec!(0.42));
        assert_eq!(pos.realized_pnl, Decimal::ZERO);
        assert_eq!(pos.entry_side, Some(Side::Sell));
    }

    #[test]
    fn test_cover_short_gain() {
        let ledger = PositionLedger::new();
        ledger.apply_fill("tok", dec!(100), dec!(0.50), Side::Sell);
        let pos = ledger.apply_fill("tok", dec!(100), dec!(0.40), Side::Buy);

        // quantity * (price - avg) = -100 * (0.40 - 0.50) = +10
        assert!(pos.is_flat());
        assert_eq!(pos.realized_pnl, dec!(10.00));
    }

    #[test]
    fn test_flat_position_has_zero_entry() {
        let ledger = PositionLedger::new();
        ledger.apply_fill("tok", dec!(50), dec!(0.30), Side::Buy);
        let pos = ledger.apply_fill("tok", dec!(50), dec!(0.30), Side::Sell);
        assert!(pos.is_flat());
        assert_eq!(pos.avg_entry_price, Decimal::ZERO);
    }

    // =========================================================================
    // Queries and aggregates
    // =========================================================================

    #[test]
    fn test_unrealized_pnl_against_book() {
        let ledger = PositionLedger::new();
        ledger.apply_fill("tok", dec!(100), dec!(0.40), Side::Buy);

        let mut book = OrderBook::new("tok");
        book.update_bid(dec!(0.44), dec!(100));
        book.update_ask(dec!(0.46), dec!(100));

        // 100 * (0.45 - 0.40) = 5
        assert_eq!(ledger.unrealized_pnl("tok", &book), dec!(5.00));

        book.clear();
        assert_eq!(ledger.unrealized_pnl("tok", &book), Decimal::ZERO);
    }

    #[test]
    fn test_aggregates() {
        let ledger = PositionLedger::new();
        ledger.apply_fill("a", dec!(100), dec!(0.50), Side::Buy);
        ledger.apply_fill("b", dec!(50), dec!(0.40), Side::Sell);
        ledger.apply_fill("a", dec!(100), dec!(0.55), Side::Sell);

        assert_eq!(ledger.position_count(), 1);
        assert_eq!(ledger.total_inventory(), dec!(50));
        assert_eq!(ledger.total_realized_pnl(), dec!(5.00));
    }

    #[test]
    fn test_restore_reinitializes_timestamps() {
        let ledger = PositionLedger::new();
        ledger.restore("tok", dec!(50), dec!(0.48), dec!(2.5));

        let pos = ledger.position("tok").unwrap();
        assert_eq!(pos.quantity, dec!(50));
        assert_eq!(pos.avg_entry_price, dec!(0.48));
        assert_eq!(pos.realized_pnl, dec!(2.5));
        assert_eq!(pos.num_fills, 0);
        assert_eq!(pos.entry_side, Some(Side::Buy));
    }

    #[test]
    fn test_restore_flat_zeroes_entry() {
        let ledger = PositionLedger::new();
        ledger.restore("tok", Decimal::ZERO, dec!(0.48), dec!(1.0));
        let pos = ledger.position("tok").unwrap();
        assert_eq!(pos.avg_entry_price, Decimal::ZERO);
        assert_eq!(pos.entry_side, None);
    }

    #[test]
    fn test_shared_handle_sees_writes() {
        let ledger = PositionLedger::new();
        let reader = ledger.clone();
        ledger.apply_fill("tok", dec!(10), dec!(0.50), Side::Buy);
        assert_eq!(reader.position("tok").unwrap().quantity, dec!(10));
    }
}

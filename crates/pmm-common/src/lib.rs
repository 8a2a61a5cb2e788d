//! Shared types for the Polymarket market-making bot.
//!
//! This crate contains the primitive domain types used by every other
//! crate in the workspace: order sides, order status, cancel reasons,
//! identifier aliases, and the price-band helpers for binary markets.

pub mod types;

pub use types::*;

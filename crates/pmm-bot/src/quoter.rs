//! Avellaneda-Stoikov style quoter with inventory skew.
//!
//! One `Quoter` exists per registered token. It turns the current book,
//! its own inventory mirror and the adverse-selection spread multiplier
//! into an optional two-sided quote:
//!
//! 1. EWMA volatility estimate from mid-price returns.
//! 2. Reservation prices skewed by normalized inventory:
//!    `r_bid = mid - (q + 1)·γ·σ²`, `r_ask = mid + (q - 1)·γ·σ²`.
//! 3. Half the effective spread (`spread_pct · multiplier · mid`) on each
//!    side, an order-book imbalance nudge, rounding to the venue tick.
//! 4. A risk-adjusted cost floor on the ask while long, relaxed as time
//!    urgency or inventory risk grows.
//! 5. Clipping to the binary price band and refusal to cross the market.
//! 6. Sizing from remaining position capacity, with a minimum clip.
//!
//! Prices and sizes cross the boundary as `Decimal`; the statistical state
//! (volatility, inventory mirror, urgency) is plain f64.

use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tracing::debug;

use pmm_common::{decimal_price, Side};

use crate::book::OrderBook;
use crate::types::{MarketMetadata, Quote, DEFAULT_QUOTE_TTL};

/// Narrowest market spread we are willing to quote into.
const MIN_MARKET_SPREAD: f64 = 0.01;

/// Base profit requirement over cost while long: 1.5% of avg cost.
const BASE_MIN_PROFIT: f64 = 0.015;

/// Volatility estimate bounds.
const VOL_MIN: f64 = 0.01;
const VOL_MAX: f64 = 0.50;

/// Seconds in a trading year used to annualise observed returns.
const ANNUALISATION_SECS: f64 = 252.0 * 86_400.0;

/// Tunable quoter parameters.
#[derive(Debug, Clone)]
pub struct QuoterConfig {
    /// Target spread as a fraction of mid.
    pub spread_pct: f64,
    /// Position cap used for sizing and the cost-floor risk term.
    pub max_position: f64,
    /// Risk aversion γ in the reservation-price skew.
    pub risk_aversion: f64,
    /// Starting volatility before any observations.
    pub initial_volatility: f64,
    /// EWMA decay for the volatility estimate.
    pub ewma_lambda: f64,
}

impl Default for QuoterConfig {
    fn default() -> Self {
        Self {
            spread_pct: 0.02,
            max_position: 1000.0,
            risk_aversion: 0.1,
            initial_volatility: 0.05,
            ewma_lambda: 0.94,
        }
    }
}

/// Per-token quoting state.
#[derive(Debug)]
pub struct Quoter {
    config: QuoterConfig,
    volatility: f64,
    /// Signed inventory in shares, mirroring the ledger.
    inventory: f64,
    /// Notional value of the inventory at its entry price.
    inventory_dollars: f64,
    avg_cost: f64,
    realized_pnl: f64,
    last_mid: f64,
    last_update: Option<Instant>,
    market_close_time: Option<DateTime<Utc>>,
    /// Whether ledger state has been copied in since engine start.
    restored: bool,
}

impl Quoter {
    pub fn new(config: QuoterConfig) -> Self {
        Self {
            volatility: config.initial_volatility,
            config,
            inventory: 0.0,
            inventory_dollars: 0.0,
            avg_cost: 0.0,
            realized_pnl: 0.0,
            last_mid: 0.0,
            last_update: None,
            market_close_time: None,
            restored: false,
        }
    }

    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    pub fn avg_cost(&self) -> f64 {
        self.avg_cost
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    pub fn set_market_close_time(&mut self, close_time: DateTime<Utc>) {
        self.market_close_time = Some(close_time);
    }

    /// Copy ledger state in after a restart. Called lazily on the first
    /// quote attempt, since the ledger load happens before registration.
    pub fn restore_state(&mut self, inventory: Decimal, avg_cost: Decimal, realized_pnl: Decimal) {
        self.inventory = inventory.to_f64().unwrap_or(0.0);
        self.avg_cost = avg_cost.to_f64().unwrap_or(0.0);
        self.realized_pnl = realized_pnl.to_f64().unwrap_or(0.0);
        self.inventory_dollars = self.inventory * self.avg_cost;
        self.restored = true;
    }

    /// Produce a quote for the current book, or `None` when quoting is not
    /// worthwhile (tight market, capacity exhausted, would cross).
    pub fn generate_quote(
        &mut self,
        book: &OrderBook,
        metadata: Option<&MarketMetadata>,
        spread_multiplier: f64,
    ) -> Option<Quote> {
        let mid = book.mid()?.to_f64()?;
        let market_spread = book.spread()?.to_f64()?;
        let best_bid = book.best_bid()?.to_f64()?;
        let best_ask = book.best_ask()?.to_f64()?;

        if market_spread < MIN_MARKET_SPREAD {
            debug!(spread = market_spread, "market spread too tight, not quoting");
            return None;
        }

        let now = Instant::now();
        if self.last_mid > 0.0 {
            if let Some(last) = self.last_update {
                let elapsed = now.duration_since(last).as_secs_f64();
                if elapsed > 0.1 {
                    self.update_volatility(self.last_mid, mid, elapsed);
                }
            }
        }
        self.last_mid = mid;
        self.last_update = Some(now);

        let q_norm = self.inventory / 100.0;
        let gamma = self.config.risk_aversion;
        let sigma_sq = self.volatility * self.volatility;
        let effective_spread = self.config.spread_pct * spread_multiplier * mid;

        let reservation_bid = mid - (q_norm + 1.0) * gamma * sigma_sq;
        let reservation_ask = mid + (q_norm - 1.0) * gamma * sigma_sq;

        let mut our_bid = reservation_bid - effective_spread / 2.0;
        let mut our_ask = reservation_ask + effective_spread / 2.0;

        let imbalance = book.imbalance().to_f64().unwrap_or(0.0);
        let adjustment = (imbalance * 0.005).clamp(-0.005, 0.005);
        our_bid += adjustment;
        our_ask += adjustment;

        our_bid = round_to_cent(our_bid);
        our_ask = round_to_cent(our_ask);

        // Risk-adjusted cost floor while long: never offer out below cost
        // unless urgency demands it.
        if self.inventory > 0.0 && self.avg_cost > 0.0 {
            let inventory_risk = self.inventory_dollars.abs() / self.config.max_position;
            let urgency = self.time_urgency(Utc::now()).max(inventory_risk);
            let min_profit_pct = if urgency > 0.9 {
                // Accept up to a 1% loss to exit.
                -0.01
            } else {
                BASE_MIN_PROFIT * (1.0 - urgency)
            };
            let min_ask = ceil_to_cent(self.avg_cost * (1.0 + min_profit_pct));
            if our_ask < min_ask {
                debug!(
                    ask = our_ask,
                    min_ask,
                    avg_cost = self.avg_cost,
                    urgency,
                    "raising ask to cost floor"
                );
                our_ask = min_ask;
            }
        }

        our_bid = our_bid.clamp(0.01, 0.99);
        our_ask = our_ask.clamp(0.01, 0.99);

        if our_ask <= our_bid {
            debug!(bid = our_bid, ask = our_ask, "quotes collapsed after clipping");
            return None;
        }
        if our_bid >= best_ask || our_ask <= best_bid {
            debug!(
                bid = our_bid,
                ask = our_ask,
                best_bid,
                best_ask,
                "quote would cross the market"
            );
            return None;
        }

        let remaining_capacity = self.config.max_position - self.inventory.abs();
        let quote_size = f64::min(100.0, remaining_capacity / mid);
        if quote_size < 10.0 {
            debug!(remaining = remaining_capacity, "near max position, not quoting");
            return None;
        }

        let ttl = metadata
            .map(|m| m.quote_ttl())
            .unwrap_or(DEFAULT_QUOTE_TTL);

        let size = Decimal::from_f64(quote_size)?.round_dp(2);
        Some(Quote {
            bid_price: decimal_price(our_bid)?,
            bid_size: size,
            ask_price: decimal_price(our_ask)?,
            ask_size: size,
            ttl,
            created_at: now,
        })
    }

    /// Fold one executed fill into the inventory mirror, keeping the same
    /// cost-basis semantics as the ledger.
    pub fn apply_fill(&mut self, side: Side, filled_size: Decimal, fill_price: Decimal) {
        let size = filled_size.to_f64().unwrap_or(0.0);
        let price = fill_price.to_f64().unwrap_or(0.0);
        let old_inventory = self.inventory;

        match side {
            Side::Buy => {
                self.inventory += size;
                if old_inventory < 0.0 {
                    let closing = size.min(-old_inventory);
                    self.realized_pnl += closing * (self.avg_cost - price);
                }
                if self.inventory > 0.0 {
                    if old_inventory <= 0.0 {
                        self.avg_cost = price;
                        self.inventory_dollars = self.inventory * price;
                    } else {
                        self.inventory_dollars += size * price;
                        self.avg_cost = self.inventory_dollars / self.inventory;
                    }
                } else if self.inventory < 0.0 {
                    self.inventory_dollars = self.inventory * self.avg_cost;
                } else {
                    self.inventory_dollars = 0.0;
                    self.avg_cost = 0.0;
                }
            }
            Side::Sell => {
                self.inventory -= size;
                if old_inventory > 0.0 {
                    let closing = size.min(old_inventory);
                    self.realized_pnl += closing * (price - self.avg_cost);
                }
                if self.inventory > 0.0 {
                    self.inventory_dollars = self.inventory * self.avg_cost;
                } else if self.inventory < 0.0 {
                    if old_inventory >= 0.0 {
                        self.avg_cost = price;
                    } else {
                        let total = old_inventory.abs() + size;
                        self.avg_cost =
                            (old_inventory.abs() * self.avg_cost + size * price) / total;
                    }
                    self.inventory_dollars = self.inventory * self.avg_cost;
                } else {
                    self.inventory_dollars = 0.0;
                    self.avg_cost = 0.0;
                }
            }
        }
    }

    /// EWMA update from an observed mid move over `elapsed` seconds.
    pub fn update_volatility(&mut self, old_mid: f64, new_mid: f64, elapsed: f64) {
        if old_mid <= 0.0 || elapsed <= 0.0 {
            return;
        }
        let return_pct = (new_mid - old_mid).abs() / old_mid;
        let observed = return_pct * (ANNUALISATION_SECS / elapsed).sqrt();

        let lambda = self.config.ewma_lambda;
        self.volatility = lambda * self.volatility + (1.0 - lambda) * observed;
        self.volatility = self.volatility.clamp(VOL_MIN, VOL_MAX);
    }

    /// Urgency in [0, 1] from time-to-close: zero beyond 24 hours, linear
    /// ramp inside, one past the close.
    pub fn time_urgency(&self, now: DateTime<Utc>) -> f64 {
        let Some(close) = self.market_close_time else {
            return 0.0;
        };
        let hours_remaining = (close - now).num_seconds() as f64 / 3600.0;
        if hours_remaining < 0.0 {
            return 1.0;
        }
        if hours_remaining > 24.0 {
            return 0.0;
        }
        1.0 - hours_remaining / 24.0
    }
}

fn round_to_cent(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}

fn ceil_to_cent(price: f64) -> f64 {
    (price * 100.0).ceil() / 100.0
}

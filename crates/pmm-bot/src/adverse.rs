//! Adverse-selection tracking and spread-multiplier control.
//!
//! Tracks the quality of our fills per token: how the mid moved in the 5
//! and 30 seconds after each fill, relative to the side we traded. Fills
//! that move more than 0.5% against us within 30 s are toxic and ratchet a
//! persistent per-token spread multiplier up; favourable fills bleed it
//! back down, and a periodic decay pulls every multiplier toward 1.0.
//!
//! The aggregate multiplier handed to the quoter combines four clamped
//! factors: the persistent multiplier, a toxic-flow score over recent
//! completed fills, an inventory-risk score (wider when a fill would add
//! to the position, tighter when it would unwind), and a volume-clock
//! term that widens with the square root of the fill-rate ratio.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, warn};

use pmm_common::{OrderId, Side, TokenId};

/// Quality record for one fill. Price moves are signed relative to our
/// side: negative means the market moved against us.
#[derive(Debug, Clone)]
pub struct FillQualityRecord {
    pub token_id: TokenId,
    pub order_id: OrderId,
    pub side: Side,
    pub fill_price: Decimal,
    pub mid_at_fill: Decimal,
    pub fill_time: Instant,
    pub inventory_before: f64,
    pub inventory_after: f64,
    pub price_move_5s: f64,
    pub price_move_30s: f64,
    pub is_toxic: bool,
    pub completed: bool,
}

/// Sliding-window fill clock for one token.
#[derive(Debug, Clone)]
pub struct VolumeClock {
    fills: VecDeque<Instant>,
    window: Duration,
}

impl VolumeClock {
    pub fn new(window: Duration) -> Self {
        Self {
            fills: VecDeque::new(),
            window,
        }
    }

    pub fn record_fill(&mut self, now: Instant) {
        self.fills.push_back(now);
        let cutoff = now - self.window;
        while self.fills.front().is_some_and(|t| *t < cutoff) {
            self.fills.pop_front();
        }
    }

    /// Fills per second over the window.
    pub fn fill_rate(&self) -> f64 {
        if self.fills.is_empty() {
            return 0.0;
        }
        self.fills.len() as f64 / self.window.as_secs_f64()
    }

    /// Sqrt-dampened multiplier of current rate over baseline. Very quiet
    /// markets (under 10% of baseline) read as lower risk.
    pub fn multiplier(&self, baseline_rate: f64) -> f64 {
        let current_rate = self.fill_rate();
        if current_rate < baseline_rate * 0.1 {
            return 0.8;
        }
        (current_rate / baseline_rate).sqrt()
    }
}

/// Tunable parameters for adverse-selection control.
#[derive(Debug, Clone)]
pub struct AdverseSelectionConfig {
    /// Records kept per token.
    pub max_fill_history: usize,
    /// 30 s move below this is a toxic fill.
    pub toxic_threshold: f64,
    /// Per-minute decay applied to the persistent multipliers.
    pub decay_rate: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    /// Expected fills per second in normal conditions.
    pub baseline_fill_rate: f64,
    /// Volume-clock window.
    pub volume_window: Duration,
    /// Position cap used to normalise inventory risk.
    pub max_position: f64,
}

impl Default for AdverseSelectionConfig {
    fn default() -> Self {
        Self {
            max_fill_history: 50,
            toxic_threshold: -0.005,
            decay_rate: 0.95,
            min_multiplier: 1.0,
            max_multiplier: 3.0,
            baseline_fill_rate: 0.05,
            volume_window: Duration::from_secs(60),
            max_position: 1000.0,
        }
    }
}

/// Component scores behind one aggregate multiplier, for monitoring.
#[derive(Debug, Clone, Copy)]
pub struct AdverseSelectionScores {
    pub toxic_flow_score: f64,
    pub inventory_risk_score: f64,
    pub volume_clock_score: f64,
    pub total_multiplier: f64,
}

/// Per-token adverse-selection state.
pub struct AdverseSelectionManager {
    config: AdverseSelectionConfig,
    fill_history: HashMap<TokenId, VecDeque<FillQualityRecord>>,
    volume_clocks: HashMap<TokenId, VolumeClock>,
    spread_multipliers: HashMap<TokenId, f64>,
}

impl AdverseSelectionManager {
    pub fn new(config: AdverseSelectionConfig) -> Self {
        Self {
            config,
            fill_history: HashMap::new(),
            volume_clocks: HashMap::new(),
            spread_multipliers: HashMap::new(),
        }
    }

    /// Record a fill for later quality measurement.
    pub fn record_fill(
        &mut self,
        token_id: &str,
        order_id: &str,
        side: Side,
        fill_price: Decimal,
        mid_at_fill: Decimal,
        inventory_before: f64,
        inventory_after: f64,
    ) {
        let now = Instant::now();
        let history = self.fill_history.entry(token_id.to_string()).or_default();
        history.push_back(FillQualityRecord {
            token_id: token_id.to_string(),
            order_id: order_id.to_string(),
            side,
            fill_price,
            mid_at_fill,
            fill_time: now,
            inventory_before,
            inventory_after,
            price_move_5s: 0.0,
            price_move_30s: 0.0,
            is_toxic: false,
            completed: false,
        });
        if history.len() > self.config.max_fill_history {
            history.pop_front();
        }

        self.volume_clocks
            .entry(token_id.to_string())
            .or_insert_with(|| VolumeClock::new(self.config.volume_window))
            .record_fill(now);

        debug!(token_id, order_id, %side, %fill_price, "recorded fill for adverse-selection tracking");
    }

    /// Measure pending fill records against the current mid. Called on
    /// every price update for the token.
    pub fn update_metrics(&mut self, token_id: &str, current_mid: Decimal) {
        self.update_metrics_at(token_id, current_mid, Instant::now());
    }

    /// Same as [`update_metrics`], with an explicit "now" for tests.
    pub fn update_metrics_at(&mut self, token_id: &str, current_mid: Decimal, now: Instant) {
        let Some(history) = self.fill_history.get_mut(token_id) else {
            return;
        };
        let mid = current_mid.to_f64().unwrap_or(0.0);

        for record in history.iter_mut() {
            if record.completed {
                continue;
            }
            let mid_at_fill = record.mid_at_fill.to_f64().unwrap_or(0.0);
            if mid_at_fill <= 0.0 {
                record.completed = true;
                continue;
            }
            let elapsed = now.duration_since(record.fill_time);
            let price_change = (mid - mid_at_fill) / mid_at_fill;
            let signed_move = match record.side {
                Side::Buy => price_change,
                Side::Sell => -price_change,
            };

            if elapsed >= Duration::from_secs(5) && record.price_move_5s == 0.0 {
                record.price_move_5s = signed_move;
            }

            if elapsed >= Duration::from_secs(30) {
                record.price_move_30s = signed_move;
                record.is_toxic = signed_move < self.config.toxic_threshold;
                record.completed = true;

                let multiplier = self
                    .spread_multipliers
                    .entry(token_id.to_string())
                    .or_insert(self.config.min_multiplier);
                if record.is_toxic {
                    *multiplier = (*multiplier * 1.2 + 0.1).min(self.config.max_multiplier);
                    warn!(
                        token_id,
                        order_id = %record.order_id,
                        side = %record.side,
                        fill_price = %record.fill_price,
                        move_pct = signed_move * 100.0,
                        multiplier = *multiplier,
                        "toxic fill detected"
                    );
                } else if signed_move > 0.005 {
                    *multiplier = (*multiplier * 0.95).max(self.config.min_multiplier);
                    debug!(
                        token_id,
                        move_pct = signed_move * 100.0,
                        "favourable fill"
                    );
                }
            }
        }
    }

    /// Aggregate multiplier for quoting `side` on `token_id` while holding
    /// `inventory` shares. Always in `[min_multiplier, max_multiplier]`.
    pub fn spread_multiplier(&self, token_id: &str, side: Side, inventory: f64) -> f64 {
        let base = self
            .spread_multipliers
            .get(token_id)
            .copied()
            .unwrap_or(self.config.min_multiplier);
        let toxic = self.toxic_flow_score(token_id);
        let inventory_score = self.inventory_risk_score(side, inventory);
        let volume = self
            .volume_clocks
            .get(token_id)
            .map(|clock| clock.multiplier(self.config.baseline_fill_rate))
            .unwrap_or(1.0);

        (base * toxic * inventory_score * volume)
            .clamp(self.config.min_multiplier, self.config.max_multiplier)
    }

    /// Component breakdown of the aggregate multiplier.
    pub fn scores(&self, token_id: &str, side: Side, inventory: f64) -> AdverseSelectionScores {
        AdverseSelectionScores {
            toxic_flow_score: self.toxic_flow_score(token_id),
            inventory_risk_score: self.inventory_risk_score(side, inventory),
            volume_clock_score: self
                .volume_clocks
                .get(token_id)
                .map(|clock| clock.multiplier(self.config.baseline_fill_rate))
                .unwrap_or(1.0),
            total_multiplier: self.spread_multiplier(token_id, side, inventory),
        }
    }

    /// Pull every persistent multiplier a step back toward 1.0. Called
    /// once per minute by the dispatcher.
    pub fn decay(&mut self) {
        let floor = self.config.min_multiplier;
        let rate = self.config.decay_rate;
        for multiplier in self.spread_multipliers.values_mut() {
            if *multiplier > floor {
                *multiplier = floor + (*multiplier - floor) * rate;
            }
        }
    }

    /// Persistent multiplier for one token (before the per-quote factors).
    pub fn base_multiplier(&self, token_id: &str) -> f64 {
        self.spread_multipliers
            .get(token_id)
            .copied()
            .unwrap_or(self.config.min_multiplier)
    }

    /// Most recent fill-quality records for one token.
    pub fn fill_history(&self, token_id: &str) -> Option<&VecDeque<FillQualityRecord>> {
        self.fill_history.get(token_id)
    }

    fn toxic_flow_score(&self, token_id: &str) -> f64 {
        let Some(history) = self.fill_history.get(token_id) else {
            return 1.0;
        };

        let mut toxic_count = 0usize;
        let mut total_count = 0usize;
        let mut adverse_sum = 0.0;
        for record in history {
            if record.completed {
                total_count += 1;
                if record.is_toxic {
                    toxic_count += 1;
                }
                adverse_sum += record.price_move_30s.min(0.0);
            }
        }
        if total_count == 0 {
            return 1.0;
        }

        let toxic_rate = toxic_count as f64 / total_count as f64;
        let toxic_score = 1.0 + toxic_rate;

        let magnitude_score = (1.0 - (adverse_sum / total_count as f64) * 10.0).clamp(1.0, 2.0);

        toxic_score.max(magnitude_score)
    }

    /// Wider when a fill on `side` would grow the position, tighter when
    /// it would unwind it.
    fn inventory_risk_score(&self, side: Side, inventory: f64) -> f64 {
        let normalized = inventory / self.config.max_position;

        let score = if inventory > 0.0 && side == Side::Sell {
            1.0 + normalized.abs() * 0.5
        } else if inventory < 0.0 && side == Side::Buy {
            1.0 + normalized.abs() * 0.5
        } else if inventory > 0.0 && side == Side::Buy {
            1.0 - normalized.abs() * 0.2
        } else if inventory < 0.0 && side == Side::Sell {
            1.0 - normalized.abs() * 0.2
        } else {
            1.0
        };

        score.clamp(0.8, 1.5)
    }
}

impl Default for AdverseSelectionManager {
    fn default() -> Self {
        Self::new(AdverseSelectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager() -> AdverseSelectionManager {
        AdverseSelectionManager::default()
    }

    fn record_buy(m: &mut AdverseSelectionManager, token: &str, mid: Decimal) {
        m.record_fill(token, "ORD_1", Side::Buy, mid, mid, 0.0, 100.0);
    }

    // =========================================================================
    // Fill quality measurement
    // =========================================================================

    #[test]
    fn test_toxic_fill_raises_multiplier() {
        // S4: BUY at mid 0.50, mid 0.49 thirty seconds later.
        let mut m = manager();
        record_buy(&mut m, "tok", dec!(0.50));

        let later = Instant::now() + Duration::from_secs(31);
        m.update_metrics_at("tok", dec!(0.49), later);

        let record = m.fill_history("tok").unwrap().back().unwrap();
        assert!(record.completed);
        assert!(record.is_toxic);
        assert!((record.price_move_30s - (-0.02)).abs() < 1e-9);
        // 1.0 * 1.2 + 0.1 = 1.30
        assert!((m.base_multiplier("tok") - 1.30).abs() < 1e-9);
    }

    #[test]
    fn test_favourable_fill_lowers_multiplier() {
        let mut m = manager();
        record_buy(&mut m, "tok", dec!(0.50));
        let later = Instant::now() + Duration::from_secs(31);
        m.update_metrics_at("tok", dec!(0.49), later);
        assert!((m.base_multiplier("tok") - 1.30).abs() < 1e-9);

        record_buy(&mut m, "tok", dec!(0.50));
        let later = later + Duration::from_secs(31);
        m.update_metrics_at("tok", dec!(0.52), later);
        // 1.30 * 0.95 = 1.235
        assert!((m.base_multiplier("tok") - 1.235).abs() < 1e-9);
    }

    #[test]
    fn test_sell_side_move_is_negated() {
        let mut m = manager();
        m.record_fill("tok", "ORD_1", Side::Sell, dec!(0.50), dec!(0.50), 0.0, -100.0);

        // Mid rallies after we sold: adverse for a short.
        let later = Instant::now() + Duration::from_secs(31);
        m.update_metrics_at("tok", dec!(0.52), later);

        let record = m.fill_history("tok").unwrap().back().unwrap();
        assert!(record.is_toxic);
        assert!(record.price_move_30s < 0.0);
    }

    #[test]
    fn test_five_second_capture() {
        let mut m = manager();
        record_buy(&mut m, "tok", dec!(0.50));

        let later = Instant::now() + Duration::from_secs(6);
        m.update_metrics_at("tok", dec!(0.51), later);

        let record = m.fill_history("tok").unwrap().back().unwrap();
        assert!(!record.completed);
        assert!((record.price_move_5s - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut m = manager();
        for i in 0..80 {
            m.record_fill(
                "tok",
                &format!("ORD_{}", i),
                Side::Buy,
                dec!(0.50),
                dec!(0.50),
                0.0,
                0.0,
            );
        }
        assert_eq!(m.fill_history("tok").unwrap().len(), 50);
    }

    // =========================================================================
    // Aggregate multiplier
    // =========================================================================

    #[test]
    fn test_multiplier_clamped_to_range() {
        let mut m = manager();
        // Drive the persistent multiplier to the cap with repeated toxic fills.
        let mut later = Instant::now();
        for i in 0..10 {
            m.record_fill(
                "tok",
                &format!("ORD_{}", i),
                Side::Buy,
                dec!(0.50),
                dec!(0.50),
                0.0,
                0.0,
            );
            later += Duration::from_secs(31);
            m.update_metrics_at("tok", dec!(0.40), later);
        }
        assert!((m.base_multiplier("tok") - 3.0).abs() < 1e-9);

        let multiplier = m.spread_multiplier("tok", Side::Sell, 900.0);
        assert!(multiplier >= 1.0);
        assert!(multiplier <= 3.0);
    }

    #[test]
    fn test_unknown_token_is_baseline() {
        let m = manager();
        assert_eq!(m.spread_multiplier("unknown", Side::Buy, 0.0), 1.0);
        let scores = m.scores("unknown", Side::Buy, 0.0);
        assert_eq!(scores.toxic_flow_score, 1.0);
        assert_eq!(scores.volume_clock_score, 1.0);
    }

    #[test]
    fn test_inventory_risk_asymmetry() {
        let m = manager();
        // Long 500/1000: a sell-side fill adds risk, a buy-side fill unwinds.
        let selling = m.inventory_risk_score(Side::Sell, 500.0);
        let buying = m.inventory_risk_score(Side::Buy, 500.0);
        assert!((selling - 1.25).abs() < 1e-9);
        assert!((buying - 0.9).abs() < 1e-9);

        // Symmetric for shorts.
        assert!((m.inventory_risk_score(Side::Buy, -500.0) - 1.25).abs() < 1e-9);
        assert!((m.inventory_risk_score(Side::Sell, -500.0) - 0.9).abs() < 1e-9);

        assert_eq!(m.inventory_risk_score(Side::Buy, 0.0), 1.0);
    }

    #[test]
    fn test_decay_moves_toward_floor() {
        let mut m = manager();
        record_buy(&mut m, "tok", dec!(0.50));
        let later = Instant::now() + Duration::from_secs(31);
        m.update_metrics_at("tok", dec!(0.45), later);

        let before = m.base_multiplier("tok");
        m.decay();
        let after = m.base_multiplier("tok");
        assert!(after < before);
        assert!(after >= 1.0);

        for _ in 0..200 {
            m.decay();
        }
        assert!((m.base_multiplier("tok") - 1.0).abs() < 1e-6);
    }

    // =========================================================================
    // Volume clock
    // =========================================================================

    #[test]
    fn test_volume_clock_rate_and_window() {
        let mut clock = VolumeClock::new(Duration::from_secs(60));
        assert_eq!(clock.fill_rate(), 0.0);

        let start = Instant::now();
        for i in 0..6 {
            clock.record_fill(start + Duration::from_secs(i * 2));
        }
        assert!((clock.fill_rate() - 0.1).abs() < 1e-9);

        // Everything ages out of the window.
        clock.record_fill(start + Duration::from_secs(300));
        assert!((clock.fill_rate() - 1.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_clock_multiplier() {
        let mut clock = VolumeClock::new(Duration::from_secs(60));
        // Quiet market reads as lower risk.
        assert_eq!(clock.multiplier(0.05), 0.8);

        let start = Instant::now();
        // 12 fills in the window: 0.2/s = 4x baseline -> sqrt(4) = 2.
        for i in 0..12 {
            clock.record_fill(start + Duration::from_secs(i));
        }
        assert!((clock.multiplier(0.05) - 2.0).abs() < 1e-9);
    }
}

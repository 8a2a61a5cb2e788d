//! Configuration for pmm-bot.
//!
//! Loaded from a TOML file with defaults for every knob; a handful of CLI
//! flags can override individual fields after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use pmm_common::TradingMode;

use crate::adverse::AdverseSelectionConfig;
use crate::quoter::QuoterConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Trading mode: paper or live.
    pub mode: TradingMode,

    /// Logging level: trace, debug, info, warn, error.
    pub log_level: String,

    /// Human name for the trading session (used in the session log).
    pub session_name: String,

    /// File and directory locations.
    pub paths: PathsConfig,

    /// Quoter parameters.
    pub trading: TradingConfig,

    /// Adverse-selection parameters.
    pub adverse: AdverseConfig,

    /// Markets to register at startup. The venue transport subscribes to
    /// the same token ids.
    pub markets: Vec<MarketEntry>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            log_level: "info".to_string(),
            session_name: "pmm".to_string(),
            paths: PathsConfig::default(),
            trading: TradingConfig::default(),
            adverse: AdverseConfig::default(),
            markets: Vec::new(),
        }
    }
}

/// File-system locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Persisted ledger snapshot.
    pub state_file: PathBuf,
    /// Parent directory for per-session CSV traces.
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("./state.json"),
            log_dir: PathBuf::from("./logs"),
        }
    }
}

/// Quoter parameters, applied to every registered market.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Target spread as a fraction of mid.
    pub spread_pct: f64,
    /// Position cap per token.
    pub max_position: f64,
    /// Risk aversion γ.
    pub risk_aversion: f64,
    /// Initial volatility before any observations.
    pub initial_volatility: f64,
    /// EWMA decay for the volatility estimate.
    pub ewma_lambda: f64,
}

impl Default for TradingConfig {
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

impl TradingConfig {
    pub fn quoter_config(&self) -> QuoterConfig {
        QuoterConfig {
            spread_pct: self.spread_pct,
            max_position: self.max_position,
            risk_aversion: self.risk_aversion,
            initial_volatility: self.initial_volatility,
            ewma_lambda: self.ewma_lambda,
        }
    }
}

/// Adverse-selection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdverseConfig {
    /// Fill-quality records kept per token.
    pub fill_history_cap: usize,
    /// 30 s move below this marks a fill toxic.
    pub toxic_threshold: f64,
    /// Per-minute decay of the persistent multipliers.
    pub decay_rate: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    /// Expected fills per second in normal conditions.
    pub baseline_fill_rate: f64,
    /// Volume-clock window in seconds.
    pub volume_window_secs: u64,
}

impl Default for AdverseConfig {
    fn default() -> Self {
        Self {
            fill_history_cap: 50,
            toxic_threshold: -0.005,
            decay_rate: 0.95,
            min_multiplier: 1.0,
            max_multiplier: 3.0,
            baseline_fill_rate: 0.05,
            volume_window_secs: 60,
        }
    }
}

impl AdverseConfig {
    pub fn manager_config(&self, max_position: f64) -> AdverseSelectionConfig {
        AdverseSelectionConfig {
            max_fill_history: self.fill_history_cap,
            toxic_threshold: self.toxic_threshold,
            decay_rate: self.decay_rate,
            min_multiplier: self.min_multiplier,
            max_multiplier: self.max_multiplier,
            baseline_fill_rate: self.baseline_fill_rate,
            volume_window: Duration::from_secs(self.volume_window_secs),
            max_position,
        }
    }
}

/// One market registration.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketEntry {
    pub token_id: String,
    pub title: String,
    pub outcome: String,
    #[serde(default)]
    pub market_id: String,
    #[serde(default)]
    pub condition_id: String,
    /// RFC-3339 event end time, if known.
    #[serde(default)]
    pub event_end_time: Option<DateTime<Utc>>,
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config file {:?}", path))
    }

    /// Apply CLI overrides on top of the loaded file.
    pub fn apply_cli_overrides(
        &mut self,
        mode: Option<TradingMode>,
        state_file: Option<PathBuf>,
        log_dir: Option<PathBuf>,
    ) {
        if let Some(mode) = mode {
            self.mode = mode;
        }
        if let Some(state_file) = state_file {
            self.paths.state_file = state_file;
        }
        if let Some(log_dir) = log_dir {
            self.paths.log_dir = log_dir;
        }
    }
}

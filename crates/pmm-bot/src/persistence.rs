//! Restartable state snapshots.
//!
//! A single JSON document holds the ledger positions plus session-level
//! totals. Saves replace the whole document atomically (write to a temp
//! file in the same directory, then rename); loads tolerate a missing or
//! corrupt file by starting fresh, so a bad snapshot can never keep the
//! engine from booting.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use pmm_common::TokenId;

/// Errors surfaced by [`StatePersistence::save_state`]. Load failures are
/// tolerated and never surface as errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable form of one position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedPosition {
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
}

/// The persisted document. Timestamps of when a position was opened are
/// deliberately absent; they re-initialize to "now" on restore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub last_session_id: String,
    /// Unix seconds of the last save.
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub total_trades: u64,
    #[serde(default)]
    pub total_volume: Decimal,
    #[serde(default)]
    pub total_realized_pnl: Decimal,
    #[serde(default)]
    pub positions: HashMap<TokenId, PersistedPosition>,
}

/// Atomic JSON snapshot store for [`PersistedState`].
pub struct StatePersistence {
    state_file: PathBuf,
    io_lock: Mutex<()>,
}

impl StatePersistence {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Write the whole document, replacing any previous snapshot.
    pub fn save_state(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let _guard = self.io_lock.lock();

        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.state_file)?;

        debug!(
            path = %self.state_file.display(),
            positions = state.positions.len(),
            total_trades = state.total_trades,
            "state saved"
        );
        Ok(())
    }

    /// Read the last snapshot. Missing file or parse failure yields an
    /// empty state.
    pub fn load_state(&self) -> PersistedState {
        let _guard = self.io_lock.lock();

        let bytes = match fs::read(&self.state_file) {
            Ok(bytes) => bytes,
            Err(_) => {
                info!(
                    path = %self.state_file.display(),
                    "no previous state file, starting fresh"
                );
                return PersistedState::default();
            }
        };

        match serde_json::from_slice::<PersistedState>(&bytes) {
            Ok(state) => {
                info!(
                    path = %self.state_file.display(),
                    positions = state.positions.len(),
                    total_trades = state.total_trades,
                    total_realized_pnl = %state.total_realized_pnl,
                    "restored previous state"
                );
                state
            }
            Err(e) => {
                warn!(
                    path = %self.state_file.display(),
                    error = %e,
                    "state file unreadable, starting fresh"
                );
                PersistedState::default()
            }
        }
    }
}

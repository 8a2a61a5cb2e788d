//! Append-only CSV trade traces.
//!
//! One directory per session (`session_<YYYYMMDD_HHMMSS>`) with a file per
//! concern: orders, fills, positions and price updates. Writes are
//! serialized by an internal mutex and flushed per call so a crash loses
//! at most the row being written. Closing the session is final; reopening
//! is not supported.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, info};

use pmm_common::{CancelReason, Side};

use crate::ledger::Position;
use crate::types::Order;

const ORDERS_HEADER: &str =
    "timestamp,market_id,order_id,token_id,side,price,size,status,cancel_reason";
const FILLS_HEADER: &str = "timestamp,market_id,order_id,token_id,side,fill_price,fill_size,pnl";
const POSITIONS_HEADER: &str = "timestamp,market_id,token_id,position,avg_cost,opened_at,\
last_updated,entry_side,num_fills,total_cost";
const PRICE_UPDATES_HEADER: &str = "timestamp,market_name,market_id,condition_id,token_id,\
mid_price,price_change_pct,price_change_abs,best_bid,best_ask,spread,spread_bps,\
bid_volume_5levels,ask_volume_5levels,total_volume,volume_imbalance,bid_levels_count,\
ask_levels_count,our_inventory,time_to_event_hours,seconds_since_last_update";

/// One row of the price-update trace.
#[derive(Debug, Clone)]
pub struct PriceUpdateRecord {
    pub market_name: String,
    pub market_id: String,
    pub condition_id: String,
    pub token_id: String,
    pub mid_price: Decimal,
    pub price_change_pct: f64,
    pub price_change_abs: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread: Decimal,
    pub spread_bps: f64,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub total_volume: Decimal,
    pub volume_imbalance: Decimal,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub our_inventory: f64,
    pub time_to_event_hours: f64,
    pub seconds_since_last_update: f64,
}

struct SessionFiles {
    session_id: String,
    session_dir: PathBuf,
    started_at: DateTime<Utc>,
    orders: BufWriter<File>,
    fills: BufWriter<File>,
    positions: BufWriter<File>,
    price_updates: BufWriter<File>,
}

/// Structured CSV trace of orders, fills, positions and price updates.
pub struct TradingLogger {
    log_dir: PathBuf,
    session: Mutex<Option<SessionFiles>>,
}

impl TradingLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            session: Mutex::new(None),
        }
    }

    /// Open the session directory and its four CSV streams.
    pub fn start_session(&self, event_name: &str) -> std::io::Result<()> {
        let started_at = Utc::now();
        let session_id = format!("session_{}", started_at.format("%Y%m%d_%H%M%S"));
        let session_dir = self.log_dir.join(&session_id);
        fs::create_dir_all(&session_dir)?;

        let files = SessionFiles {
            orders: open_csv(&session_dir, "orders.csv", ORDERS_HEADER)?,
            fills: open_csv(&session_dir, "fills.csv", FILLS_HEADER)?,
            positions: open_csv(&session_dir, "positions.csv", POSITIONS_HEADER)?,
            price_updates: open_csv(&session_dir, "price_updates.csv", PRICE_UPDATES_HEADER)?,
            session_id: session_id.clone(),
            session_dir,
            started_at,
        };

        info!(session_id, event_name, "trading session started");
        *self.session.lock() = Some(files);
        Ok(())
    }

    /// Flush and close every stream. Further log calls are no-ops.
    pub fn end_session(&self) {
        let Some(mut files) = self.session.lock().take() else {
            return;
        };
        let _ = files.orders.flush();
        let _ = files.fills.flush();
        let _ = files.positions.flush();
        let _ = files.price_updates.flush();

        let duration = Utc::now() - files.started_at;
        info!(
            session_id = files.session_id,
            duration_secs = duration.num_seconds(),
            dir = %files.session_dir.display(),
            "trading session ended"
        );
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.session_id.clone())
    }

    pub fn session_dir(&self) -> Option<PathBuf> {
        self.session.lock().as_ref().map(|s| s.session_dir.clone())
    }

    pub fn log_order_placed(&self, order: &Order, market_id: &str) {
        self.write_order_row(order, market_id, order.status, None);
    }

    pub fn log_order_cancelled(&self, order: &Order, market_id: &str, reason: CancelReason) {
        self.write_order_row(order, market_id, order.status, Some(reason));
    }

    fn write_order_row(
        &self,
        order: &Order,
        market_id: &str,
        status: pmm_common::OrderStatus,
        reason: Option<CancelReason>,
    ) {
        let mut guard = self.session.lock();
        let Some(files) = guard.as_mut() else {
            return;
        };
        let reason = reason.map(|r| r.to_string()).unwrap_or_default();
        let row = format!(
            "{},{},{},{},{},{},{},{},{}",
            timestamp_now(),
            market_id,
            order.order_id,
            order.token_id,
            order.side,
            order.price,
            order.size,
            status,
            reason
        );
        write_row(&mut files.orders, &row, "orders.csv");
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_fill(
        &self,
        market_id: &str,
        order_id: &str,
        token_id: &str,
        side: Side,
        fill_price: Decimal,
        fill_size: Decimal,
        pnl: Decimal,
    ) {
        let mut guard = self.session.lock();
        let Some(files) = guard.as_mut() else {
            return;
        };
        let row = format!(
            "{},{},{},{},{},{},{},{}",
            timestamp_now(),
            market_id,
            order_id,
            token_id,
            side,
            fill_price,
            fill_size,
            pnl
        );
        write_row(&mut files.fills, &row, "fills.csv");
    }

    pub fn log_position(&self, market_id: &str, token_id: &str, position: &Position) {
        let mut guard = self.session.lock();
        let Some(files) = guard.as_mut() else {
            return;
        };
        let entry_side = position
            .entry_side
            .map(|s| s.to_string())
            .unwrap_or_default();
        let row = format!(
            "{},{},{},{},{},{},{},{},{},{}",
            timestamp_now(),
            market_id,
            token_id,
            position.quantity,
            position.avg_entry_price,
            format_timestamp(position.opened_at),
            format_timestamp(position.last_updated),
            entry_side,
            position.num_fills,
            position.total_cost()
        );
        write_row(&mut files.positions, &row, "positions.csv");
    }

    pub fn log_price_update(&self, record: &PriceUpdateRecord) {
        let mut guard = self.session.lock();
        let Some(files) = guard.as_mut() else {
            return;
        };
        let row = format!(
            "{},{},{},{},{},{},{:.4},{},{},{},{},{:.1},{},{},{},{},{},{},{},{:.2},{:.1}",
            timestamp_now(),
            record.market_name,
            record.market_id,
            record.condition_id,
            record.token_id,
            record.mid_price,
            record.price_change_pct,
            record.price_change_abs,
            record.best_bid,
            record.best_ask,
            record.spread,
            record.spread_bps,
            record.bid_volume,
            record.ask_volume,
            record.total_volume,
            record.volume_imbalance,
            record.bid_levels,
            record.ask_levels,
            record.our_inventory,
            record.time_to_event_hours,
            record.seconds_since_last_update
        );
        write_row(&mut files.price_updates, &row, "price_updates.csv");
    }
}

fn open_csv(dir: &Path, name: &str, header: &str) -> std::io::Result<BufWriter<File>> {
    let file = File::create(dir.join(name))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", header)?;
    writer.flush()?;
    Ok(writer)
}

fn write_row(writer: &mut BufWriter<File>, row: &str, file_name: &str) {
    if let Err(e) = writeln!(writer, "{}", row).and_then(|_| writer.flush()) {
        error!(file_name, error = %e, "failed to write trace row");
    }
}

fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

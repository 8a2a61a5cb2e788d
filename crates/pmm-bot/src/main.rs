//! pmm-bot: market maker for Polymarket binary outcome tokens.
//!
//! Usage:
//!   pmm-bot [OPTIONS]
//!
//! Options:
//!   -m, --mode <MODE>       Trading mode: paper, live
//!   -c, --config <FILE>     Config file path (default: config/bot.toml)
//!   --state-file <FILE>     Persisted state path (overrides config)
//!   --log-dir <DIR>         CSV trace directory (overrides config)

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pmm_common::TradingMode;

use pmm_bot::config::BotConfig;
use pmm_bot::engine::StrategyEngine;
use pmm_bot::events::{Event, EventQueue};
use pmm_bot::order_manager::spawn_stub_venue;

/// CLI arguments for pmm-bot.
#[derive(Parser, Debug)]
#[command(name = "pmm-bot")]
#[command(about = "Market maker for Polymarket binary outcome tokens")]
#[command(version)]
struct Args {
    /// Trading mode: paper, live
    #[arg(short, long)]
    mode: Option<TradingMode>,

    /// Config file path
    #[arg(short, long, default_value = "config/bot.toml")]
    config: PathBuf,

    /// Persisted state path (overrides config file)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// CSV trace directory (overrides config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("failed to load config from {:?}", args.config))?
    } else {
        BotConfig::default()
    };
    config.apply_cli_overrides(args.mode, args.state_file, args.log_dir);

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    info!(mode = %config.mode, markets = config.markets.len(), "starting pmm-bot");
    if config.markets.is_empty() {
        warn!("no markets configured; the engine will only observe the feed");
    }

    let (events, queue) = EventQueue::unbounded();

    let venue = match config.mode {
        TradingMode::Live => Some(spawn_stub_venue(events.clone())),
        TradingMode::Paper => None,
    };

    let mut engine = StrategyEngine::new(&config, events.clone(), venue);
    for market in &config.markets {
        engine.register_market(
            &market.token_id,
            &market.title,
            &market.outcome,
            &market.market_id,
            &market.condition_id,
        );
        if let Some(end_time) = market.event_end_time {
            engine.set_event_end_time(&market.condition_id, end_time);
        }
    }
    engine
        .start_logging(&config.session_name)
        .context("failed to open the trading log session")?;

    let status = engine.status();

    // The venue transport holds a clone of `events` and feeds book
    // snapshots, deltas and live fills into the same queue.
    let timer_events = events.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if !timer_events.push(Event::timer_tick()) {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = status.snapshot();
            info!(
                markets = snapshot.active_markets,
                positions = snapshot.position_count,
                orders = snapshot.open_orders,
                fills = snapshot.total_fills,
                realized_pnl = %snapshot.realized_pnl,
                unrealized_pnl = %snapshot.unrealized_pnl,
                "status"
            );
        }
    });

    let engine_task = tokio::spawn(engine.run(queue));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("SIGINT received, shutting down");
    events.push(Event::shutdown("SIGINT"));

    engine_task.await.context("engine task panicked")?;
    info!("goodbye");
    Ok(())
}

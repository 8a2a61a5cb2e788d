//! Market-making engine for Polymarket binary outcome tokens.
//!
//! The bot consumes a streaming order-book feed for a set of subscribed
//! outcome tokens and keeps one bid and one ask resting per token,
//! revising them as the market, its inventory and its fill quality
//! change.
//!
//! ## Modules
//!
//! - `config`: TOML configuration with defaults and CLI overrides
//! - `events`: the typed event union and the dispatcher queue
//! - `book`: per-token L2 order book
//! - `ledger`: positions and realized P&L
//! - `persistence`: restartable JSON snapshots of the ledger
//! - `quoter`: Avellaneda-Stoikov quoting with inventory skew
//! - `adverse`: toxic-fill tracking and spread-multiplier control
//! - `order_manager`: order registry, paper fills, venue adapter
//! - `engine`: the single-consumer event dispatcher
//! - `logging`: per-session CSV traces

pub mod adverse;
pub mod book;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod order_manager;
pub mod persistence;
pub mod quoter;
pub mod types;

pub use adverse::{
    AdverseSelectionConfig, AdverseSelectionManager, AdverseSelectionScores, FillQualityRecord,
    VolumeClock,
};
pub use book::{OrderBook, DEPTH_LEVELS};
pub use config::{AdverseConfig, BotConfig, MarketEntry, PathsConfig, TradingConfig};
pub use engine::{ActiveQuote, EngineStatus, StatusSnapshot, StrategyEngine};
pub use events::{
    BookSnapshotPayload, Event, EventKind, EventQueue, EventReceiver, EventSender,
    OrderFillPayload, OrderRejectedPayload, PriceLevelUpdatePayload, ShutdownPayload,
};
pub use ledger::{Position, PositionLedger};
pub use logging::{PriceUpdateRecord, TradingLogger};
pub use order_manager::{spawn_stub_venue, OrderManager, VenueCommand, VenueHandle};
pub use persistence::{PersistedPosition, PersistedState, PersistenceError, StatePersistence};
pub use quoter::{Quoter, QuoterConfig};
pub use types::{MarketMetadata, MarketPhase, Order, Quote, DEFAULT_QUOTE_TTL};

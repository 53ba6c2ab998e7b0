//! Replay Backtesting Engine
//!
//! Replays a daily closing-price table tick by tick through a rolling-window
//! strategy, a stochastic execution simulator and a cash/holdings ledger.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   FeedMessage    ┌─────────────────────────────────────┐
//! │  TickStream  │ ───────────────▶ │        BacktestOrchestrator         │
//! │  (producer)  │  crossbeam chan  │   (consumer, owns Portfolio)        │
//! └──────────────┘                  └─────────────────────────────────────┘
//!        ▲                                │               │
//!        │                                ▼               ▼
//! ┌──────────────┐                 ┌─────────────┐ ┌──────────────────┐
//! │ PriceTable   │                 │  Strategy   │ │ ExecutionSim     │
//! │ (CSV/memory) │                 │ (intents)   │ │ (receipts)       │
//! └──────────────┘                 └─────────────┘ └────────┬─────────┘
//!                                                           ▼
//!                                                  ┌──────────────────┐
//!                                                  │ Portfolio        │
//!                                                  │ (apply_fill)     │
//!                                                  └──────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - **Clock**: time is the tick timestamp; wall-clock time is never read
//! - **Channel**: FIFO, so the consumer sees ticks in production order
//! - **RNG**: one seed, one `ChaCha8Rng` stream per component

pub mod clock;
pub mod config;
pub mod events;
pub mod execution;
pub mod feed;
pub mod market_data;
pub mod orchestrator;
pub mod portfolio;
pub mod rng;
pub mod session;
pub mod strategy;
pub mod window_strategy;

#[cfg(test)]
mod portfolio_tests;

pub use clock::{Nanos, NANOS_PER_DAY, NANOS_PER_SEC};
pub use config::{ConfigError, SessionConfig};
pub use events::{FeedMessage, FillReceipt, InstrumentId, Price, Shares, Side, Tick, TradeIntent};
pub use execution::{ExecutionConfig, ExecutionError, ExecutionSimulator, FeeSchedule};
pub use feed::{spawn_producer, TickSource, TickStream};
pub use market_data::{
    CsvPriceProvider, InMemoryPriceProvider, MarketDataProvider, PriceRequest, PriceTable,
};
pub use orchestrator::{
    BacktestOrchestrator, OrderFailure, SessionAbort, SessionReport, SessionStats,
};
pub use portfolio::{AppliedFill, LedgerEntry, Portfolio, TradeRejection, ValueSummary};
pub use rng::{RngStream, SimRng};
pub use session::{run_session, run_table};
pub use strategy::{RollingWindow, Strategy};
pub use window_strategy::{
    RollingWindowStrategy, StrategyConfig, StrategyStats, TradeDecision, ValueWindowWarmup,
};

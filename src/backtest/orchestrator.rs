//! Backtest Orchestrator
//!
//! The consumer side of a session. Drains `FeedMessage`s from the channel one
//! at a time, applies each tick to the ledger and the strategy, executes the
//! resulting intents through the simulator in a shuffled order, and books the
//! receipts that survive validation.
//!
//! # Ownership
//!
//! The orchestrator exclusively owns the `Portfolio` and the
//! `ExecutionSimulator`; the strategy is borrowed for the duration of `run`.
//! Nothing is shared with the producer thread except the channel, so there is
//! no locking.
//!
//! # Termination
//!
//! The loop ends on `EndOfStream`. A producer hang-up without the sentinel, or
//! a panic while processing a tick, ends the session early. In every case the
//! final summary is logged exactly once and returned in the `SessionReport`.

use crate::backtest::clock::Nanos;
use crate::backtest::events::{FeedMessage, Tick, TradeIntent};
use crate::backtest::execution::{ExecutionError, ExecutionSimulator};
use crate::backtest::portfolio::{AppliedFill, Portfolio, TradeRejection, ValueSummary};
use crate::backtest::rng::SimRng;
use crate::backtest::strategy::Strategy;
use crossbeam::channel::Receiver;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

// =============================================================================
// ERRORS
// =============================================================================

/// Why an intent did not change the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderFailure {
    /// The simulator produced no receipt.
    Execution(ExecutionError),
    /// The receipt failed ledger validation.
    Rejected(TradeRejection),
}

impl fmt::Display for OrderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderFailure::Execution(e) => write!(f, "execution failed: {}", e),
            OrderFailure::Rejected(e) => write!(f, "rejected: {}", e),
        }
    }
}

impl std::error::Error for OrderFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrderFailure::Execution(e) => Some(e),
            OrderFailure::Rejected(e) => Some(e),
        }
    }
}

impl From<ExecutionError> for OrderFailure {
    fn from(e: ExecutionError) -> Self {
        OrderFailure::Execution(e)
    }
}

impl From<TradeRejection> for OrderFailure {
    fn from(e: TradeRejection) -> Self {
        OrderFailure::Rejected(e)
    }
}

/// Session ended before the sentinel arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAbort {
    /// Channel closed without `EndOfStream`.
    ProducerDisconnected { ticks_processed: u64 },
    /// Processing a tick panicked.
    ConsumerPanic { message: String },
}

impl fmt::Display for SessionAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionAbort::ProducerDisconnected { ticks_processed } => write!(
                f,
                "tick producer disconnected without end-of-stream after {} ticks",
                ticks_processed
            ),
            SessionAbort::ConsumerPanic { message } => {
                write!(f, "consumer panicked: {}", message)
            }
        }
    }
}

impl std::error::Error for SessionAbort {}

// =============================================================================
// STATS / REPORT
// =============================================================================

/// Counters accumulated over a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub ticks_processed: u64,
    /// Observations skipped: non-finite or undatable upstream, non-finite on arrival.
    pub market_data_gaps: u64,
    pub orders_proposed: u64,
    pub orders_filled: u64,
    /// Dropped by the simulator.
    pub orders_failed: u64,
    /// Refused by ledger validation.
    pub orders_rejected: u64,
    pub liquidations_clipped: u64,
    pub fees_paid: f64,
}

/// Outcome of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub strategy: String,
    pub final_summary: ValueSummary,
    pub stats: SessionStats,
    /// Set when the session ended without the sentinel.
    pub aborted: Option<String>,
}

impl SessionReport {
    pub fn completed(&self) -> bool {
        self.aborted.is_none()
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

pub struct BacktestOrchestrator {
    portfolio: Portfolio,
    executor: ExecutionSimulator,
    order_rng: SimRng,
    stats: SessionStats,
    last_time: Option<Nanos>,
    summary_emitted: bool,
}

impl BacktestOrchestrator {
    pub fn new(portfolio: Portfolio, executor: ExecutionSimulator, order_rng: SimRng) -> Self {
        Self {
            portfolio,
            executor,
            order_rng,
            stats: SessionStats::default(),
            last_time: None,
            summary_emitted: false,
        }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Mutable ledger access for seeding positions before `run`.
    pub fn portfolio_mut(&mut self) -> &mut Portfolio {
        &mut self.portfolio
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Count observations the producer dropped before they reached the channel.
    pub fn record_upstream_gaps(&mut self, gaps: usize) {
        self.stats.market_data_gaps += gaps as u64;
    }

    /// Timestamp of the last tick processed.
    pub fn last_time(&self) -> Option<Nanos> {
        self.last_time
    }

    /// Drain `rx` until the sentinel (or an abort) and return the report.
    pub fn run(&mut self, rx: &Receiver<FeedMessage>, strategy: &mut dyn Strategy) -> SessionReport {
        tracing::info!(
            strategy = strategy.name(),
            starting_cash = self.portfolio.cash(),
            "Starting backtest session"
        );

        let mut aborted = None;
        loop {
            let message = match rx.recv() {
                Ok(message) => message,
                Err(_) => {
                    aborted = Some(SessionAbort::ProducerDisconnected {
                        ticks_processed: self.stats.ticks_processed,
                    });
                    break;
                }
            };

            let tick = match message {
                FeedMessage::EndOfStream => break,
                FeedMessage::Tick(tick) => tick,
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.process_tick(&tick, &mut *strategy);
            }));
            if let Err(payload) = outcome {
                aborted = Some(SessionAbort::ConsumerPanic {
                    message: panic_message(payload.as_ref()),
                });
                break;
            }
        }

        if let Some(reason) = &aborted {
            tracing::error!(reason = %reason, "Session aborted");
        }
        self.finish(strategy.name(), aborted)
    }

    /// Apply one tick: price update, strategy decision, order execution.
    ///
    /// Returns the number of intents executed (successful or not).
    pub fn process_tick(&mut self, tick: &Tick, strategy: &mut dyn Strategy) -> usize {
        if !tick.price.is_finite() {
            self.stats.market_data_gaps += 1;
            tracing::debug!(tick = %tick, "Skipping non-finite tick");
            return 0;
        }

        self.stats.ticks_processed += 1;
        self.last_time = Some(tick.time);

        self.portfolio.update_price(&tick.instrument, tick.price);
        strategy.on_price(&tick.instrument, tick.price);

        let mut intents = strategy.generate_orders(tick.time, &self.portfolio);
        if intents.is_empty() {
            return 0;
        }

        let count = intents.len();
        self.stats.orders_proposed += count as u64;
        intents.shuffle(self.order_rng.rng());

        for intent in &intents {
            // Failures are logged inside; the batch continues
            let _ = self.process_intent(intent);
        }

        tracing::info!("{}", self.portfolio.value_summary(Some(tick.time)));
        count
    }

    /// Execute one intent and book the receipt if it validates.
    pub fn process_intent(&mut self, intent: &TradeIntent) -> Result<AppliedFill, OrderFailure> {
        let result = self
            .executor
            .execute(intent)
            .map_err(OrderFailure::from)
            .and_then(|receipt| {
                self.portfolio
                    .apply_fill(&receipt, self.executor.fee_schedule())
                    .map_err(OrderFailure::from)
            });

        match &result {
            Ok(fill) => {
                self.stats.orders_filled += 1;
                self.stats.fees_paid += fill.fee;
                if fill.clipped {
                    self.stats.liquidations_clipped += 1;
                }
                tracing::debug!(
                    instrument = %fill.instrument,
                    fill_price = fill.fill_price,
                    shares = fill.share_delta,
                    fee = fill.fee,
                    clipped = fill.clipped,
                    cash_after = fill.cash_after,
                    "Trade executed"
                );
            }
            Err(failure) => {
                match failure {
                    OrderFailure::Execution(_) => self.stats.orders_failed += 1,
                    OrderFailure::Rejected(_) => self.stats.orders_rejected += 1,
                }
                tracing::error!(reason = %failure, "{} failed: {}", intent.side(), intent);
            }
        }
        result
    }

    /// Final valuation, logged once per session.
    fn finish(&mut self, strategy: &str, aborted: Option<SessionAbort>) -> SessionReport {
        let final_summary = self.portfolio.value_summary(self.last_time);
        if !self.summary_emitted {
            self.summary_emitted = true;
            tracing::info!(
                ticks = self.stats.ticks_processed,
                filled = self.stats.orders_filled,
                failed = self.stats.orders_failed,
                rejected = self.stats.orders_rejected,
                fees = self.stats.fees_paid,
                "Final: {}",
                final_summary
            );
        }
        SessionReport {
            strategy: strategy.to_string(),
            final_summary,
            stats: self.stats.clone(),
            aborted: aborted.map(|a| a.to_string()),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

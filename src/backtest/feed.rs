//! Tick Stream
//!
//! Single-pass replay of a historical price table. Dates are replayed in
//! chronological order; within a date the instrument order is reshuffled so no
//! instrument is systematically seen first. The stream ends with exactly one
//! `FeedMessage::EndOfStream`.

use crate::backtest::clock::date_to_nanos;
use crate::backtest::events::{FeedMessage, Tick};
use crate::backtest::market_data::PriceTable;
use crate::backtest::rng::SimRng;
use crossbeam::channel::Sender;
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};

/// Trait for single-pass tick sources.
///
/// There is no `reset`: once `EndOfStream` has been handed out the source is
/// exhausted and only returns `None`.
pub trait TickSource: Send {
    /// Next tick, then `EndOfStream` once, then `None` forever.
    fn next_message(&mut self) -> Option<FeedMessage>;

    /// Number of ticks remaining (if known), excluding the sentinel.
    fn remaining(&self) -> Option<usize> {
        None
    }

    /// Source identifier for logging/diagnostics.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Tick stream built from a `PriceTable`.
#[derive(Debug)]
pub struct TickStream {
    ticks: VecDeque<Tick>,
    sentinel_sent: bool,
    dropped: usize,
    name: String,
}

impl TickStream {
    /// Flatten `table` into ticks, shuffling instruments independently per date.
    pub fn from_table(table: &PriceTable, rng: &mut SimRng) -> Self {
        let instruments = table.instruments();
        let mut ticks = VecDeque::with_capacity(table.observation_count());
        let mut dropped = 0usize;
        let mut order: Vec<usize> = (0..instruments.len()).collect();

        for (date, prices) in table.rows() {
            let Some(time) = date_to_nanos(date) else {
                let skipped = prices.iter().filter(|p| p.is_finite()).count();
                tracing::warn!(%date, skipped, "Date outside timestamp range, skipping row");
                dropped += skipped;
                continue;
            };
            order.shuffle(rng.rng());
            for &col in &order {
                let price = prices[col];
                if !price.is_finite() {
                    dropped += 1;
                    continue;
                }
                ticks.push_back(Tick::new(time, instruments[col].clone(), price));
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, "Dropped non-finite observations");
        }

        Self {
            ticks,
            sentinel_sent: false,
            dropped,
            name: "price_table".into(),
        }
    }

    /// Stream over pre-built ticks, replayed exactly in the given order.
    pub fn from_ticks(name: impl Into<String>, ticks: Vec<Tick>) -> Self {
        let mut dropped = 0usize;
        let ticks: VecDeque<Tick> = ticks
            .into_iter()
            .filter(|t| {
                let keep = t.price.is_finite();
                if !keep {
                    dropped += 1;
                }
                keep
            })
            .collect();
        Self {
            ticks,
            sentinel_sent: false,
            dropped,
            name: name.into(),
        }
    }

    /// Observations discarded for a non-finite price or an unrepresentable date.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_exhausted(&self) -> bool {
        self.sentinel_sent
    }
}

impl TickSource for TickStream {
    fn next_message(&mut self) -> Option<FeedMessage> {
        if let Some(tick) = self.ticks.pop_front() {
            return Some(FeedMessage::Tick(tick));
        }
        if self.sentinel_sent {
            return None;
        }
        self.sentinel_sent = true;
        Some(FeedMessage::EndOfStream)
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.ticks.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Iterator for TickStream {
    type Item = FeedMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message()
    }
}

/// Drain `source` into `tx` on a dedicated thread.
///
/// Returns the number of messages sent, sentinel included. The producer stops
/// early if the consumer hangs up.
pub fn spawn_producer<S>(mut source: S, tx: Sender<FeedMessage>) -> std::io::Result<JoinHandle<usize>>
where
    S: TickSource + 'static,
{
    thread::Builder::new()
        .name("tick-producer".into())
        .spawn(move || {
            let mut sent = 0usize;
            tracing::debug!(source = source.name(), remaining = ?source.remaining(), "Producer started");
            while let Some(message) = source.next_message() {
                if tx.send(message).is_err() {
                    tracing::warn!(sent, "Consumer disconnected, producer stopping");
                    break;
                }
                sent += 1;
            }
            tracing::debug!(sent, "Producer finished");
            sent
        })
}

//! Portfolio Ledger
//!
//! Authoritative cash and per-instrument state for a session.
//!
//! # Invariants
//!
//! 1. **Valuation**: `total_value = cash + Σ(shares × last_price)`
//! 2. **Cash Price**: the cash entry is always priced at exactly 1.0
//! 3. **No Shorts**: held shares never go negative; oversized sells are clipped
//! 4. **Solvency**: a fill that would leave cash below zero is rejected
//!
//! State only changes through two primitives: `update_price` (market data) and
//! `apply_fill` (validated trades). A fill never touches the tracked price.

use crate::backtest::clock::{nanos_to_date, Nanos};
use crate::backtest::events::{FillReceipt, InstrumentId, Price, Shares};
use crate::backtest::execution::FeeSchedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Price of the cash entry.
pub const CASH_PRICE: Price = 1.0;

/// Per-instrument ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Last observed price.
    pub price: Price,
    /// Shares held (cash balance for the cash entry).
    pub shares: Shares,
    /// Number of price observations applied.
    pub update_count: u64,
}

impl LedgerEntry {
    pub fn value(&self) -> f64 {
        self.shares * self.price
    }
}

/// Why a fill was not applied. The ledger is untouched in every case.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeRejection {
    /// No price has ever been observed for the instrument.
    UnknownInstrument { instrument: InstrumentId },
    /// Cash after the trade would be negative.
    InsufficientFunds { required: f64, available: f64 },
    /// After clipping a sell to the holding, the fee would eat the proceeds.
    FeeExceedsNotional { fee: f64, notional: f64 },
}

impl fmt::Display for TradeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeRejection::UnknownInstrument { instrument } => {
                write!(f, "unknown instrument {}", instrument)
            }
            TradeRejection::InsufficientFunds { required, available } => write!(
                f,
                "insufficient funds: requires {:.2}, available {:.2}",
                required, available
            ),
            TradeRejection::FeeExceedsNotional { fee, notional } => write!(
                f,
                "fee {:.2} exceeds clipped notional {:.2}",
                fee, notional
            ),
        }
    }
}

impl std::error::Error for TradeRejection {}

/// A fill as it was actually booked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFill {
    pub instrument: InstrumentId,
    pub fill_price: Price,
    /// Booked delta (differs from the receipt when clipped).
    pub share_delta: Shares,
    /// Booked fee (recomputed when clipped).
    pub fee: f64,
    /// The sell was larger than the holding and was cut down to a liquidation.
    pub clipped: bool,
    pub cash_after: f64,
}

/// Point-in-time valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSummary {
    pub time: Option<Nanos>,
    pub stock_value: f64,
    pub cash: f64,
    pub total_value: f64,
}

impl fmt::Display for ValueSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time {
            Some(t) => write!(f, "{}", nanos_to_date(t))?,
            None => write!(f, "-")?,
        }
        write!(
            f,
            " : Stock value: {:.2}, Cash: {:.2}, Total {:.2}",
            self.stock_value, self.cash, self.total_value
        )
    }
}

/// Cash plus holdings, keyed by instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    cash: LedgerEntry,
    holdings: BTreeMap<InstrumentId, LedgerEntry>,
}

impl Portfolio {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            cash: LedgerEntry {
                price: CASH_PRICE,
                shares: starting_cash,
                update_count: 1,
            },
            holdings: BTreeMap::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn cash(&self) -> f64 {
        self.cash.shares
    }

    pub fn cash_entry(&self) -> &LedgerEntry {
        &self.cash
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.holdings.contains_key(instrument)
    }

    pub fn entry(&self, instrument: &str) -> Option<&LedgerEntry> {
        self.holdings.get(instrument)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&InstrumentId, &LedgerEntry)> {
        self.holdings.iter()
    }

    pub fn price(&self, instrument: &str) -> Option<Price> {
        self.holdings.get(instrument).map(|e| e.price)
    }

    /// Shares held; zero for instruments never seen.
    pub fn shares(&self, instrument: &str) -> Shares {
        self.holdings.get(instrument).map_or(0.0, |e| e.shares)
    }

    /// Price observations applied; zero for instruments never seen.
    pub fn update_count(&self, instrument: &str) -> u64 {
        self.holdings.get(instrument).map_or(0, |e| e.update_count)
    }

    /// Market value of one position at its last price.
    pub fn position_value(&self, instrument: &str) -> f64 {
        self.holdings.get(instrument).map_or(0.0, LedgerEntry::value)
    }

    /// Σ(shares × last price) over instruments, excluding cash.
    pub fn stock_value(&self) -> f64 {
        self.holdings.values().map(LedgerEntry::value).sum()
    }

    pub fn total_value(&self) -> f64 {
        debug_assert!(self.cash.price == CASH_PRICE);
        self.cash.value() + self.stock_value()
    }

    pub fn value_summary(&self, time: Option<Nanos>) -> ValueSummary {
        let stock_value = self.stock_value();
        let cash = self.cash();
        ValueSummary {
            time,
            stock_value,
            cash,
            total_value: cash + stock_value,
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Price-update primitive. First sight of an instrument opens a flat entry.
    pub fn update_price(&mut self, instrument: &str, price: Price) {
        match self.holdings.get_mut(instrument) {
            Some(entry) => {
                entry.price = price;
                entry.update_count += 1;
            }
            None => {
                self.holdings.insert(
                    instrument.to_string(),
                    LedgerEntry {
                        price,
                        shares: 0.0,
                        update_count: 1,
                    },
                );
            }
        }
    }

    /// Overwrite a holding, for seeding a session with existing positions.
    /// Returns false if the instrument has no price yet.
    pub fn set_shares(&mut self, instrument: &str, shares: Shares) -> bool {
        match self.holdings.get_mut(instrument) {
            Some(entry) => {
                entry.shares = shares;
                true
            }
            None => false,
        }
    }

    /// Validated-trade primitive.
    ///
    /// A sell larger than the holding is clipped to a full liquidation with the
    /// fee recomputed on the clipped notional. The fill is then booked only if
    /// cash stays non-negative. On rejection nothing is modified.
    pub fn apply_fill(
        &mut self,
        receipt: &FillReceipt,
        fees: &FeeSchedule,
    ) -> Result<AppliedFill, TradeRejection> {
        let held = self
            .holdings
            .get(&receipt.instrument)
            .map(|e| e.shares)
            .ok_or_else(|| TradeRejection::UnknownInstrument {
                instrument: receipt.instrument.clone(),
            })?;

        let mut share_delta = receipt.share_delta;
        let mut fee = receipt.fee;
        let mut clipped = false;

        if share_delta < 0.0 && -share_delta > held {
            share_delta = -held;
            let notional = receipt.fill_price * share_delta;
            fee = fees.fee(notional);
            clipped = true;
            if fee > notional.abs() {
                return Err(TradeRejection::FeeExceedsNotional {
                    fee,
                    notional: notional.abs(),
                });
            }
        }

        let cost = receipt.fill_price * share_delta + fee;
        let available = self.cash();
        if available - cost < 0.0 {
            return Err(TradeRejection::InsufficientFunds {
                required: cost,
                available,
            });
        }

        self.book_trade(&receipt.instrument, share_delta, receipt.fill_price, fee);

        Ok(AppliedFill {
            instrument: receipt.instrument.clone(),
            fill_price: receipt.fill_price,
            share_delta,
            fee,
            clipped,
            cash_after: self.cash(),
        })
    }

    /// Unchecked booking. Callers must have validated the trade.
    fn book_trade(&mut self, instrument: &str, share_delta: Shares, price: Price, fee: f64) {
        if let Some(entry) = self.holdings.get_mut(instrument) {
            entry.shares += share_delta;
            // -0.0 from a full liquidation reads badly in summaries
            if entry.shares == 0.0 {
                entry.shares = 0.0;
            }
        }
        self.cash.shares -= price * share_delta + fee;
    }
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cash: {:.2}", self.cash())?;
        for (instrument, entry) in &self.holdings {
            write!(
                f,
                ", {}: {} @ {} ({} updates)",
                instrument, entry.shares, entry.price, entry.update_count
            )?;
        }
        Ok(())
    }
}

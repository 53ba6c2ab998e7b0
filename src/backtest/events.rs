//! Event Types
//!
//! Messages that move between the tick producer, the strategy, the execution
//! simulator and the ledger.

use crate::backtest::clock::{nanos_to_date, Nanos};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument identifier (ticker symbol).
pub type InstrumentId = String;

/// Price type (f64 for simplicity, could be fixed-point).
pub type Price = f64;

/// Signed share quantity. Positive = buy, negative = sell.
pub type Shares = f64;

/// One timestamped price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: Nanos,
    pub instrument: InstrumentId,
    pub price: Price,
}

impl Tick {
    pub fn new(time: Nanos, instrument: impl Into<InstrumentId>, price: Price) -> Self {
        Self {
            time,
            instrument: instrument.into(),
            price,
        }
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            nanos_to_date(self.time),
            self.instrument,
            self.price
        )
    }
}

/// Message carried on the producer/consumer channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Tick(Tick),
    /// Terminal sentinel. Sent exactly once, after the last tick.
    EndOfStream,
}

/// Order direction, derived from the sign of a share delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn of(share_delta: Shares) -> Self {
        if share_delta < 0.0 {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// What the strategy wants to trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub instrument: InstrumentId,
    /// Price the strategy saw when it decided.
    pub reference_price: Price,
    pub share_delta: Shares,
}

impl TradeIntent {
    pub fn new(instrument: impl Into<InstrumentId>, reference_price: Price, share_delta: Shares) -> Self {
        Self {
            instrument: instrument.into(),
            reference_price,
            share_delta,
        }
    }

    pub fn side(&self) -> Side {
        Side::of(self.share_delta)
    }
}

impl fmt::Display for TradeIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at ${} for {} shares",
            self.instrument, self.reference_price, self.share_delta
        )
    }
}

/// What the simulated venue says actually happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReceipt {
    pub instrument: InstrumentId,
    pub fill_price: Price,
    pub share_delta: Shares,
    pub fee: f64,
}

impl FillReceipt {
    pub fn new(instrument: impl Into<InstrumentId>, fill_price: Price, share_delta: Shares, fee: f64) -> Self {
        Self {
            instrument: instrument.into(),
            fill_price,
            share_delta,
            fee,
        }
    }

    /// Signed traded value, excluding the fee.
    pub fn notional(&self) -> f64 {
        self.fill_price * self.share_delta
    }

    pub fn side(&self) -> Side {
        Side::of(self.share_delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_from_delta() {
        assert_eq!(Side::of(2.0), Side::Buy);
        assert_eq!(Side::of(-0.5), Side::Sell);
        assert_eq!(TradeIntent::new("TICK", 10.0, -3.0).side(), Side::Sell);
    }

    #[test]
    fn test_receipt_notional() {
        let receipt = FillReceipt::new("TICK", 11.0, -2.0, 10.0);
        assert!((receipt.notional() + 22.0).abs() < 1e-12);
        assert_eq!(receipt.side(), Side::Sell);
    }

    #[test]
    fn test_intent_display() {
        let intent = TradeIntent::new("AAPL", 101.5, 7.0);
        assert_eq!(intent.to_string(), "AAPL at $101.5 for 7 shares");
    }
}

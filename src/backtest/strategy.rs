//! Strategy Harness
//!
//! Interface between the orchestrator and a trading strategy, plus the
//! fixed-capacity rolling window strategies use for their statistics.
//!
//! A strategy sees prices one tick at a time through `on_price` and is then
//! asked for orders with a read-only view of the ledger. It never mutates the
//! ledger and never reads wall-clock time; `now` is the tick's timestamp.

use crate::backtest::clock::Nanos;
use crate::backtest::events::{Price, TradeIntent};
use crate::backtest::portfolio::Portfolio;
use statrs::statistics::Statistics;

/// Strategy interface driven by the orchestrator.
pub trait Strategy: Send {
    /// Strategy name for logging.
    fn name(&self) -> &str;

    /// Called once per tick, before `generate_orders`.
    fn on_price(&mut self, instrument: &str, price: Price);

    /// Orders to execute after the tick at `now`. Empty means no trade.
    fn generate_orders(&mut self, now: Nanos, portfolio: &Portfolio) -> Vec<TradeIntent>;
}

/// Circular buffer holding the last `capacity` values.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: Vec<f64>,
    capacity: usize,
    /// Slot the next push overwrites once full.
    head: usize,
}

impl RollingWindow {
    /// Window of `capacity` slots. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() < self.capacity {
            self.values.push(value);
        } else {
            self.values[self.head] = value;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed value.
    pub fn latest(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let idx = if self.is_full() {
            (self.head + self.capacity - 1) % self.capacity
        } else {
            self.values.len() - 1
        };
        Some(self.values[idx])
    }

    /// Mean of the values pushed so far. NaN when empty.
    pub fn mean(&self) -> f64 {
        self.values.iter().mean()
    }

    /// Mean as if unwritten slots held zero.
    pub fn zero_filled_mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.capacity as f64
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        let (newer, older) = if self.is_full() {
            self.values.split_at(self.head)
        } else {
            self.values.split_at(self.values.len())
        };
        older.iter().chain(newer.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_partial_mean_and_latest() {
        let mut w = RollingWindow::new(4);
        assert!(w.is_empty());
        assert!(w.mean().is_nan());
        assert_eq!(w.latest(), None);

        w.push(2.0);
        w.push(4.0);
        assert_eq!(w.len(), 2);
        assert!(!w.is_full());
        assert!((w.mean() - 3.0).abs() < 1e-12);
        assert!((w.zero_filled_mean() - 1.5).abs() < 1e-12);
        assert_eq!(w.latest(), Some(4.0));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut w = RollingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            w.push(v);
        }
        assert!(w.is_full());
        assert_eq!(w.len(), 3);
        assert_eq!(w.iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
        assert_eq!(w.latest(), Some(5.0));
        assert!((w.mean() - 4.0).abs() < 1e-12);
        assert!((w.zero_filled_mean() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_wraps_many_times() {
        let mut w = RollingWindow::new(5);
        for v in 0..1_003 {
            w.push(v as f64);
        }
        assert_eq!(
            w.iter().copied().collect::<Vec<_>>(),
            vec![998.0, 999.0, 1000.0, 1001.0, 1002.0]
        );
        assert_eq!(w.latest(), Some(1002.0));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut w = RollingWindow::new(0);
        w.push(7.0);
        w.push(8.0);
        assert_eq!(w.capacity(), 1);
        assert_eq!(w.latest(), Some(8.0));
    }
}

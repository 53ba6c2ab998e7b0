//! Execution Simulator
//!
//! Stochastic stand-in for a venue. Every intent is filled in full at a
//! normally-perturbed price, or (rarely) dropped outright. There is no book and
//! no partial fills.

use crate::backtest::events::{FillReceipt, Price, TradeIntent};
use crate::backtest::rng::SimRng;
use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::fmt;

/// Linear fee model: `rate * |notional| + fixed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Proportional fee on absolute notional (0.02 = 2%).
    pub rate: f64,
    /// Flat fee charged per fill.
    pub fixed: f64,
}

impl FeeSchedule {
    pub fn new(rate: f64, fixed: f64) -> Self {
        Self { rate, fixed }
    }

    #[inline]
    pub fn fee(&self, notional: f64) -> f64 {
        self.rate * notional.abs() + self.fixed
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            rate: 0.02,
            fixed: 10.0,
        }
    }
}

/// Execution model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Std-dev of the relative price perturbation (0.01 = 1%).
    #[serde(default = "default_slippage_std")]
    pub slippage_std: f64,
    /// Probability that an order is dropped by the venue.
    #[serde(default = "default_failure_probability")]
    pub failure_probability: f64,
    /// Proportional fee rate.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    /// Flat fee per fill.
    #[serde(default = "default_fixed_fee")]
    pub fixed_fee: f64,
}

fn default_slippage_std() -> f64 {
    0.01
}
fn default_failure_probability() -> f64 {
    0.0001
}
fn default_fee_rate() -> f64 {
    0.02
}
fn default_fixed_fee() -> f64 {
    10.0
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_std: default_slippage_std(),
            failure_probability: default_failure_probability(),
            fee_rate: default_fee_rate(),
            fixed_fee: default_fixed_fee(),
        }
    }
}

impl ExecutionConfig {
    /// Deterministic venue: no slippage, no failures, same fees.
    pub fn frictionless_fills() -> Self {
        Self {
            slippage_std: 0.0,
            failure_probability: 0.0,
            ..Default::default()
        }
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule::new(self.fee_rate, self.fixed_fee)
    }
}

/// Why the simulator produced no receipt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// Random venue failure; the order is dropped.
    VenueFailure { instrument: String },
    /// Intent carried a non-finite price or size.
    InvalidIntent { instrument: String, reason: String },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::VenueFailure { instrument } => {
                write!(f, "simulated venue failure for {}", instrument)
            }
            ExecutionError::InvalidIntent { instrument, reason } => {
                write!(f, "invalid intent for {}: {}", instrument, reason)
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Simulated venue.
#[derive(Debug)]
pub struct ExecutionSimulator {
    slippage: Option<Normal>,
    failure_probability: f64,
    fees: FeeSchedule,
    rng: SimRng,
}

impl ExecutionSimulator {
    /// Build from config. Fails on a negative/NaN slippage std-dev or a failure
    /// probability outside `[0, 1]`.
    pub fn new(config: &ExecutionConfig, rng: SimRng) -> anyhow::Result<Self> {
        let slippage = if config.slippage_std == 0.0 {
            None
        } else {
            Some(Normal::new(0.0, config.slippage_std).map_err(|e| {
                anyhow::anyhow!("invalid slippage std-dev {}: {}", config.slippage_std, e)
            })?)
        };
        if !(0.0..=1.0).contains(&config.failure_probability) {
            anyhow::bail!(
                "failure probability must be within [0, 1], got {}",
                config.failure_probability
            );
        }
        Ok(Self {
            slippage,
            failure_probability: config.failure_probability,
            fees: config.fee_schedule(),
            rng,
        })
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Execute `intent`.
    ///
    /// Slippage and failure are drawn independently on every call, so the RNG
    /// advances identically whether or not the order survives.
    pub fn execute(&mut self, intent: &TradeIntent) -> Result<FillReceipt, ExecutionError> {
        if !intent.reference_price.is_finite() || !intent.share_delta.is_finite() {
            return Err(ExecutionError::InvalidIntent {
                instrument: intent.instrument.clone(),
                reason: format!(
                    "price {} / shares {}",
                    intent.reference_price, intent.share_delta
                ),
            });
        }

        let slippage = match &self.slippage {
            Some(normal) => normal.sample(self.rng.rng()),
            None => 0.0,
        };
        let failed = self.rng.rng().gen_bool(self.failure_probability);
        if failed {
            return Err(ExecutionError::VenueFailure {
                instrument: intent.instrument.clone(),
            });
        }

        let fill_price: Price = intent.reference_price * (1.0 + slippage);
        let notional = fill_price * intent.share_delta;
        Ok(FillReceipt::new(
            intent.instrument.clone(),
            fill_price,
            intent.share_delta,
            self.fees.fee(notional),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::rng::RngStream;

    fn simulator(config: ExecutionConfig, seed: u64) -> ExecutionSimulator {
        ExecutionSimulator::new(&config, SimRng::for_stream(seed, RngStream::Execution)).unwrap()
    }

    #[test]
    fn test_fee_schedule_is_linear_in_abs_notional() {
        let fees = FeeSchedule::default();
        assert!((fees.fee(33.0) - 10.66).abs() < 1e-9);
        assert!((fees.fee(-33.0) - 10.66).abs() < 1e-9);
        assert!((fees.fee(0.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_frictionless_fill_is_exact() {
        let mut sim = simulator(ExecutionConfig::frictionless_fills(), 1);
        let receipt = sim.execute(&TradeIntent::new("TICK", 50.0, 4.0)).unwrap();
        assert_eq!(receipt.instrument, "TICK");
        assert_eq!(receipt.fill_price, 50.0);
        assert_eq!(receipt.share_delta, 4.0);
        assert!((receipt.fee - (0.02 * 200.0 + 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_receipt_keeps_requested_delta_and_prices_fee_on_slipped_notional() {
        let mut sim = simulator(
            ExecutionConfig {
                slippage_std: 0.05,
                failure_probability: 0.0,
                ..Default::default()
            },
            2,
        );
        for _ in 0..200 {
            let receipt = sim.execute(&TradeIntent::new("TICK", 20.0, -3.0)).unwrap();
            assert_eq!(receipt.share_delta, -3.0);
            let expected_fee = 0.02 * (receipt.fill_price * 3.0).abs() + 10.0;
            assert!((receipt.fee - expected_fee).abs() < 1e-9);
        }
    }

    #[test]
    fn test_slippage_is_centered() {
        let mut sim = simulator(
            ExecutionConfig {
                slippage_std: 0.01,
                failure_probability: 0.0,
                ..Default::default()
            },
            3,
        );
        let n = 5_000;
        let mean: f64 = (0..n)
            .map(|_| sim.execute(&TradeIntent::new("T", 100.0, 1.0)).unwrap().fill_price)
            .sum::<f64>()
            / n as f64;
        assert!((mean - 100.0).abs() < 0.1, "mean fill {}", mean);
    }

    #[test]
    fn test_certain_failure_drops_every_order() {
        let mut sim = simulator(
            ExecutionConfig {
                failure_probability: 1.0,
                ..Default::default()
            },
            4,
        );
        for _ in 0..20 {
            assert!(matches!(
                sim.execute(&TradeIntent::new("T", 10.0, 1.0)),
                Err(ExecutionError::VenueFailure { .. })
            ));
        }
    }

    #[test]
    fn test_rejects_bad_config_and_intents() {
        let bad_std = ExecutionConfig {
            slippage_std: -0.1,
            ..Default::default()
        };
        assert!(ExecutionSimulator::new(&bad_std, SimRng::new(0)).is_err());

        let bad_p = ExecutionConfig {
            failure_probability: 1.5,
            ..Default::default()
        };
        assert!(ExecutionSimulator::new(&bad_p, SimRng::new(0)).is_err());

        let mut sim = simulator(ExecutionConfig::default(), 5);
        assert!(matches!(
            sim.execute(&TradeIntent::new("T", f64::NAN, 1.0)),
            Err(ExecutionError::InvalidIntent { .. })
        ));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let intent = TradeIntent::new("T", 42.0, 2.0);
        let mut a = simulator(ExecutionConfig::default(), 99);
        let mut b = simulator(ExecutionConfig::default(), 99);
        for _ in 0..50 {
            assert_eq!(a.execute(&intent), b.execute(&intent));
        }
    }
}

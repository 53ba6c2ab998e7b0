//! Rolling-Window Mean Reversion Strategy
//!
//! Tracks a W-observation price window per instrument and a W-observation
//! window of portfolio values. On each tick it decides whether to trade at all
//! (cooldown, periodic trigger, overrides) and, if so, buys instruments trading
//! well below their window mean and liquidates those trading above it, with a
//! small random chance of liquidating a would-be buy instead.
//!
//! # Hermetic Boundary
//!
//! All randomness comes from the injected `SimRng`; all time comes from the
//! tick timestamp passed to `generate_orders`.

use crate::backtest::clock::{calendar_days_between, nanos_to_date, Nanos};
use crate::backtest::config::ConfigError;
use crate::backtest::events::{InstrumentId, Price, TradeIntent};
use crate::backtest::portfolio::Portfolio;
use crate::backtest::rng::SimRng;
use crate::backtest::strategy::{RollingWindow, Strategy};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the portfolio-value window is averaged before it has W samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueWindowWarmup {
    /// Average only the snapshots recorded so far.
    #[default]
    ObservedOnly,
    /// Average over all W slots, unwritten slots counting as zero.
    ZeroFilled,
}

/// Strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Observations per rolling window (W).
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Minimum calendar days between trading decisions (M). Must be < W.
    #[serde(default = "default_min_wait_days")]
    pub min_wait_days: i64,
    /// Portfolio-value deviation above which trading is forced.
    #[serde(default = "default_override_deviation")]
    pub override_deviation: f64,
    /// Price deviation from window mean required to trade an instrument.
    #[serde(default = "default_trade_deviation")]
    pub trade_deviation: f64,
    /// Idle cash, as a fraction of portfolio value, above which trading is forced.
    #[serde(default = "default_idle_cash_fraction")]
    pub idle_cash_fraction: f64,
    /// Probability that an underpriced instrument is bought rather than liquidated.
    #[serde(default = "default_buy_bias")]
    pub buy_bias: f64,
    /// Orders smaller than this many shares are discarded.
    #[serde(default = "default_min_order_shares")]
    pub min_order_shares: f64,
    #[serde(default)]
    pub value_window_warmup: ValueWindowWarmup,
}

fn default_window_size() -> usize {
    20
}
fn default_min_wait_days() -> i64 {
    5
}
fn default_override_deviation() -> f64 {
    0.05
}
fn default_trade_deviation() -> f64 {
    0.03
}
fn default_idle_cash_fraction() -> f64 {
    0.03
}
fn default_buy_bias() -> f64 {
    0.9
}
fn default_min_order_shares() -> f64 {
    0.01
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_wait_days: default_min_wait_days(),
            override_deviation: default_override_deviation(),
            trade_deviation: default_trade_deviation(),
            idle_cash_fraction: default_idle_cash_fraction(),
            buy_bias: default_buy_bias(),
            min_order_shares: default_min_order_shares(),
            value_window_warmup: ValueWindowWarmup::default(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::invalid("strategy.window_size", "must be positive"));
        }
        if self.min_wait_days < 0 {
            return Err(ConfigError::invalid("strategy.min_wait_days", "must be non-negative"));
        }
        if self.min_wait_days as u64 >= self.window_size as u64 {
            return Err(ConfigError::invalid(
                "strategy.min_wait_days",
                format!(
                    "must be less than window_size ({} >= {})",
                    self.min_wait_days, self.window_size
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.buy_bias) {
            return Err(ConfigError::invalid("strategy.buy_bias", "must be within [0, 1]"));
        }
        for (field, value) in [
            ("strategy.override_deviation", self.override_deviation),
            ("strategy.trade_deviation", self.trade_deviation),
            ("strategy.idle_cash_fraction", self.idle_cash_fraction),
            ("strategy.min_order_shares", self.min_order_shares),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(field, "must be a non-negative number"));
            }
        }
        Ok(())
    }
}

/// Outcome of the "should we trade now" check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeDecision {
    /// Too soon after the last trading decision.
    Cooldown { days_since_last: i64 },
    /// Nothing fired.
    Hold,
    Trade {
        periodic: bool,
        value_deviation: bool,
        idle_cash: bool,
    },
}

impl TradeDecision {
    pub fn should_trade(&self) -> bool {
        matches!(self, TradeDecision::Trade { .. })
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub decisions: u64,
    pub cooldown_suppressed: u64,
    pub periodic_triggers: u64,
    pub override_triggers: u64,
    pub trading_rounds: u64,
    pub intents_emitted: u64,
}

#[derive(Debug, Clone)]
struct InstrumentState {
    window: RollingWindow,
    update_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LastTrade {
    update: u64,
    time: Nanos,
}

/// Rolling-window strategy engine.
#[derive(Debug)]
pub struct RollingWindowStrategy {
    config: StrategyConfig,
    instruments: BTreeMap<InstrumentId, InstrumentState>,
    value_window: RollingWindow,
    updates: u64,
    last_trade: Option<LastTrade>,
    rng: SimRng,
    stats: StrategyStats,
}

impl RollingWindowStrategy {
    pub fn new(config: StrategyConfig, rng: SimRng) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            value_window: RollingWindow::new(config.window_size),
            config,
            instruments: BTreeMap::new(),
            updates: 0,
            last_trade: None,
            rng,
            stats: StrategyStats::default(),
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    /// Register an instrument with an initial observation. No-op if known.
    ///
    /// Only the strategy's own counter is seeded. Pair every call with
    /// `Portfolio::update_price` for the same observation, otherwise the
    /// ledger's `update_count` lags and window eligibility (which reads the
    /// strategy counter) no longer matches the ledger.
    pub fn add_instrument(&mut self, instrument: &str, price: Price) {
        if !self.instruments.contains_key(instrument) {
            self.record_price(instrument, price);
        }
    }

    /// Price observations seen for `instrument`.
    pub fn update_count(&self, instrument: &str) -> u64 {
        self.instruments.get(instrument).map_or(0, |s| s.update_count)
    }

    pub fn window_average(&self, instrument: &str) -> Option<f64> {
        self.instruments.get(instrument).map(|s| s.window.mean())
    }

    /// Last observed price.
    pub fn latest_price(&self, instrument: &str) -> Option<Price> {
        self.instruments.get(instrument).and_then(|s| s.window.latest())
    }

    /// Number of `generate_orders` calls so far.
    pub fn global_updates(&self) -> u64 {
        self.updates
    }

    /// Global counter and timestamp of the last trading round, if any.
    pub fn last_trade(&self) -> Option<(u64, Nanos)> {
        self.last_trade.map(|t| (t.update, t.time))
    }

    fn record_price(&mut self, instrument: &str, price: Price) {
        let capacity = self.config.window_size;
        let state = self
            .instruments
            .entry(instrument.to_string())
            .or_insert_with(|| InstrumentState {
                window: RollingWindow::new(capacity),
                update_count: 0,
            });
        state.window.push(price);
        state.update_count += 1;
    }

    fn value_window_mean(&self) -> f64 {
        match self.config.value_window_warmup {
            ValueWindowWarmup::ObservedOnly => self.value_window.mean(),
            ValueWindowWarmup::ZeroFilled => self.value_window.zero_filled_mean(),
        }
    }

    /// Record the value snapshot, advance the global counter and evaluate the
    /// cooldown gate and triggers.
    pub fn decide(&mut self, now: Nanos, portfolio_value: f64, cash: f64) -> TradeDecision {
        self.value_window.push(portfolio_value);
        self.updates += 1;
        self.stats.decisions += 1;

        if let Some(last) = self.last_trade {
            let days_since_last = calendar_days_between(last.time, now);
            if days_since_last <= self.config.min_wait_days {
                self.stats.cooldown_suppressed += 1;
                return TradeDecision::Cooldown { days_since_last };
            }
        }

        let periodic = self.updates == self.config.window_size as u64 + 1;

        let value_deviation = portfolio_value > 0.0
            && (self.value_window_mean() - portfolio_value) / portfolio_value
                > self.config.override_deviation;

        let idle_cash = cash > portfolio_value * self.config.idle_cash_fraction;

        if periodic {
            self.stats.periodic_triggers += 1;
        }
        if value_deviation || idle_cash {
            self.stats.override_triggers += 1;
        }

        if periodic || value_deviation || idle_cash {
            TradeDecision::Trade {
                periodic,
                value_deviation,
                idle_cash,
            }
        } else {
            TradeDecision::Hold
        }
    }

    /// Instruments with a full window, in a fresh random order.
    fn qualifying_instruments(&mut self) -> Vec<InstrumentId> {
        let min_updates = self.config.window_size as u64;
        let mut qualifying: Vec<InstrumentId> = self
            .instruments
            .iter()
            .filter(|(_, s)| s.update_count > min_updates)
            .map(|(id, _)| id.clone())
            .collect();
        qualifying.shuffle(self.rng.rng());
        qualifying
    }

    fn build_orders(&mut self, portfolio: &Portfolio, qualifying: &[InstrumentId]) -> Vec<TradeIntent> {
        let cash = portfolio.cash();
        let budget = cash / qualifying.len() as f64;
        let mut orders = Vec::new();

        for instrument in qualifying {
            let Some(state) = self.instruments.get(instrument) else {
                continue;
            };
            let Some(price) = state.window.latest() else {
                continue;
            };
            if price <= 0.0 {
                continue;
            }
            let deviation = (state.window.mean() - price) / price;
            if deviation.abs() <= self.config.trade_deviation {
                continue;
            }

            let shares = if deviation > 0.0 && self.rng.rng().gen_bool(self.config.buy_bias) {
                (budget / price).floor()
            } else {
                -portfolio.shares(instrument)
            };

            if shares.abs() < self.config.min_order_shares {
                continue;
            }

            tracing::debug!(
                instrument = %instrument,
                price,
                deviation,
                shares,
                "Strategy order"
            );
            orders.push(TradeIntent::new(instrument.clone(), price, shares));
        }

        orders
    }
}

impl Strategy for RollingWindowStrategy {
    fn name(&self) -> &str {
        "rolling_window"
    }

    fn on_price(&mut self, instrument: &str, price: Price) {
        self.record_price(instrument, price);
    }

    fn generate_orders(&mut self, now: Nanos, portfolio: &Portfolio) -> Vec<TradeIntent> {
        let portfolio_value = portfolio.total_value();
        let decision = self.decide(now, portfolio_value, portfolio.cash());

        let TradeDecision::Trade {
            periodic,
            value_deviation,
            idle_cash,
        } = decision
        else {
            return Vec::new();
        };

        let qualifying = self.qualifying_instruments();
        if qualifying.is_empty() {
            return Vec::new();
        }

        tracing::debug!(
            date = %nanos_to_date(now),
            update = self.updates,
            periodic,
            value_deviation,
            idle_cash,
            qualifying = qualifying.len(),
            "Trading round"
        );

        let orders = self.build_orders(portfolio, &qualifying);

        self.last_trade = Some(LastTrade {
            update: self.updates,
            time: now,
        });
        self.stats.trading_rounds += 1;
        self.stats.intents_emitted += orders.len() as u64;

        orders
    }
}

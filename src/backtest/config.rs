//! Session configuration
//!
//! Universe, date range, capital and seed for one replay, plus the strategy
//! and execution sections. Loaded from TOML; every field has a default so a
//! partial file (or none at all) is valid.

use crate::backtest::execution::ExecutionConfig;
use crate::backtest::window_strategy::StrategyConfig;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file read by `SessionConfig::from_env`.
pub const CONFIG_PATH_ENV: &str = "BACKTEST_CONFIG_PATH";

const DEFAULT_CONFIG_PATH: &str = "backtest.toml";

/// A configuration value outside its allowed range.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config `{}`: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for one backtest session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Initial cash balance
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,

    /// Instrument universe
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,

    /// First date replayed (inclusive)
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// Last date replayed (inclusive)
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,

    /// Base seed for every random stream in the session
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Wide price CSV (`date,<INSTR>,...`)
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

fn default_starting_cash() -> f64 {
    1_000_000.0
}
fn default_instruments() -> Vec<String> {
    ["AAPL", "GOGL", "MSFT", "AA", "APB"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 1, 1).unwrap_or_default()
}
fn default_end_date() -> NaiveDate {
    Utc::now().date_naive()
}
fn default_seed() -> u64 {
    42
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            starting_cash: default_starting_cash(),
            instruments: default_instruments(),
            start_date: default_start_date(),
            end_date: default_end_date(),
            seed: default_seed(),
            data_path: None,
            strategy: StrategyConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `BACKTEST_CONFIG_PATH` or the default path, else defaults
    pub fn from_env() -> Self {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default backtest config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.starting_cash.is_finite() || self.starting_cash <= 0.0 {
            return Err(ConfigError::invalid("starting_cash", "must be positive"));
        }
        if self.instruments.is_empty() {
            return Err(ConfigError::invalid("instruments", "universe is empty"));
        }
        if self.start_date > self.end_date {
            return Err(ConfigError::invalid(
                "start_date",
                format!("{} is after end_date {}", self.start_date, self.end_date),
            ));
        }
        self.strategy.validate()?;

        let exec = &self.execution;
        if !exec.slippage_std.is_finite() || exec.slippage_std < 0.0 {
            return Err(ConfigError::invalid("execution.slippage_std", "must be non-negative"));
        }
        if !(0.0..=1.0).contains(&exec.failure_probability) {
            return Err(ConfigError::invalid(
                "execution.failure_probability",
                "must be within [0, 1]",
            ));
        }
        for (field, value) in [
            ("execution.fee_rate", exec.fee_rate),
            ("execution.fixed_fee", exec.fixed_fee),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(field, "must be non-negative"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.starting_cash, 1_000_000.0);
        assert_eq!(config.instruments, vec!["AAPL", "GOGL", "MSFT", "AA", "APB"]);
        assert_eq!(config.seed, 42);
        assert_eq!(config.strategy.window_size, 20);
        assert_eq!(config.strategy.min_wait_days, 5);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SessionConfig = toml::from_str(
            r#"
            starting_cash = 5000.0
            instruments = ["AAA", "BBB"]
            start_date = "2020-03-02"
            end_date = "2020-06-30"

            [strategy]
            window_size = 10
            min_wait_days = 2
            value_window_warmup = "zero_filled"
            "#,
        )
        .unwrap();

        assert_eq!(config.starting_cash, 5000.0);
        assert_eq!(config.instruments, vec!["AAA", "BBB"]);
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2020, 3, 2).unwrap());
        assert_eq!(config.strategy.window_size, 10);
        assert_eq!(config.strategy.trade_deviation, 0.03);
        assert_eq!(
            config.strategy.value_window_warmup,
            crate::backtest::window_strategy::ValueWindowWarmup::ZeroFilled
        );
        assert_eq!(config.execution.fixed_fee, 10.0);
        assert_eq!(config.seed, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");

        let mut config = SessionConfig::default();
        config.seed = 7;
        config.data_path = Some(PathBuf::from("prices.csv"));
        config.save(&path).unwrap();

        let loaded = SessionConfig::load(&path).unwrap();
        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.data_path, Some(PathBuf::from("prices.csv")));
        assert_eq!(loaded.end_date, config.end_date);
    }

    #[test]
    fn test_from_env_reads_named_file_or_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.toml");
        let mut config = SessionConfig::default();
        config.seed = 7;
        config.save(&path).unwrap();

        std::env::set_var(CONFIG_PATH_ENV, &path);
        assert_eq!(SessionConfig::from_env().seed, 7);

        std::env::set_var(CONFIG_PATH_ENV, dir.path().join("missing.toml"));
        assert_eq!(SessionConfig::from_env().seed, SessionConfig::default().seed);
        std::env::remove_var(CONFIG_PATH_ENV);
    }

    #[test]
    fn test_wait_not_shorter_than_window_rejected() {
        let mut config = SessionConfig::default();
        config.strategy.window_size = 5;
        config.strategy.min_wait_days = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("strategy.min_wait_days"));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut config = SessionConfig::default();
        config.execution.failure_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.starting_cash = 0.0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.start_date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        config.end_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(config.validate().is_err());
    }
}

//! Replay Backtester Library
//!
//! Exposes the backtest engine for the CLI binary and integration tests.

pub mod backtest;

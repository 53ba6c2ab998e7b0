//! Replay Backtest CLI
//!
//! Runs one backtest session over a wide closing-price CSV and prints the final
//! portfolio summary.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release -- \
//!   --data prices.csv \
//!   --tickers AAPL,MSFT,AA \
//!   --start 2016-01-01 \
//!   --end   2018-12-31 \
//!   --report report.json
//! ```
//!
//! Values come from `--config`. Without it, `BACKTEST_CONFIG_PATH` or
//! `./backtest.toml` is read if present, else built-in defaults. Any flags given
//! on the command line override them.

use anyhow::{bail, Context, Result};
use clap::Parser;
use replay_backtester::backtest::{
    clock::parse_date, run_session, CsvPriceProvider, SessionConfig,
};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tick replay backtester for daily closing prices
#[derive(Parser, Debug)]
#[command(name = "replay-backtest")]
#[command(about = "Replay historical closing prices through a rolling-window strategy")]
struct Cli {
    /// TOML session config (default: $BACKTEST_CONFIG_PATH, then ./backtest.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wide price CSV (date,<TICKER>,<TICKER>,...)
    #[arg(short, long, env = "BACKTEST_DATA_PATH")]
    data: Option<PathBuf>,

    /// Comma-separated instrument universe
    #[arg(short, long, value_delimiter = ',')]
    tickers: Option<Vec<String>>,

    /// First date (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,

    /// Last date (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,

    /// Starting cash
    #[arg(long)]
    cash: Option<f64>,

    /// Base RNG seed
    #[arg(long, env = "BACKTEST_SEED")]
    seed: Option<u64>,

    /// Rolling window size (W)
    #[arg(long)]
    window: Option<usize>,

    /// Minimum calendar days between trading rounds (M < W)
    #[arg(long)]
    min_wait_days: Option<i64>,

    /// Write the session report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write logs to this file (truncated) instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let default_directive = if verbose {
        "replay_backtester=debug,replay_backtest=debug"
    } else {
        "replay_backtester=info,replay_backtest=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive.into());

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::from_env(),
    };

    if let Some(data) = &cli.data {
        config.data_path = Some(data.clone());
    }
    if let Some(tickers) = &cli.tickers {
        config.instruments = tickers
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    if let Some(start) = &cli.start {
        config.start_date =
            parse_date(start).with_context(|| format!("invalid --start date {:?}", start))?;
    }
    if let Some(end) = &cli.end {
        config.end_date =
            parse_date(end).with_context(|| format!("invalid --end date {:?}", end))?;
    }
    if let Some(cash) = cli.cash {
        config.starting_cash = cash;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(window) = cli.window {
        config.strategy.window_size = window;
    }
    if let Some(wait) = cli.min_wait_days {
        config.strategy.min_wait_days = wait;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_ref())?;

    let config = build_config(&cli)?;
    let Some(data_path) = config.data_path.clone() else {
        bail!("no price data: pass --data or set data_path in the config");
    };

    tracing::info!(
        data = %data_path.display(),
        instruments = ?config.instruments,
        start = %config.start_date,
        end = %config.end_date,
        cash = config.starting_cash,
        seed = config.seed,
        "Backtest configured"
    );

    let provider = CsvPriceProvider::new(&data_path);
    let report = run_session(&config, &provider)?;

    println!("{}", report.final_summary);
    println!(
        "ticks={} gaps={} proposed={} filled={} failed={} rejected={} clipped={} fees={:.2}",
        report.stats.ticks_processed,
        report.stats.market_data_gaps,
        report.stats.orders_proposed,
        report.stats.orders_filled,
        report.stats.orders_failed,
        report.stats.orders_rejected,
        report.stats.liquidations_clipped,
        report.stats.fees_paid,
    );
    if let Some(reason) = &report.aborted {
        eprintln!("session aborted: {}", reason);
    }

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report {}", path.display()))?;
        tracing::info!(path = %path.display(), "Report written");
    }

    Ok(())
}

//! Historical Price Tables
//!
//! Boundary with the market-data provider. A provider turns an instrument
//! universe and a date range into a date-indexed table of closing prices, one
//! column per instrument. Absent observations are stored as NaN and are
//! dropped later by the tick stream.

use crate::backtest::clock::parse_date;
use crate::backtest::events::{InstrumentId, Price};
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Cross-sectional price table: rows are dates, columns are instruments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    instruments: Vec<InstrumentId>,
    rows: BTreeMap<NaiveDate, Vec<Price>>,
}

impl PriceTable {
    pub fn new(instruments: Vec<InstrumentId>) -> Self {
        Self {
            instruments,
            rows: BTreeMap::new(),
        }
    }

    pub fn instruments(&self) -> &[InstrumentId] {
        &self.instruments
    }

    /// Add a column. Existing rows get NaN for it. No-op if already present.
    pub fn add_instrument(&mut self, instrument: impl Into<InstrumentId>) {
        let instrument = instrument.into();
        if self.instruments.contains(&instrument) {
            return;
        }
        self.instruments.push(instrument);
        for prices in self.rows.values_mut() {
            prices.push(Price::NAN);
        }
    }

    /// Set one cell, creating the row (and column) as needed.
    pub fn insert(&mut self, date: NaiveDate, instrument: &str, price: Price) {
        let col = match self.column(instrument) {
            Some(col) => col,
            None => {
                self.add_instrument(instrument);
                self.instruments.len() - 1
            }
        };
        let width = self.instruments.len();
        let row = self
            .rows
            .entry(date)
            .or_insert_with(|| vec![Price::NAN; width]);
        row[col] = price;
    }

    pub fn get(&self, date: NaiveDate, instrument: &str) -> Option<Price> {
        let col = self.column(instrument)?;
        self.rows.get(&date).map(|row| row[col])
    }

    fn column(&self, instrument: &str) -> Option<usize> {
        self.instruments.iter().position(|i| i == instrument)
    }

    /// Rows in chronological order.
    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, &[Price])> {
        self.rows.iter().map(|(date, prices)| (*date, prices.as_slice()))
    }

    pub fn num_dates(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Count of finite observations across the table.
    pub fn observation_count(&self) -> usize {
        self.rows
            .values()
            .map(|row| row.iter().filter(|p| p.is_finite()).count())
            .sum()
    }

    /// Keep only rows within `[start, end]`.
    pub fn retain_dates(&mut self, start: NaiveDate, end: NaiveDate) {
        self.rows.retain(|date, _| *date >= start && *date <= end);
    }
}

/// What to fetch from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRequest {
    pub instruments: Vec<InstrumentId>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Source of historical closing prices.
pub trait MarketDataProvider {
    /// Fetch closing prices for the requested universe and inclusive date range.
    ///
    /// Instruments the provider cannot serve are logged and omitted; only
    /// structural failures (unreadable source, bad header) are errors.
    fn load(&self, request: &PriceRequest) -> Result<PriceTable>;

    /// Provider identifier for logging/diagnostics.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Wide CSV file: `date,<INSTRUMENT>,<INSTRUMENT>,...` with `YYYY-MM-DD` dates.
/// Empty or unparsable cells are treated as missing observations.
#[derive(Debug, Clone)]
pub struct CsvPriceProvider {
    path: PathBuf,
}

impl CsvPriceProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a CSV document from any reader.
    pub fn parse<R: io::Read>(reader: R, request: &PriceRequest) -> Result<PriceTable> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv.headers().context("reading CSV header")?.clone();
        if headers.len() < 2 {
            bail!("price CSV needs a date column and at least one instrument column");
        }

        // (column index in file, instrument)
        let mut columns: Vec<(usize, &str)> = Vec::with_capacity(request.instruments.len());
        let total = request.instruments.len().max(1);
        for (loaded, instrument) in request.instruments.iter().enumerate() {
            tracing::info!(
                instrument = %instrument,
                progress = loaded as f64 / total as f64,
                "Loading instrument"
            );
            match headers.iter().skip(1).position(|h| h == instrument) {
                Some(pos) => columns.push((pos + 1, instrument.as_str())),
                None => {
                    tracing::error!(instrument = %instrument, "Instrument not present in price data, skipping");
                }
            }
        }

        let mut table = PriceTable::new(columns.iter().map(|(_, i)| i.to_string()).collect());

        for (line, record) in csv.records().enumerate() {
            let record = record.with_context(|| format!("reading CSV row {}", line + 2))?;
            let Some(date) = record.get(0).and_then(parse_date) else {
                tracing::warn!(row = line + 2, "Skipping row with unparsable date");
                continue;
            };
            if date < request.start || date > request.end {
                continue;
            }
            for (col, instrument) in &columns {
                let price = record
                    .get(*col)
                    .and_then(|cell| cell.parse::<Price>().ok())
                    .unwrap_or(Price::NAN);
                table.insert(date, instrument, price);
            }
        }

        Ok(table)
    }
}

impl MarketDataProvider for CsvPriceProvider {
    fn load(&self, request: &PriceRequest) -> Result<PriceTable> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("opening price data {}", self.path.display()))?;
        let table = Self::parse(file, request)?;
        tracing::info!(
            dates = table.num_dates(),
            instruments = table.instruments().len(),
            observations = table.observation_count(),
            "Loaded data"
        );
        Ok(table)
    }

    fn name(&self) -> &str {
        "csv"
    }
}

/// Provider over an already-built table (tests, programmatic use).
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceProvider {
    table: PriceTable,
}

impl InMemoryPriceProvider {
    pub fn new(table: PriceTable) -> Self {
        Self { table }
    }
}

impl MarketDataProvider for InMemoryPriceProvider {
    fn load(&self, request: &PriceRequest) -> Result<PriceTable> {
        let mut table = PriceTable::new(Vec::new());
        for instrument in &request.instruments {
            if !self.table.instruments().contains(instrument) {
                tracing::error!(instrument = %instrument, "Instrument not present in price data, skipping");
                continue;
            }
            table.add_instrument(instrument.clone());
        }
        for (date, _) in self.table.rows() {
            if date < request.start || date > request.end {
                continue;
            }
            for instrument in &request.instruments {
                if let Some(price) = self.table.get(date, instrument) {
                    table.insert(date, instrument, price);
                }
            }
        }
        Ok(table)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DataIngestionError, MalformedRecord};
use crate::fetcher::{PriceProvider, PriceRecord, PriceSeries, fetch_history, validate_record};

/// Concatenate `existing` then `incoming` and keep one record per date.
/// On a collision the incoming value wins. The result is always date-sorted.
pub fn merge(existing: &PriceSeries, incoming: &PriceSeries) -> PriceSeries {
    PriceSeries::from_records(existing.iter().chain(incoming.iter()).copied())
}

/// Outcome of one fetch → merge → persist cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub fetched_rows: usize,
    pub previous_rows: usize,
    pub total_rows: usize,
}

/// Two-column (`date`, `price`) CSV dataset on disk.
#[derive(Debug, Clone)]
pub struct PriceStore {
    path: PathBuf,
}

impl PriceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole dataset. A missing file is an empty series; malformed
    /// rows are logged and skipped.
    pub fn load(&self) -> Result<PriceSeries, DataIngestionError> {
        if !self.path.exists() {
            debug!("{} does not exist yet, starting empty", self.path.display());
            return Ok(PriceSeries::default());
        }

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let headers = reader.headers()?.clone();
        let date_idx = column_index(&headers, "date").unwrap_or(0);
        let price_idx = column_index(&headers, "price").unwrap_or(1);

        let mut records = Vec::new();
        let mut dropped = 0usize;
        for row in reader.records() {
            let row = row?;
            match parse_row(&row, date_idx, price_idx) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Dropping row {:?}: {}", row.position().map(|p| p.line()), e);
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            warn!(
                "Dropped {} malformed rows from {}",
                dropped,
                self.path.display()
            );
        }

        Ok(PriceSeries::from_records(records))
    }

    /// Overwrite the dataset. The rows go to a sibling temp file first which is
    /// then renamed over the target, so readers never see a partial file.
    pub fn save(&self, series: &PriceSeries) -> Result<(), DataIngestionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.tmp_path();
        {
            let mut writer = WriterBuilder::new().has_headers(false).from_path(&tmp)?;
            writer.write_record(["date", "price"])?;
            for record in series.iter() {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!("Wrote {} rows to {}", series.len(), self.path.display());
        Ok(())
    }

    /// The latest `n` rows, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<PriceRecord>, DataIngestionError> {
        Ok(self.load()?.tail(n).to_vec())
    }

    /// Fetch `[start, end)` from `provider`, merge it into the stored dataset and
    /// persist the result. A fetch failure leaves the file untouched.
    pub fn refresh(
        &self,
        provider: &dyn PriceProvider,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RefreshSummary, DataIngestionError> {
        let incoming = provider.fetch(symbol, start, end)?;
        self.merge_in(incoming)
    }

    /// [`PriceStore::refresh`] over the trailing window given by
    /// [`fetch_history`].
    pub fn refresh_history(
        &self,
        provider: &dyn PriceProvider,
        symbol: &str,
        today: NaiveDate,
        history_days: u64,
    ) -> Result<RefreshSummary, DataIngestionError> {
        let incoming = fetch_history(provider, symbol, today, history_days)?;
        self.merge_in(incoming)
    }

    fn merge_in(&self, incoming: PriceSeries) -> Result<RefreshSummary, DataIngestionError> {
        let existing = self.load()?;
        let merged = merge(&existing, &incoming);
        self.save(&merged)?;

        let summary = RefreshSummary {
            fetched_rows: incoming.len(),
            previous_rows: existing.len(),
            total_rows: merged.len(),
        };
        info!(
            "Dataset {} refreshed: fetched {}, {} -> {} rows",
            self.path.display(),
            summary.fetched_rows,
            summary.previous_rows,
            summary.total_rows
        );
        Ok(summary)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
}

fn parse_row(
    row: &StringRecord,
    date_idx: usize,
    price_idx: usize,
) -> Result<PriceRecord, MalformedRecord> {
    let raw_date = row.get(date_idx).unwrap_or_default();
    let raw_price = row.get(price_idx).unwrap_or_default();

    let date = parse_date(raw_date).ok_or_else(|| MalformedRecord::Date(raw_date.to_string()))?;
    let price: f64 = raw_price
        .parse()
        .map_err(|_| MalformedRecord::Price(raw_price.to_string()))?;

    let record = PriceRecord { date, price };
    validate_record(&record)?;
    Ok(record)
}

/// `YYYY-MM-DD`, optionally followed by a time part.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

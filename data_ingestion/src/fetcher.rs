use chrono::{DateTime, Days, NaiveDate, NaiveTime};
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::IngestionConfig;
use crate::error::{DataIngestionError, MalformedRecord};

/// One daily closing price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub price: f64,
}

/// Chronologically ordered prices with at most one record per date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    records: Vec<PriceRecord>,
}

impl PriceSeries {
    /// Sorts by date and keeps the last-seen record for a repeated date.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PriceRecord>,
    {
        let by_date: BTreeMap<NaiveDate, f64> = records
            .into_iter()
            .map(|record| (record.date, record.price))
            .collect();

        Self {
            records: by_date
                .into_iter()
                .map(|(date, price)| PriceRecord { date, price })
                .collect(),
        }
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&PriceRecord> {
        self.records.last()
    }

    /// The most recent `n` records, oldest first.
    pub fn tail(&self, n: usize) -> &[PriceRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.records.iter().map(|r| r.date).collect()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.price).collect()
    }
}

impl IntoIterator for PriceSeries {
    type Item = PriceRecord;
    type IntoIter = std::vec::IntoIter<PriceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Source of daily closing prices.
///
/// `end` is exclusive: only dates strictly before it are returned. An empty
/// answer is always reported as [`DataIngestionError::EmptyResult`].
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataIngestionError>;
}

/// First day of a trailing `history_days` window ending before `today`.
/// A window reaching past the calendar's start is clamped to it.
pub fn history_start(today: NaiveDate, history_days: u64) -> NaiveDate {
    today
        .checked_sub_days(Days::new(history_days))
        .unwrap_or(NaiveDate::MIN)
}

/// Fetch `[history_start(today, history_days), today)`.
pub fn fetch_history(
    provider: &dyn PriceProvider,
    symbol: &str,
    today: NaiveDate,
    history_days: u64,
) -> Result<PriceSeries, DataIngestionError> {
    let start = history_start(today, history_days);
    info!(
        "Fetching {} from {} ({} to {})",
        symbol,
        provider.name(),
        start,
        today
    );
    provider.fetch(symbol, start, today)
}

pub fn validate_record(record: &PriceRecord) -> Result<(), MalformedRecord> {
    if !record.price.is_finite() {
        return Err(MalformedRecord::Price(record.price.to_string()));
    }
    if record.price < 0.0 {
        return Err(MalformedRecord::NegativePrice(record.price));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    close: Vec<Option<f64>>,
}

/// Daily closes from the Yahoo Finance v8 chart API.
pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(config: &IngestionConfig) -> Result<Self, DataIngestionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;

        Ok(Self {
            client,
            base_url: config.provider_url.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let end_ts = end.and_time(NaiveTime::MIN).and_utc().timestamp();
        format!(
            "{}/v8/finance/chart/{symbol}?period1={start_ts}&period2={end_ts}&interval=1d",
            self.base_url
        )
    }
}

impl PriceProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataIngestionError> {
        if start >= end {
            return Err(empty(symbol, start, end));
        }

        let url = self.chart_url(symbol, start, end);
        debug!("GET {}", url);

        let response = self.client.get(&url).send()?;
        let status = response.status();
        let body = response.text()?;

        // Yahoo answers unknown symbols with a 404 that still carries a chart error body.
        let chart: ChartResponse = match serde_json::from_str(&body) {
            Ok(chart) => chart,
            Err(e) if status.is_success() => {
                return Err(DataIngestionError::ProviderError(format!(
                    "failed to parse response for {symbol}: {e}"
                )));
            }
            Err(_) => {
                return Err(DataIngestionError::ProviderError(format!(
                    "HTTP {status} for {symbol}"
                )));
            }
        };

        normalize_chart(symbol, start, end, chart)
    }
}

/// Turn the provider frame into (date, close) records, dropping malformed rows.
fn normalize_chart(
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    chart: ChartResponse,
) -> Result<PriceSeries, DataIngestionError> {
    let result = match (chart.chart.result, chart.chart.error) {
        (_, Some(err)) if err.code == "Not Found" => return Err(empty(symbol, start, end)),
        (_, Some(err)) => {
            return Err(DataIngestionError::ProviderError(format!(
                "{}: {}",
                err.code, err.description
            )));
        }
        (Some(result), None) => result,
        (None, None) => return Err(empty(symbol, start, end)),
    };

    let Some(data) = result.into_iter().next() else {
        return Err(empty(symbol, start, end));
    };
    let timestamps = data.timestamp.unwrap_or_default();
    let closes = data
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let mut records = Vec::with_capacity(timestamps.len());
    let mut dropped = 0usize;

    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(date) = DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()) else {
            warn!("Dropping row with invalid timestamp {}", ts);
            dropped += 1;
            continue;
        };
        if date < start || date >= end {
            continue;
        }

        let record = match closes.get(i).copied().flatten() {
            Some(price) => PriceRecord { date, price },
            None => {
                warn!("Dropping row: {}", MalformedRecord::MissingClose(date));
                dropped += 1;
                continue;
            }
        };
        if let Err(e) = validate_record(&record) {
            warn!("Dropping row on {}: {}", date, e);
            dropped += 1;
            continue;
        }
        records.push(record);
    }

    if dropped > 0 {
        warn!("Dropped {} malformed rows for {}", dropped, symbol);
    }
    if records.is_empty() {
        return Err(empty(symbol, start, end));
    }

    Ok(PriceSeries::from_records(records))
}

fn empty(symbol: &str, start: NaiveDate, end: NaiveDate) -> DataIngestionError {
    DataIngestionError::EmptyResult {
        symbol: symbol.to_string(),
        start,
        end,
    }
}

/// In-memory provider over a fixed set of series, keyed by symbol.
/// Applies the same date bounds and empty-result rule as the network provider.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    series: BTreeMap<String, PriceSeries>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: &str, series: PriceSeries) -> Self {
        self.series.insert(symbol.to_string(), series);
        self
    }
}

impl PriceProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataIngestionError> {
        let records: Vec<PriceRecord> = self
            .series
            .get(symbol)
            .map(|s| {
                s.iter()
                    .filter(|r| r.date >= start && r.date < end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        if records.is_empty() {
            return Err(empty(symbol, start, end));
        }
        Ok(PriceSeries::from_records(records))
    }
}

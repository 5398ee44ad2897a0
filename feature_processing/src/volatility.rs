use chrono::{Days, NaiveDate};
use data_ingestion::{DataIngestionError, PriceProvider, PriceSeries};
use log::info;
use polars::prelude::*;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{FeatureError, VolatilityError};
use crate::processor::{check_window, price_frame, rolling_volatility};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolatilityPoint {
    pub date: NaiveDate,
    pub volatility: f64,
}

/// Rolling volatility over a requested range. `latest` is the last defined
/// value: a naive persistence forecast for the next period, not a model output.
#[derive(Debug, Clone, Serialize)]
pub struct VolatilityReport {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub window: usize,
    pub series: Vec<VolatilityPoint>,
    pub latest: VolatilityPoint,
}

impl VolatilityReport {
    /// `latest` scaled by √252 for callers that quote annualized figures.
    pub fn annualized_latest(&self) -> f64 {
        self.latest.volatility * TRADING_DAYS_PER_YEAR.sqrt()
    }
}

/// The 365 days up to yesterday, with `end` exclusive.
pub fn default_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let end = today.pred_opt().unwrap_or(today);
    let start = end.checked_sub_days(Days::new(365)).unwrap_or(end);
    (start, end)
}

/// Raw rolling volatility (same definition as the training label) for every
/// day where the window is full.
pub fn rolling_volatility_series(
    series: &PriceSeries,
    window: usize,
) -> Result<Vec<VolatilityPoint>, FeatureError> {
    check_window(window)?;
    if series.is_empty() {
        return Ok(Vec::new());
    }

    let df = price_frame(series)?
        .lazy()
        .with_column(rolling_volatility(window).alias("volatility"))
        .drop_nulls(None)
        .collect()?;

    let rows = df.column("row")?.u32()?;
    let volatility = df.column("volatility")?.f64()?;
    let records = series.records();

    Ok(rows
        .into_iter()
        .zip(volatility)
        .filter_map(|(row, vol)| match (row, vol) {
            (Some(row), Some(vol)) if vol.is_finite() => Some(VolatilityPoint {
                date: records[row as usize].date,
                volatility: vol,
            }),
            _ => None,
        })
        .collect())
}

/// On-demand volatility straight from the provider; never touches the stored dataset.
#[derive(Clone)]
pub struct VolatilityService {
    provider: Arc<dyn PriceProvider>,
}

impl VolatilityService {
    pub fn new(provider: Arc<dyn PriceProvider>) -> Self {
        Self { provider }
    }

    pub fn compute(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        window: usize,
    ) -> Result<VolatilityReport, VolatilityError> {
        let prices = match self.provider.fetch(symbol, start, end) {
            Ok(prices) => prices,
            Err(DataIngestionError::EmptyResult { .. }) => {
                return Err(VolatilityError::NoData {
                    symbol: symbol.to_string(),
                    start,
                    end,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let series = rolling_volatility_series(&prices, window)?;
        let Some(&latest) = series.last() else {
            return Err(VolatilityError::NotEnoughObservations {
                observations: prices.len(),
                window,
            });
        };

        info!(
            "{} volatility over {}..{} (window {}): {:.6}",
            symbol, start, end, window, latest.volatility
        );

        Ok(VolatilityReport {
            symbol: symbol.to_string(),
            start,
            end,
            window,
            series,
            latest,
        })
    }
}

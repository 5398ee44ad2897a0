use chrono::Datelike;
use data_ingestion::PriceSeries;
use log::debug;
use polars::prelude::*;

use crate::error::FeatureError;
use crate::misc::FeatureRow;

pub const DEFAULT_WINDOW: usize = 30;

const SHORT_MA_WINDOW: usize = 7;
const LONG_MA_WINDOW: usize = 30;

/// Frame with the position of each record (`row`) and its `price`.
pub(crate) fn price_frame(series: &PriceSeries) -> PolarsResult<DataFrame> {
    let rows: Vec<u32> = (0..series.len() as u32).collect();
    DataFrame::new(vec![
        Column::new("row".into(), rows),
        Column::new("price".into(), series.prices()),
    ])
}

fn full_window(window: usize) -> RollingOptionsFixedWindow {
    RollingOptionsFixedWindow {
        window_size: window,
        min_periods: window,
        ..Default::default()
    }
}

/// Daily percent change of `price`; null on the first row.
pub(crate) fn price_change() -> Expr {
    col("price").pct_change(lit(1))
}

/// Sample (ddof = 1) standard deviation of the last `window` daily returns,
/// not annualized. Null until `window` returns exist.
pub(crate) fn rolling_volatility(window: usize) -> Expr {
    price_change().rolling_std(full_window(window))
}

fn trailing_mean(window: usize) -> Expr {
    col("price").rolling_mean(full_window(window))
}

pub(crate) fn check_window(window: usize) -> Result<(), FeatureError> {
    if window < 2 {
        return Err(FeatureError::InvalidWindow(window));
    }
    Ok(())
}

/// Derive one [`FeatureRow`] per day whose rolling windows are all filled.
///
/// The series is date-sorted by construction. Rows with any undefined or
/// non-finite feature or label are dropped, so the result is a suffix of the
/// input (it starts at the first day with `window` returns plus one lag).
pub fn build_features(series: &PriceSeries, window: usize) -> Result<Vec<FeatureRow>, FeatureError> {
    check_window(window)?;
    if series.is_empty() {
        return Ok(Vec::new());
    }

    let df = price_frame(series)?
        .lazy()
        .with_columns([
            price_change().alias("price_change"),
            rolling_volatility(window).alias("volatility"),
            trailing_mean(SHORT_MA_WINDOW).alias("moving_avg_7"),
            trailing_mean(LONG_MA_WINDOW).alias("moving_avg_30"),
        ])
        .with_columns([col("volatility").shift(lit(1)).alias("lagged_volatility")])
        .drop_nulls(None)
        .collect()?;

    let rows = df.column("row")?.u32()?;
    let price_change = df.column("price_change")?.f64()?;
    let volatility = df.column("volatility")?.f64()?;
    let lagged = df.column("lagged_volatility")?.f64()?;
    let ma_short = df.column("moving_avg_7")?.f64()?;
    let ma_long = df.column("moving_avg_30")?.f64()?;

    let records = series.records();
    let mut features = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(row), Some(pc), Some(vol), Some(lag), Some(ma7), Some(ma30)) = (
            rows.get(i),
            price_change.get(i),
            volatility.get(i),
            lagged.get(i),
            ma_short.get(i),
            ma_long.get(i),
        ) else {
            continue;
        };
        let date = records[row as usize].date;

        let feature = FeatureRow {
            date,
            day_of_year: date.ordinal(),
            lagged_volatility: lag,
            price_change: pc,
            moving_avg_7: ma7,
            moving_avg_30: ma30,
            volatility: vol,
        };
        if feature.is_complete() {
            features.push(feature);
        }
    }

    debug!(
        "Built {} feature rows from {} prices (window {})",
        features.len(),
        series.len(),
        window
    );
    Ok(features)
}

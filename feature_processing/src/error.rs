use chrono::NaiveDate;
use data_ingestion::DataIngestionError;
use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),

    #[error("Rolling window must cover at least 2 observations, got {0}")]
    InvalidWindow(usize),
}

#[derive(Error, Debug)]
pub enum VolatilityError {
    #[error("No data found for symbol {symbol} between {start} and {end}")]
    NoData {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("{observations} observations are not enough for a {window}-day rolling window")]
    NotEnoughObservations { observations: usize, window: usize },

    #[error("Fetch failed: {0}")]
    FetchError(#[from] DataIngestionError),

    #[error(transparent)]
    FeatureError(#[from] FeatureError),
}

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataIngestionError {
    #[error("No price data returned for {symbol} between {start} and {end}")]
    EmptyResult {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config not found: {0}")]
    ConfigValueNotFoundError(#[from] config::ConfigError),
}

/// A single row that could not be turned into a price record. These are
/// dropped and logged by the caller, never fatal for the batch.
#[derive(Error, Debug, PartialEq)]
pub enum MalformedRecord {
    #[error("unparseable date {0:?}")]
    Date(String),

    #[error("non-numeric price {0:?}")]
    Price(String),

    #[error("negative price {0}")]
    NegativePrice(f64),

    #[error("missing close price on {0}")]
    MissingClose(NaiveDate),
}

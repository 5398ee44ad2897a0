use chrono::{DateTime, FixedOffset, Utc};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    pub symbol: String,
    pub data_path: PathBuf,
    pub history_days: u64,
    pub provider_url: String,
    pub request_timeout_secs: u64,
    pub utc_offset_hours: i32,
}

impl IngestionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_file("config/ingestion.toml")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .set_default("symbol", "BZ=F")?
            .set_default("data_path", "data/brent_crude_oil.csv")?
            .set_default("history_days", 365)?
            .set_default("provider_url", "https://query2.finance.yahoo.com")?
            .set_default("request_timeout_secs", 30)?
            .set_default("utc_offset_hours", 8)?
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("INGESTION")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        cfg.try_deserialize()
    }

    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        utc_offset(self.utc_offset_hours).ok_or_else(|| {
            ConfigError::Message(format!("invalid UTC offset: {} hours", self.utc_offset_hours))
        })
    }
}

/// Whole-hour offset from UTC, or `None` when it is not a valid offset.
pub fn utc_offset(hours: i32) -> Option<FixedOffset> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
}

/// Current wall-clock time in `offset`. Every entry point derives "today" from this.
pub fn now_in(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

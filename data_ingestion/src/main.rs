use anyhow::Result;
use data_ingestion::config::{IngestionConfig, now_in};
use data_ingestion::logger::init_logger;
use data_ingestion::{PriceStore, YahooProvider};
use log::info;

/// One-shot dataset refresh: fetch the trailing history, merge it into the
/// stored CSV and persist the result.
fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logger();

    let config = IngestionConfig::from_env()?;
    let provider = YahooProvider::new(&config)?;
    let store = PriceStore::new(&config.data_path);

    let today = now_in(config.offset()?).date_naive();
    let summary = store.refresh_history(&provider, &config.symbol, today, config.history_days)?;
    info!(
        "Stored {} rows for {} in {}",
        summary.total_rows,
        config.symbol,
        store.path().display()
    );

    Ok(())
}

pub mod config;
pub mod error;
pub mod fetcher;
pub mod logger;
pub mod store;

pub use error::{DataIngestionError, MalformedRecord};
pub use fetcher::{
    PriceProvider, PriceRecord, PriceSeries, StaticProvider, YahooProvider, fetch_history,
    history_start,
};
pub use store::{PriceStore, RefreshSummary, merge};

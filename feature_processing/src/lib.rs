pub mod error;
pub mod misc;
pub mod processor;
pub mod volatility;

pub use error::{FeatureError, VolatilityError};
pub use misc::{FEATURE_NAMES, FeatureRow, NUM_FEATURES};
pub use processor::{DEFAULT_WINDOW, build_features};
pub use volatility::{
    TRADING_DAYS_PER_YEAR, VolatilityPoint, VolatilityReport, VolatilityService, default_range,
    rolling_volatility_series,
};

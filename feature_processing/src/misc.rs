use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const NUM_FEATURES: usize = 5;

/// Model input columns, in the order every feature vector is laid out.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "day_of_year",
    "lagged_volatility",
    "price_change",
    "moving_avg_7",
    "moving_avg_30",
];

/// Engineered features for one trading day plus its volatility label.
/// Only built for days where every rolling window is fully populated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub day_of_year: u32,
    pub lagged_volatility: f64,
    pub price_change: f64,
    pub moving_avg_7: f64,
    pub moving_avg_30: f64,
    pub volatility: f64,
}

impl FeatureRow {
    /// Feature vector in [`FEATURE_NAMES`] order.
    pub fn features(&self) -> [f64; NUM_FEATURES] {
        [
            self.day_of_year as f64,
            self.lagged_volatility,
            self.price_change,
            self.moving_avg_7,
            self.moving_avg_30,
        ]
    }

    pub fn label(&self) -> f64 {
        self.volatility
    }

    pub fn is_complete(&self) -> bool {
        (1..=366).contains(&self.day_of_year)
            && self.features().iter().all(|v| v.is_finite())
            && self.volatility.is_finite()
    }
}

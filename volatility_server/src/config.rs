use anyhow::{Result, anyhow};
use config::{Config, ConfigError, Environment, File, FileFormat};
use data_ingestion::config::utc_offset;
use feature_processing::DEFAULT_WINDOW;
use serde::Deserialize;
use std::path::PathBuf;

use crate::engine::TrainerConfig;
use crate::scheduler::Schedule;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub model_path: PathBuf,
    pub window: usize,
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub min_samples_split: usize,
    pub seed: u64,
    pub schedule_hour: u32,
    pub schedule_minute: u32,
    pub utc_offset_hours: i32,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_file("config/server.toml")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .set_default("bind_addr", "0.0.0.0:8000")?
            .set_default("model_path", "models/volatility_model.bin")?
            .set_default("window", DEFAULT_WINDOW as u64)?
            .set_default("n_trees", 100)?
            .set_default("min_samples_split", 2)?
            .set_default("seed", 42)?
            .set_default("schedule_hour", 14)?
            .set_default("schedule_minute", 0)?
            .set_default("utc_offset_hours", 8)?
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("SERVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        cfg.try_deserialize()
    }

    pub fn trainer(&self) -> TrainerConfig {
        TrainerConfig {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            seed: self.seed,
        }
    }

    pub fn schedule(&self) -> Result<Schedule> {
        let offset = utc_offset(self.utc_offset_hours)
            .ok_or_else(|| anyhow!("invalid UTC offset: {} hours", self.utc_offset_hours))?;
        Schedule::new(self.schedule_hour, self.schedule_minute, offset)
    }
}

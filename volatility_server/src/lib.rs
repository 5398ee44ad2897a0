pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod server;

pub use crate::config::ServerConfig;
pub use crate::engine::{Evaluation, TrainedModel, TrainerConfig, train};
pub use crate::error::{ModelError, UpdateError};
pub use crate::pipeline::{Prediction, UpdateJob, UpdateStatus};
pub use crate::scheduler::Schedule;
pub use crate::server::{AppState, Server};

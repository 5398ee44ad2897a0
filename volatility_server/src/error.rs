use data_ingestion::DataIngestionError;
use feature_processing::FeatureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Need at least {required} feature rows to train, got {rows}")]
    InsufficientData { rows: usize, required: usize },

    #[error("Training failed: {0}")]
    TrainingError(String),

    #[error("Prediction failed: {0}")]
    PredictionError(String),

    #[error("Model expects features {expected:?}, artifact has {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Model (de)serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Ingestion(#[from] DataIngestionError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("No feature rows available for a prediction")]
    NoFeatures,
}

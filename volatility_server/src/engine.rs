use chrono::NaiveDate;
use feature_processing::{FEATURE_NAMES, FeatureRow};
use log::info;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::metrics::mean_squared_error;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::ModelError;

/// Below this many feature rows the 80/20 split leaves too little to learn from.
pub const MIN_TRAINING_ROWS: usize = 60;
pub const TEST_FRACTION: f64 = 0.2;

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainerConfig {
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

impl TrainerConfig {
    fn parameters(&self) -> RandomForestRegressorParameters {
        let params = RandomForestRegressorParameters::default()
            .with_n_trees(self.n_trees)
            .with_min_samples_split(self.min_samples_split)
            .with_seed(self.seed);
        match self.max_depth {
            Some(depth) => params.with_max_depth(depth),
            None => params,
        }
    }
}

/// Held-out performance of a freshly trained model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub mse: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
}

/// Random-forest regressor from the five engineered features to next volatility.
/// The feature order it was fitted with travels inside the artifact.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedModel {
    feature_names: Vec<String>,
    forest: Forest,
}

/// Split date-sorted rows into a chronological head (train) and tail (test).
/// The tail holds `ceil(TEST_FRACTION * n)` rows.
pub fn chronological_split(rows: &[FeatureRow]) -> (&[FeatureRow], &[FeatureRow]) {
    let test_rows = (rows.len() as f64 * TEST_FRACTION).ceil() as usize;
    rows.split_at(rows.len() - test_rows.min(rows.len()))
}

fn to_matrix(rows: &[FeatureRow]) -> Result<DenseMatrix<f64>, smartcore::error::Failed> {
    let x: Vec<Vec<f64>> = rows.iter().map(|r| r.features().to_vec()).collect();
    DenseMatrix::from_2d_vec(&x)
}

fn labels(rows: &[FeatureRow]) -> Vec<f64> {
    rows.iter().map(FeatureRow::label).collect()
}

/// Fit on the chronological head and report MSE on the held-out tail.
pub fn train(
    rows: &[FeatureRow],
    config: &TrainerConfig,
) -> Result<(TrainedModel, Evaluation), ModelError> {
    if rows.len() < MIN_TRAINING_ROWS {
        return Err(ModelError::InsufficientData {
            rows: rows.len(),
            required: MIN_TRAINING_ROWS,
        });
    }

    let mut rows = rows.to_vec();
    rows.sort_by_key(|r| r.date);
    let (train_rows, test_rows) = chronological_split(&rows);

    let x_train = to_matrix(train_rows).map_err(|e| ModelError::TrainingError(e.to_string()))?;
    let y_train = labels(train_rows);

    info!(
        "Training random forest ({} trees) on {} rows, testing on {}",
        config.n_trees,
        train_rows.len(),
        test_rows.len()
    );
    let forest = Forest::fit(&x_train, &y_train, config.parameters())
        .map_err(|e| ModelError::TrainingError(e.to_string()))?;

    let model = TrainedModel {
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        forest,
    };

    let predictions = model.predict_many(test_rows)?;
    let mse = mean_squared_error(&labels(test_rows), &predictions);
    info!("Mean squared error on test set: {}", mse);

    let evaluation = Evaluation {
        mse,
        train_rows: train_rows.len(),
        test_rows: test_rows.len(),
        train_end: train_rows[train_rows.len() - 1].date,
        test_start: test_rows[0].date,
    };
    Ok((model, evaluation))
}

impl TrainedModel {
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        let predictions = self.predict_many(std::slice::from_ref(row))?;
        predictions
            .first()
            .copied()
            .ok_or_else(|| ModelError::PredictionError("no prediction returned".into()))
    }

    /// Predicted volatility for each row, never negative.
    pub fn predict_many(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, ModelError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let x = to_matrix(rows).map_err(|e| ModelError::PredictionError(e.to_string()))?;
        let predictions = self
            .forest
            .predict(&x)
            .map_err(|e| ModelError::PredictionError(e.to_string()))?;
        Ok(predictions.into_iter().map(|p| p.max(0.0)).collect())
    }

    /// Replace whatever artifact is at `path`. Written to a sibling temp file
    /// and renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(path);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            bincode::serialize_into(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;

        info!("Model saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let reader = BufReader::new(File::open(path)?);
        let model: TrainedModel = bincode::deserialize_from(reader)?;

        if model.feature_names != FEATURE_NAMES {
            return Err(ModelError::FeatureMismatch {
                expected: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                found: model.feature_names,
            });
        }
        Ok(model)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn synthetic_rows(n: usize) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        (0..n)
            .map(|i| {
                let vol = 0.02 + 0.01 * (i as f64 * 0.3).sin().abs();
                let date = start + Days::new(i as u64);
                FeatureRow {
                    date,
                    day_of_year: chrono::Datelike::ordinal(&date),
                    lagged_volatility: vol * 0.95,
                    price_change: (i as f64 * 0.8).cos() * 0.01,
                    moving_avg_7: 80.0 + (i as f64 * 0.1).sin(),
                    moving_avg_30: 80.0,
                    volatility: vol,
                }
            })
            .collect()
    }

    fn small_forest() -> TrainerConfig {
        TrainerConfig {
            n_trees: 10,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn fifty_rows_is_insufficient() {
        let err = train(&synthetic_rows(50), &small_forest()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InsufficientData { rows: 50, required: MIN_TRAINING_ROWS }
        ));
    }

    #[test]
    fn hundred_rows_trains_with_finite_mse() {
        let (model, eval) = train(&synthetic_rows(100), &TrainerConfig::default()).unwrap();

        assert!(eval.mse.is_finite());
        assert!(eval.mse >= 0.0);
        assert_eq!((eval.train_rows, eval.test_rows), (80, 20));
        assert_eq!(model.feature_names(), FEATURE_NAMES);
    }

    #[test]
    fn split_is_chronological() {
        let mut rows = synthetic_rows(73);
        rows.reverse();
        let (_, eval) = train(&rows, &small_forest()).unwrap();
        assert!(eval.train_end < eval.test_start);

        let sorted = synthetic_rows(73);
        let (head, tail) = chronological_split(&sorted);
        assert_eq!(tail.len(), 15);
        let last_train = head.iter().map(|r| r.date).max().unwrap();
        assert!(tail.iter().all(|r| r.date > last_train));
    }

    #[test]
    fn predictions_are_non_negative() {
        let rows = synthetic_rows(90);
        let (model, _) = train(&rows, &small_forest()).unwrap();

        let predictions = model.predict_many(&rows).unwrap();
        assert_eq!(predictions.len(), rows.len());
        assert!(predictions.iter().all(|p| p.is_finite() && *p >= 0.0));
        assert!(model.predict(&rows[0]).unwrap() >= 0.0);
    }

    #[test]
    fn save_overwrites_and_load_restores_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/volatility_model.bin");
        let rows = synthetic_rows(80);

        let (first, _) = train(&rows, &small_forest()).unwrap();
        first.save(&path).unwrap();

        let (second, _) = train(
            &rows,
            &TrainerConfig { seed: 7, ..small_forest() },
        )
        .unwrap();
        second.save(&path).unwrap();

        let loaded = TrainedModel::load(&path).unwrap();
        assert_eq!(
            loaded.predict_many(&rows).unwrap(),
            second.predict_many(&rows).unwrap()
        );
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn load_rejects_foreign_feature_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let (mut model, _) = train(&synthetic_rows(70), &small_forest()).unwrap();
        model.feature_names.swap(0, 1);
        model.save(&path).unwrap();

        assert!(matches!(
            TrainedModel::load(&path),
            Err(ModelError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn load_missing_artifact_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TrainedModel::load(&dir.path().join("absent.bin")),
            Err(ModelError::IoError(_))
        ));
    }
}

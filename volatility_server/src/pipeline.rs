use chrono::{DateTime, FixedOffset, NaiveDate};
use data_ingestion::{PriceProvider, PriceRecord, PriceStore, RefreshSummary};
use feature_processing::{FeatureRow, build_features};
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::{Evaluation, TrainedModel, TrainerConfig, train};
use crate::error::UpdateError;

/// Result of one successful update run. Owned by whoever triggered the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateStatus {
    pub completed_at: DateTime<FixedOffset>,
    pub symbol: String,
    pub fetched_rows: usize,
    pub total_rows: usize,
    pub feature_rows: usize,
    pub mse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub date: NaiveDate,
    pub predicted_volatility: f64,
    pub observed_volatility: f64,
}

/// Fetch → merge → persist followed by train → persist, for one symbol.
///
/// Each write phase runs under its own writer lock. Readers never take the
/// locks: files are replaced by rename, so a load always sees a whole file.
pub struct UpdateJob {
    provider: Arc<dyn PriceProvider>,
    store: PriceStore,
    model_path: PathBuf,
    symbol: String,
    history_days: u64,
    window: usize,
    trainer: TrainerConfig,
    dataset_lock: Mutex<()>,
    model_lock: Mutex<()>,
}

impl UpdateJob {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        store: PriceStore,
        model_path: impl Into<PathBuf>,
        symbol: impl Into<String>,
        history_days: u64,
        window: usize,
        trainer: TrainerConfig,
    ) -> Self {
        Self {
            provider,
            store,
            model_path: model_path.into(),
            symbol: symbol.into(),
            history_days,
            window,
            trainer,
            dataset_lock: Mutex::new(()),
            model_lock: Mutex::new(()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Merge the trailing `history_days` before `today` into the dataset.
    pub fn refresh_dataset(&self, today: NaiveDate) -> Result<RefreshSummary, UpdateError> {
        let _guard = self.dataset_lock.lock();
        Ok(self.store.refresh_history(
            self.provider.as_ref(),
            &self.symbol,
            today,
            self.history_days,
        )?)
    }

    /// Rebuild features from the stored dataset, fit a new model and replace
    /// the artifact. Returns the number of feature rows and the evaluation.
    pub fn retrain(&self) -> Result<(usize, Evaluation), UpdateError> {
        let _guard = self.model_lock.lock();

        let rows = self.feature_rows()?;
        let (model, evaluation) = train(&rows, &self.trainer)?;
        model.save(&self.model_path)?;
        Ok((rows.len(), evaluation))
    }

    pub fn run(&self, now: DateTime<FixedOffset>) -> Result<UpdateStatus, UpdateError> {
        info!("Starting update for {} at {}", self.symbol, now);

        let refreshed = self.refresh_dataset(now.date_naive())?;
        let (feature_rows, evaluation) = self.retrain()?;

        let status = UpdateStatus {
            completed_at: now,
            symbol: self.symbol.clone(),
            fetched_rows: refreshed.fetched_rows,
            total_rows: refreshed.total_rows,
            feature_rows,
            mse: evaluation.mse,
        };
        info!(
            "Update complete: {} rows stored, {} feature rows, MSE {}",
            status.total_rows, status.feature_rows, status.mse
        );
        Ok(status)
    }

    pub fn latest_rows(&self, limit: usize) -> Result<Vec<PriceRecord>, UpdateError> {
        Ok(self.store.tail(limit)?)
    }

    /// Snapshot of the persisted model.
    pub fn load_model(&self) -> Result<TrainedModel, UpdateError> {
        Ok(TrainedModel::load(&self.model_path)?)
    }

    /// Model output for the most recent day with a complete feature row.
    pub fn latest_prediction(&self) -> Result<Prediction, UpdateError> {
        let model = self.load_model()?;
        let rows = self.feature_rows()?;
        let Some(latest) = rows.last() else {
            warn!("Dataset has no complete feature rows yet");
            return Err(UpdateError::NoFeatures);
        };

        Ok(Prediction {
            date: latest.date,
            predicted_volatility: model.predict(latest)?,
            observed_volatility: latest.volatility,
        })
    }

    fn feature_rows(&self) -> Result<Vec<FeatureRow>, UpdateError> {
        let prices = self.store.load()?;
        Ok(build_features(&prices, self.window)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MIN_TRAINING_ROWS;
    use crate::error::ModelError;
    use chrono::{Days, TimeZone};
    use data_ingestion::{DataIngestionError, PriceSeries, StaticProvider, history_start};

    fn sgt() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<FixedOffset> {
        sgt().with_ymd_and_hms(y, m, d, 14, 0, 0).unwrap()
    }

    fn prices(n: u64) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        PriceSeries::from_records((0..n).map(|i| PriceRecord {
            date: start + Days::new(i),
            price: 80.0 + (i as f64 * 0.37).sin() * 4.0 + (i as f64 * 0.11).cos() * 2.0,
        }))
    }

    fn job(dir: &Path, provider: StaticProvider) -> UpdateJob {
        UpdateJob::new(
            Arc::new(provider),
            PriceStore::new(dir.join("data/brent_crude_oil.csv")),
            dir.join("models/volatility_model.bin"),
            "BZ=F",
            365,
            30,
            TrainerConfig { n_trees: 10, ..TrainerConfig::default() },
        )
    }

    #[test]
    fn run_fetches_trains_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), StaticProvider::new().with_series("BZ=F", prices(150)));

        let now = at(2023, 12, 1);
        let status = job.run(now).unwrap();

        assert_eq!(status.completed_at, now);
        assert_eq!(status.fetched_rows, 150);
        assert_eq!(status.total_rows, 150);
        assert_eq!(status.feature_rows, 150 - 31);
        assert!(status.mse.is_finite() && status.mse >= 0.0);
        assert!(job.model_path().exists());

        let prediction = job.latest_prediction().unwrap();
        assert_eq!(prediction.date, NaiveDate::from_ymd_opt(2023, 10, 28).unwrap());
        assert!(prediction.predicted_volatility >= 0.0);

        let tail = job.latest_rows(5).unwrap();
        assert_eq!(tail.len(), 5);
        assert_eq!(tail[4].date, prediction.date);
    }

    #[test]
    fn failed_fetch_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        job(dir.path(), StaticProvider::new().with_series("BZ=F", prices(150)))
            .run(at(2023, 12, 1))
            .unwrap();

        let broken = job(dir.path(), StaticProvider::new());
        let err = broken.run(at(2023, 12, 2)).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Ingestion(DataIngestionError::EmptyResult { .. })
        ));

        assert_eq!(broken.latest_rows(1000).unwrap().len(), 150);
        assert!(broken.latest_prediction().is_ok());
    }

    #[test]
    fn short_history_is_insufficient_for_training() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), StaticProvider::new().with_series("BZ=F", prices(80)));

        let err = job.run(at(2023, 12, 1)).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Model(ModelError::InsufficientData { rows: 49, required: MIN_TRAINING_ROWS })
        ));
        // dataset was still persisted before training failed
        assert_eq!(job.latest_rows(1000).unwrap().len(), 80);
        assert!(!job.model_path().exists());
    }

    /// Records every requested range before delegating.
    struct RecordingProvider {
        inner: StaticProvider,
        requests: Mutex<Vec<(NaiveDate, NaiveDate)>>,
    }

    impl PriceProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn fetch(
            &self,
            symbol: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<PriceSeries, DataIngestionError> {
            self.requests.lock().push((start, end));
            self.inner.fetch(symbol, start, end)
        }
    }

    #[test]
    fn job_and_ingestion_store_request_the_same_window() {
        let dir = tempfile::tempdir().unwrap();
        let today = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        let provider = Arc::new(RecordingProvider {
            inner: StaticProvider::new().with_series("BZ=F", prices(150)),
            requests: Mutex::new(Vec::new()),
        });

        for history_days in [365, u64::MAX] {
            provider.requests.lock().clear();

            let job = UpdateJob::new(
                provider.clone(),
                PriceStore::new(dir.path().join("job.csv")),
                dir.path().join("model.bin"),
                "BZ=F",
                history_days,
                30,
                TrainerConfig::default(),
            );
            job.refresh_dataset(today).unwrap();
            PriceStore::new(dir.path().join("ingest.csv"))
                .refresh_history(provider.as_ref(), "BZ=F", today, history_days)
                .unwrap();

            let expected = (history_start(today, history_days), today);
            assert_eq!(*provider.requests.lock(), vec![expected, expected]);
        }
    }

    #[test]
    fn prediction_without_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), StaticProvider::new());
        assert!(matches!(
            job.latest_prediction(),
            Err(UpdateError::Model(ModelError::IoError(_)))
        ));
    }

    #[test]
    fn concurrent_runs_leave_a_consistent_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let job = Arc::new(job(
            dir.path(),
            StaticProvider::new().with_series("BZ=F", prices(150)),
        ));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let job = Arc::clone(&job);
                std::thread::spawn(move || job.run(at(2023, 12, 1 + i)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(job.latest_rows(1000).unwrap().len(), 150);
        assert!(job.load_model().is_ok());
    }
}

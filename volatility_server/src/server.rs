use anyhow::Result;
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{FixedOffset, NaiveDate};
use data_ingestion::config::now_in;
use data_ingestion::PriceRecord;
use feature_processing::{VolatilityService, default_range};
use log::{error, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::pipeline::{Prediction, UpdateJob, UpdateStatus};

const DEFAULT_DATA_LIMIT: usize = 10;
const MAX_DATA_LIMIT: usize = 1000;

/// Shared state behind every handler. The last successful update is held
/// here, by the caller of the job.
#[derive(Clone)]
pub struct AppState {
    pub job: Arc<UpdateJob>,
    pub volatility: VolatilityService,
    pub last_status: Arc<RwLock<Option<UpdateStatus>>>,
    pub window: usize,
    pub offset: FixedOffset,
}

impl AppState {
    fn today(&self) -> NaiveDate {
        now_in(self.offset).date_naive()
    }
}

/// Any failure below a handler becomes a 500 with `{"error": message}`.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

async fn root() -> Json<Message> {
    Json(Message {
        message: "Welcome to the Brent Crude Oil Volatility Predictor API!",
    })
}

#[derive(Debug, Deserialize)]
pub struct VolatilityQuery {
    pub symbol: Option<String>,
    pub window_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct VolatilitySummary {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub window: usize,
    pub date: NaiveDate,
    pub volatility: f64,
    pub annualized_volatility: f64,
    pub observations: usize,
}

async fn volatility(
    State(state): State<AppState>,
    Query(query): Query<VolatilityQuery>,
) -> Result<Json<VolatilitySummary>, AppError> {
    let symbol = query.symbol.unwrap_or_else(|| state.job.symbol().to_string());
    let window = query.window_size.unwrap_or(state.window);
    let (start, end) = default_range(state.today());

    let service = state.volatility.clone();
    let report = blocking(move || Ok(service.compute(&symbol, start, end, window)?)).await?;

    Ok(Json(VolatilitySummary {
        annualized_volatility: report.annualized_latest(),
        date: report.latest.date,
        volatility: report.latest.volatility,
        observations: report.series.len(),
        symbol: report.symbol,
        start: report.start,
        end: report.end,
        window: report.window,
    }))
}

#[derive(Debug, Serialize)]
pub struct LastUpdate {
    pub last_update: String,
}

pub(crate) fn format_last_update(status: Option<&UpdateStatus>) -> String {
    match status {
        Some(status) => status.completed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "No updates have been made yet.".to_string(),
    }
}

async fn last_update(State(state): State<AppState>) -> Json<LastUpdate> {
    let status = state.last_status.read();
    Json(LastUpdate {
        last_update: format_last_update(status.as_ref()),
    })
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub limit: Option<usize>,
}

async fn data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Json<Vec<PriceRecord>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_DATA_LIMIT).min(MAX_DATA_LIMIT);
    let job = Arc::clone(&state.job);
    let rows = blocking(move || Ok(job.latest_rows(limit)?)).await?;
    Ok(Json(rows))
}

async fn prediction(State(state): State<AppState>) -> Result<Json<Prediction>, AppError> {
    let job = Arc::clone(&state.job);
    let prediction = blocking(move || Ok(job.latest_prediction()?)).await?;
    Ok(Json(prediction))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/volatility", get(volatility))
        .route("/last-update", get(last_update))
        .route("/data", get(data))
        .route("/prediction", get(prediction))
        .with_state(state)
}

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn init(state: AppState) -> Self {
        Self { state }
    }

    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let app = router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        info!("HTTP server running on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TrainerConfig;
    use chrono::{Days, TimeZone, Utc};
    use data_ingestion::{PriceSeries, PriceStore, StaticProvider};
    use std::path::Path;

    fn sgt() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    /// 200 daily prices ending the day before yesterday, so the default
    /// volatility range covers them.
    fn recent_prices() -> PriceSeries {
        let today = Utc::now().with_timezone(&sgt()).date_naive();
        let first = today - Days::new(201);
        PriceSeries::from_records((0..200u64).map(|i| PriceRecord {
            date: first + Days::new(i),
            price: 82.0 + (i as f64 * 0.41).sin() * 3.0 + (i as f64 * 0.07).cos(),
        }))
    }

    fn state(dir: &Path, provider: StaticProvider) -> AppState {
        let provider = Arc::new(provider);
        let job = UpdateJob::new(
            provider.clone(),
            PriceStore::new(dir.join("prices.csv")),
            dir.join("model.bin"),
            "BZ=F",
            365,
            30,
            TrainerConfig { n_trees: 5, ..TrainerConfig::default() },
        );
        AppState {
            job: Arc::new(job),
            volatility: VolatilityService::new(provider),
            last_status: Arc::new(RwLock::new(None)),
            window: 30,
            offset: sgt(),
        }
    }

    fn with_prices(dir: &Path) -> AppState {
        state(dir, StaticProvider::new().with_series("BZ=F", recent_prices()))
    }

    #[tokio::test]
    async fn root_greets() {
        let Json(body) = root().await;
        assert!(body.message.starts_with("Welcome"));
    }

    #[tokio::test]
    async fn last_update_reflects_the_held_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = with_prices(dir.path());

        let Json(body) = last_update(State(state.clone())).await;
        assert_eq!(body.last_update, "No updates have been made yet.");

        *state.last_status.write() = Some(UpdateStatus {
            completed_at: sgt().with_ymd_and_hms(2024, 3, 5, 14, 0, 7).unwrap(),
            symbol: "BZ=F".into(),
            fetched_rows: 250,
            total_rows: 250,
            feature_rows: 219,
            mse: 1e-6,
        });

        let Json(body) = last_update(State(state)).await;
        assert_eq!(body.last_update, "2024-03-05 14:00:07");
    }

    #[tokio::test]
    async fn volatility_defaults_to_the_configured_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let state = with_prices(dir.path());

        let Json(summary) = volatility(
            State(state),
            Query(VolatilityQuery { symbol: None, window_size: None }),
        )
        .await
        .unwrap_or_else(|_| panic!("volatility failed"));

        assert_eq!(summary.symbol, "BZ=F");
        assert_eq!(summary.window, 30);
        assert_eq!(summary.observations, 200 - 30);
        assert!(summary.volatility > 0.0);
        assert!((summary.annualized_volatility - summary.volatility * 252f64.sqrt()).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unknown_symbol_is_a_500_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let state = with_prices(dir.path());

        let err = volatility(
            State(state),
            Query(VolatilityQuery { symbol: Some("CL=F".into()), window_size: Some(10) }),
        )
        .await
        .err()
        .unwrap();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn data_and_prediction_after_an_update() {
        let dir = tempfile::tempdir().unwrap();
        let state = with_prices(dir.path());
        state.job.run(Utc::now().with_timezone(&sgt())).unwrap();

        let Json(rows) = data(State(state.clone()), Query(DataQuery { limit: Some(3) }))
            .await
            .unwrap_or_else(|_| panic!("data failed"));
        assert_eq!(rows.len(), 3);
        assert!(rows[0].date < rows[2].date);

        let Json(prediction) = prediction(State(state))
            .await
            .unwrap_or_else(|_| panic!("prediction failed"));
        assert_eq!(prediction.date, rows[2].date);
        assert!(prediction.predicted_volatility >= 0.0);
    }

    #[tokio::test]
    async fn prediction_without_a_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), StaticProvider::new());
        let response = prediction(State(state)).await.err().unwrap().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

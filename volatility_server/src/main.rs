use anyhow::Result;
use data_ingestion::config::IngestionConfig;
use data_ingestion::logger::init_logger;
use data_ingestion::{PriceProvider, PriceStore, YahooProvider};
use feature_processing::VolatilityService;
use log::{info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::signal;
use volatility_server::scheduler::{run_daily, run_once};
use volatility_server::{AppState, Server, ServerConfig, UpdateJob};

struct Pipeline {
    config: ServerConfig,
    provider: Arc<dyn PriceProvider>,
    state: AppState,
}

impl Pipeline {
    fn new() -> Result<Self> {
        let ingestion = IngestionConfig::from_env()?;
        let config = ServerConfig::from_env()?;
        let schedule = config.schedule()?;

        // the blocking client owns its own runtime, so it is built outside tokio
        let provider: Arc<dyn PriceProvider> = Arc::new(YahooProvider::new(&ingestion)?);
        let job = UpdateJob::new(
            Arc::clone(&provider),
            PriceStore::new(&ingestion.data_path),
            &config.model_path,
            &ingestion.symbol,
            ingestion.history_days,
            config.window,
            config.trainer(),
        );

        let state = AppState {
            job: Arc::new(job),
            volatility: VolatilityService::new(Arc::clone(&provider)),
            last_status: Arc::new(RwLock::new(None)),
            window: config.window,
            offset: schedule.offset(),
        };
        Ok(Self { config, provider, state })
    }

    async fn run(self) -> Result<()> {
        let schedule = self.config.schedule()?;

        info!("Running initial update");
        if !run_once(&self.state.job, &self.state.last_status, schedule.now()).await {
            warn!("Initial update failed, serving whatever data and model already exist");
        }

        let daily = tokio::spawn(run_daily(
            Arc::clone(&self.state.job),
            Arc::clone(&self.state.last_status),
            schedule,
        ));

        let server = Server::init(self.state.clone());
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, initiating graceful shutdown");
            }
            res = server.run(&self.config.bind_addr) => {
                res?;
            }
        }

        daily.abort();
        Ok(())
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logger();

    let pipeline = Pipeline::new()?;
    let provider = Arc::clone(&pipeline.provider);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(pipeline.run());
    drop(runtime);
    // last handle on the blocking client goes away outside the runtime
    drop(provider);
    result?;

    info!("Server has been shut down gracefully");
    Ok(())
}

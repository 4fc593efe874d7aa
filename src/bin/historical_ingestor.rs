//! Process entry point hosting the Historical OHLC Ingestor + Scheduler
//! (spec.md §5 "two processes are expected in deployment").

use clap::Parser;
use market_data_ingestor::historical::HistoricalIngestor;
use market_data_ingestor::registry::{ScheduleRegistry, SymbolRegistry};
use market_data_ingestor::scheduler::Scheduler;
use market_data_ingestor::store::{InfluxStore, RedisStore};
use market_data_ingestor::vendor::mock::MockHistClient;
use market_data_ingestor::AppConfig;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI overrides for the env-sourced `AppConfig` (spec.md §9 keeps process
/// config explicit rather than relying on module-scope globals).
#[derive(Parser, Debug)]
#[command(name = "historical-ingestor")]
#[command(about = "Batch worker: per-symbol, per-timeframe OHLC gap-fill")]
struct Args {
    /// Overrides INFLUX_URL.
    #[arg(long, env = "INFLUX_URL")]
    influx_url: Option<String>,

    /// Overrides REDIS_URL.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Overrides METRICS_PORT.
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::from_env();
    if let Some(url) = args.influx_url {
        config.influx_url = url;
    }
    if let Some(url) = args.redis_url {
        config.redis_url = url;
    }
    if args.metrics_port.is_some() {
        config.metrics_port = args.metrics_port;
    }
    init_tracing(&config.log_filter);

    if let Some(port) = config.metrics_port {
        if let Err(e) = market_data_ingestor::metrics::install(port) {
            tracing::warn!(error = %e, "failed to install metrics exporter");
        }
    }

    tracing::info!("historical ingestor starting");

    let ts_store: Arc<dyn market_data_ingestor::store::TimeSeriesStore> = Arc::new(InfluxStore::new(
        config.influx_url.clone(),
        config.influx_org.clone(),
        config.influx_token.clone(),
    ));
    let kv_store: Arc<dyn market_data_ingestor::store::KeyValueStore> =
        Arc::new(RedisStore::new(&config.redis_url)?);

    let symbols = Arc::new(SymbolRegistry::new(
        ts_store.clone(),
        kv_store.clone(),
        config.influx_bucket_symbol_management.clone(),
    ));
    let schedules = Arc::new(ScheduleRegistry::new(kv_store.clone()));

    // The vendor historical API is an external collaborator (out of scope
    // per this engine's own design); `MockHistClient` stands in here until
    // a real adapter crate is wired in at the same trait boundary.
    let vendor: Arc<dyn market_data_ingestor::vendor::VendorHistClient> = Arc::new(MockHistClient::new());

    let historical = Arc::new(HistoricalIngestor::new(
        vendor,
        ts_store,
        symbols,
        schedules.clone(),
        config.influx_bucket_market_data.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(historical, schedules, kv_store).await?);
    scheduler.boot().await?;

    let reconfig = scheduler.clone();
    let reconfig_task = tokio::spawn(async move { reconfig.run_reconfiguration_loop().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining running jobs");
    reconfig_task.abort();

    Ok(())
}

fn init_tracing(filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

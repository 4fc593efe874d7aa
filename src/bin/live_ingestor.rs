//! Process entry point hosting the Live Tick Ingestor + Reconciler
//! (spec.md §5 "two processes are expected in deployment").

use clap::Parser;
use market_data_ingestor::live::LiveTickIngestor;
use market_data_ingestor::reconciler::Reconciler;
use market_data_ingestor::registry::{ScheduleRegistry, SymbolRegistry};
use market_data_ingestor::store::{InfluxStore, RedisStore};
use market_data_ingestor::vendor::mock::MockQuoteClient;
use market_data_ingestor::AppConfig;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI overrides for the env-sourced `AppConfig`, mirroring
/// `historical_ingestor`'s own `Args`.
#[derive(Parser, Debug)]
#[command(name = "live-ingestor")]
#[command(about = "Event loop: live tick subscriptions and fan-out")]
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

    tracing::info!("live ingestor starting");

    let kv_store: Arc<dyn market_data_ingestor::store::KeyValueStore> =
        Arc::new(RedisStore::new(&config.redis_url)?);
    let ts_store: Arc<dyn market_data_ingestor::store::TimeSeriesStore> = Arc::new(InfluxStore::new(
        config.influx_url.clone(),
        config.influx_org.clone(),
        config.influx_token.clone(),
    ));
    let schedules = Arc::new(ScheduleRegistry::new(kv_store.clone()));
    let symbols = Arc::new(SymbolRegistry::new(
        ts_store,
        kv_store.clone(),
        config.influx_bucket_symbol_management.clone(),
    ));

    // As in the historical-ingestor binary, the vendor quote API is an
    // external collaborator; `MockQuoteClient` is the wiring placeholder.
    let vendor: Arc<dyn market_data_ingestor::vendor::VendorQuoteClient> = Arc::new(MockQuoteClient::new());

    let live = Arc::new(LiveTickIngestor::new(vendor, kv_store.clone()));
    let reconciler = Arc::new(Reconciler::new(kv_store, live.clone(), schedules, symbols));

    reconciler.reconcile_once().await?;

    let message_task = tokio::spawn({
        let live = live.clone();
        async move { live.run().await }
    });
    let periodic_task = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.run_periodic().await }
    });
    let pubsub_task = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.run_pubsub_loop().await }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, unsubscribing all watched symbols");
    for ticker in live.watched_symbols() {
        if let Err(e) = live.unsubscribe(&ticker).await {
            tracing::warn!(ticker, error = %e, "failed to unsubscribe during shutdown");
        }
    }
    message_task.abort();
    periodic_task.abort();
    pubsub_task.abort();

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

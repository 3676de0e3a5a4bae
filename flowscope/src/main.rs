mod container;

use std::process;
use std::sync::atomic::Ordering;
use std::time::Duration;

use container::{ContainerError, ServiceContainer};
use core_types::config::{AppConfig, ConfigError};
use engine_api::{EngineError, FeedEngine};
use log::info;
use thiserror::Error;
use tokio::net::TcpListener;

const METRICS_ADDR: &str = "127.0.0.1:9090";
const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("flowscope failed: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let container = ServiceContainer::build(&config)?;

    info!(
        "flowscope booting in {} mode on port {}",
        config.env_label(),
        config.port
    );
    info!(
        "vendor REST {}; options WS {}; hot tickers {:?}",
        config.rest_base_url, config.options_ws_url, config.hot_tickers
    );
    info!(
        "loaded vendor API key (len={}); allowed origins {:?}",
        config.api_key.len(),
        config.allowed_origins()
    );

    container.ingestion.start()?;
    let health = container.ingestion.health();
    info!(
        "ingestion feed {} ({})",
        health.state.label(),
        health.note.as_deref().unwrap_or("-")
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let status = container.client.market_status().await;
        info!("market status at boot: {}", status.label());

        let listener = TcpListener::bind(METRICS_ADDR).await?;
        info!("metrics listening on http://{METRICS_ADDR}/metrics");
        let metrics = container.metrics.clone();
        tokio::spawn(async move { metrics.serve(listener).await });

        // Gauge sampler: the pipeline never blocks on metrics, so the
        // point-in-time values are scraped off the services periodically.
        {
            let metrics = container.metrics.clone();
            let store = container.store.clone();
            let broadcaster = container.broadcaster.clone();
            let enricher = container.enricher.clone();
            let spot = container.spot.clone();
            let query = container.query.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(METRICS_SAMPLE_INTERVAL);
                loop {
                    ticker.tick().await;
                    metrics.set_store_size(store.len());
                    metrics.set_subscriber_count(broadcaster.subscriber_count());
                    metrics.set_broadcast_frames(broadcaster.frames_sent());
                    let counters = enricher.counters();
                    let stats = query.stats();
                    info!(
                        "pipeline: store={} emitted={} discarded={} sweeps={}c/{}p spot_cache={}",
                        store.len(),
                        counters.emitted.load(Ordering::Relaxed),
                        counters.discarded_total(),
                        stats.call_sweeps,
                        stats.put_sweeps,
                        spot.cached_len(),
                    );
                }
            });
        }

        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        Ok::<(), std::io::Error>(())
    })?;

    container.ingestion.stop()?;
    Ok(())
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

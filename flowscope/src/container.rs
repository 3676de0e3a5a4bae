use std::sync::Arc;

use broadcaster::Broadcaster;
use core_types::config::AppConfig;
use data_client::{DataClientError, MassiveClient};
use enrichment_engine::Enricher;
use flow_scanner::Scanner;
use gex_engine::GexEngine;
use ingestion_service::{IngestionConfig, IngestionDeps, IngestionService};
use metrics::Metrics;
use query_engine::QueryEngine;
use spot_cache::SpotCache;
use thiserror::Error;
use trade_store::TradeStore;

/// Process-scoped services, built once at startup and handed to whatever
/// surface needs them. No hidden globals; the outer router receives this
/// container and the data plane never reaches for ambient state.
pub struct ServiceContainer {
    pub client: Arc<MassiveClient>,
    pub spot: Arc<SpotCache>,
    pub enricher: Arc<Enricher>,
    pub store: Arc<TradeStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub metrics: Arc<Metrics>,
    pub ingestion: IngestionService,
    pub query: Arc<QueryEngine>,
    pub gex: Arc<GexEngine>,
    pub scanner: Arc<Scanner>,
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Client(#[from] DataClientError),
}

impl ServiceContainer {
    pub fn build(config: &AppConfig) -> Result<Self, ContainerError> {
        let client = Arc::new(MassiveClient::new(&config.rest_base_url, &config.api_key)?);
        let spot = Arc::new(SpotCache::new(client.clone()));
        let enricher = Arc::new(Enricher::new(spot.clone()));
        let store = Arc::new(TradeStore::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let metrics = Arc::new(Metrics::new());
        let gex = Arc::new(GexEngine::new(client.clone()));
        let ingestion = IngestionService::new(
            IngestionConfig::new(
                &config.options_ws_url,
                &config.api_key,
                config.hot_tickers.clone(),
            ),
            IngestionDeps {
                client: client.clone(),
                enricher: enricher.clone(),
                store: store.clone(),
                broadcaster: broadcaster.clone(),
                metrics: metrics.clone(),
            },
        );
        let query = Arc::new(QueryEngine::new(
            store.clone(),
            client.clone(),
            enricher.clone(),
        ));
        let scanner = Arc::new(Scanner::new(
            client.clone(),
            enricher.clone(),
            spot.clone(),
            gex.clone(),
        ));
        Ok(Self {
            client,
            spot,
            enricher,
            store,
            broadcaster,
            metrics,
            ingestion,
            query,
            gex,
            scanner,
        })
    }
}

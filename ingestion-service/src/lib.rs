//! Vendor ingestion: the live options websocket session plus the periodic
//! REST backfill loop, behind one Engine lifecycle.

mod backfill;
mod ws;

pub use backfill::{backfill_once, BackfillOutcome};
pub use ws::WsSessionState;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use broadcaster::Broadcaster;
use data_client::MassiveClient;
use engine_api::{EngineError, EngineResult, FeedEngine, FeedHealth};
use enrichment_engine::Enricher;
use log::{error, info};
use metrics::Metrics;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trade_store::TradeStore;

pub const DEFAULT_BACKFILL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKFILL_WARMUP: Duration = Duration::from_secs(2);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct IngestionConfig {
    pub options_ws_url: String,
    pub api_key: String,
    pub hot_tickers: Vec<String>,
    pub backfill_interval: Duration,
    pub backfill_warmup: Duration,
    pub reconnect_delay: Duration,
}

impl IngestionConfig {
    pub fn new(
        options_ws_url: impl Into<String>,
        api_key: impl Into<String>,
        hot_tickers: Vec<String>,
    ) -> Self {
        Self {
            options_ws_url: options_ws_url.into(),
            api_key: api_key.into(),
            hot_tickers,
            backfill_interval: DEFAULT_BACKFILL_INTERVAL,
            backfill_warmup: DEFAULT_BACKFILL_WARMUP,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// The pipeline pieces the ingestor writes into.
#[derive(Clone)]
pub struct IngestionDeps {
    pub client: Arc<MassiveClient>,
    pub enricher: Arc<Enricher>,
    pub store: Arc<TradeStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("vendor rejected websocket credentials")]
    AuthFailed,
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

pub struct IngestionService {
    inner: Arc<IngestionInner>,
}

impl IngestionService {
    pub fn new(config: IngestionConfig, deps: IngestionDeps) -> Self {
        Self {
            inner: Arc::new(IngestionInner {
                config,
                deps,
                state: Mutex::new(RuntimeState::Stopped),
                health: Mutex::new(FeedHealth::idle()),
                backfill_in_flight: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Fire-and-forget backfill trigger. Returns the current store size
    /// immediately; the refresh itself runs on the engine runtime, and a
    /// trigger while one is already running is a no-op.
    pub fn trigger_refresh(&self) -> usize {
        self.inner.trigger_refresh()
    }
}

impl FeedEngine for IngestionService {
    fn start(&self) -> EngineResult<()> {
        self.inner.start()
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn health(&self) -> FeedHealth {
        self.inner.health()
    }
}

struct IngestionInner {
    config: IngestionConfig,
    deps: IngestionDeps,
    state: Mutex<RuntimeState>,
    health: Mutex<FeedHealth>,
    backfill_in_flight: Arc<AtomicBool>,
}

enum RuntimeState {
    Stopped,
    Running(RuntimeBundle),
}

struct RuntimeBundle {
    runtime: Runtime,
    ws_handle: JoinHandle<()>,
    backfill_handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl IngestionInner {
    fn start(self: &Arc<Self>) -> EngineResult<()> {
        let mut guard = self.state.lock();
        if matches!(*guard, RuntimeState::Running(_)) {
            return Err(EngineError::AlreadyStarted);
        }
        if self.config.hot_tickers.is_empty() {
            return Err(EngineError::startup("no hot tickers configured"));
        }
        self.set_health(FeedHealth::starting());
        let runtime = Runtime::new().map_err(EngineError::startup)?;
        let cancel = CancellationToken::new();

        let ws_handle = {
            let inner = Arc::clone(self);
            let cancel = cancel.clone();
            runtime.spawn(async move { ws::run_ws(inner, cancel).await })
        };
        let backfill_handle = {
            let inner = Arc::clone(self);
            let cancel = cancel.clone();
            runtime.spawn(async move { backfill::run_backfill(inner, cancel).await })
        };

        *guard = RuntimeState::Running(RuntimeBundle {
            runtime,
            ws_handle,
            backfill_handle,
            cancel,
        });
        self.set_health(FeedHealth::live("streaming"));
        info!("ingestion service started");
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        let bundle = {
            let mut guard = self.state.lock();
            match std::mem::replace(&mut *guard, RuntimeState::Stopped) {
                RuntimeState::Running(bundle) => bundle,
                RuntimeState::Stopped => return Err(EngineError::NotStarted),
            }
        };
        bundle.cancel.cancel();
        let RuntimeBundle {
            runtime,
            ws_handle,
            backfill_handle,
            ..
        } = bundle;
        runtime.block_on(async {
            if let Err(err) = ws_handle.await {
                if !err.is_cancelled() {
                    error!("ws task join error: {err}");
                }
            }
            if let Err(err) = backfill_handle.await {
                if !err.is_cancelled() {
                    error!("backfill task join error: {err}");
                }
            }
        });
        self.set_health(FeedHealth::stopped("engine stopped"));
        info!("ingestion service stopped");
        Ok(())
    }

    fn health(&self) -> FeedHealth {
        self.health.lock().clone()
    }

    fn set_health(&self, health: FeedHealth) {
        *self.health.lock() = health;
    }

    fn trigger_refresh(self: &Arc<Self>) -> usize {
        let guard = self.state.lock();
        if let RuntimeState::Running(bundle) = &*guard {
            let inner = Arc::clone(self);
            bundle.runtime.handle().spawn(async move {
                // Live refresh path: a heavily filled store sweeps first.
                if inner.deps.store.wants_forced_sweep() {
                    inner.deps.store.age_sweep(trade_store::MAX_AGE_SECS);
                }
                backfill::guarded_backfill(&inner).await;
            });
        }
        self.deps.store.len()
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use spot_cache::SpotCache;

    pub(crate) fn shared_metrics() -> Arc<Metrics> {
        // The prometheus default registry rejects duplicate registration, so
        // every test shares one Metrics instance.
        static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();
        METRICS.get_or_init(|| Arc::new(Metrics::new())).clone()
    }

    pub(crate) fn test_deps() -> IngestionDeps {
        let client = Arc::new(MassiveClient::new("http://127.0.0.1:1", "k").unwrap());
        IngestionDeps {
            client: client.clone(),
            enricher: Arc::new(Enricher::new(Arc::new(SpotCache::new(client)))),
            store: Arc::new(TradeStore::with_capacity(100)),
            broadcaster: Arc::new(Broadcaster::new()),
            metrics: shared_metrics(),
        }
    }

    pub(crate) fn test_inner(deps: IngestionDeps) -> Arc<IngestionInner> {
        Arc::new(IngestionInner {
            config: IngestionConfig::new("ws://127.0.0.1:1/ws", "k", vec!["SPY".to_string()]),
            deps,
            state: Mutex::new(RuntimeState::Stopped),
            health: Mutex::new(FeedHealth::idle()),
            backfill_in_flight: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::test_deps;
    use super::*;

    #[test]
    fn start_twice_reports_already_started() {
        let config = IngestionConfig::new("ws://127.0.0.1:1/ws", "k", vec!["SPY".to_string()]);
        let service = IngestionService::new(config, test_deps());
        service.start().unwrap();
        assert!(matches!(service.start(), Err(EngineError::AlreadyStarted)));
        service.stop().unwrap();
        assert!(matches!(service.stop(), Err(EngineError::NotStarted)));
    }

    #[test]
    fn refuses_empty_hot_ticker_set() {
        let config = IngestionConfig::new("ws://127.0.0.1:1/ws", "k", Vec::new());
        let service = IngestionService::new(config, test_deps());
        assert!(matches!(service.start(), Err(EngineError::Startup { .. })));
    }

    #[test]
    fn health_follows_lifecycle() {
        let config = IngestionConfig::new("ws://127.0.0.1:1/ws", "k", vec!["SPY".to_string()]);
        let service = IngestionService::new(config, test_deps());
        assert_eq!(service.health().state, engine_api::FeedState::Idle);
        service.start().unwrap();
        assert!(service.health().is_live());
        service.stop().unwrap();
        assert_eq!(service.health().state, engine_api::FeedState::Stopped);
    }
}

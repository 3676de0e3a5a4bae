//! Periodic REST backfill over the hot-ticker snapshot endpoint.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use core_types::raw::OptionSnapshot;
use data_client::{DataClientError, HOT_PATH_TIMEOUT};
use enrichment_engine::FeedSource;
use log::{debug, info, warn};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{IngestionDeps, IngestionInner};

/// Snapshot pages walked per ticker, and the raise once the store is large.
pub const PAGE_BUDGET: usize = 5;
pub const PAGE_BUDGET_LARGE_STORE: usize = 10;
/// Results enriched synchronously before the rest is handed off.
pub const SYNC_BATCH: usize = 500;

#[derive(Debug, Default, Clone, Copy)]
pub struct BackfillOutcome {
    pub tickers_fetched: usize,
    pub snapshots_fetched: usize,
    pub inserted_sync: usize,
    pub deferred: usize,
}

pub(crate) async fn run_backfill(inner: Arc<IngestionInner>, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(inner.config.backfill_warmup) => {}
    }
    let mut ticker = interval(inner.config.backfill_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                guarded_backfill(&inner).await;
            }
        }
    }
    debug!("backfill loop exiting");
}

/// In-flight guard: a run that lands while another is active is a no-op.
pub(crate) async fn guarded_backfill(inner: &Arc<IngestionInner>) {
    if inner.backfill_in_flight.swap(true, Ordering::SeqCst) {
        debug!("backfill already running; skipping");
        return;
    }
    let outcome = backfill_once(&inner.deps, &inner.config.hot_tickers).await;
    inner.backfill_in_flight.store(false, Ordering::SeqCst);
    if outcome.snapshots_fetched > 0 {
        info!(
            "backfill: {} snapshots over {} tickers, {} inserted inline, {} deferred",
            outcome.snapshots_fetched,
            outcome.tickers_fetched,
            outcome.inserted_sync,
            outcome.deferred
        );
    }
}

/// One backfill cycle: age sweeps, per-ticker cursor walks, enrichment.
/// The first `SYNC_BATCH` results are processed before returning; the
/// remainder is scheduled in batches so the caller comes back promptly.
pub async fn backfill_once(deps: &IngestionDeps, hot_tickers: &[String]) -> BackfillOutcome {
    let mut outcome = BackfillOutcome::default();
    if deps.store.wants_age_sweep() {
        deps.store.age_sweep(trade_store::MAX_AGE_SECS);
    }
    let page_budget = if deps.store.fill_fraction() > 0.5 {
        PAGE_BUDGET_LARGE_STORE
    } else {
        PAGE_BUDGET
    };

    let mut collected: Vec<(String, OptionSnapshot)> = Vec::new();
    for ticker in hot_tickers {
        match deps
            .client
            .fetch_option_chain(ticker, None, page_budget, HOT_PATH_TIMEOUT)
            .await
        {
            Ok(fetch) => {
                if fetch.rate_limited {
                    deps.metrics.inc_rate_limited();
                }
                outcome.tickers_fetched += 1;
                outcome.snapshots_fetched += fetch.snapshots.len();
                collected.extend(
                    fetch
                        .snapshots
                        .into_iter()
                        .map(|snapshot| (ticker.clone(), snapshot)),
                );
            }
            Err(DataClientError::Unauthorized) => {
                deps.metrics.inc_unauthorized();
                warn!("[{ticker}] backfill unauthorized; skipping ticker");
            }
            Err(err) => {
                warn!("[{ticker}] backfill fetch failed: {err}");
            }
        }
    }

    let deferred: Vec<(String, OptionSnapshot)> = if collected.len() > SYNC_BATCH {
        collected.split_off(SYNC_BATCH)
    } else {
        Vec::new()
    };
    outcome.deferred = deferred.len();
    outcome.inserted_sync = process_batch(deps, collected).await;
    deps.metrics.inc_backfill_runs();
    deps.metrics.set_store_size(deps.store.len());

    for chunk in deferred.chunks(SYNC_BATCH) {
        let deps = deps.clone();
        let chunk: Vec<(String, OptionSnapshot)> = chunk.to_vec();
        tokio::spawn(async move {
            let inserted = process_batch(&deps, chunk).await;
            deps.metrics.set_store_size(deps.store.len());
            debug!("deferred backfill batch inserted {inserted}");
        });
    }
    outcome
}

async fn process_batch(deps: &IngestionDeps, batch: Vec<(String, OptionSnapshot)>) -> usize {
    let mut inserted = 0usize;
    for (ticker, snapshot) in batch {
        match deps
            .enricher
            .enrich_snapshot(&snapshot, Some(&ticker), FeedSource::RestBackfill)
            .await
        {
            Ok(flow) => {
                deps.store.insert(flow);
                inserted += 1;
            }
            Err(err) => {
                deps.metrics.inc_discarded(crate::ws::discard_label(&err), 1);
            }
        }
    }
    if inserted > 0 {
        deps.metrics.inc_ingested(inserted as u64);
    }
    inserted
}

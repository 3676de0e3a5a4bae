// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Filtered, sorted, paginated reads over the trade store.

pub mod filter;

pub use filter::{apply_filter, paginate, sort_flows, CountRange, FlowFilter, Page, PriceRange, SortKey};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use core_types::types::{FlowRecord, OptionKind, Sentiment, TradeType};
use data_client::{MassiveClient, HOT_PATH_TIMEOUT};
use enrichment_engine::{Enricher, FeedSource};
use log::warn;
use serde::Serialize;
use trade_store::TradeStore;

/// Cap on the ticker-scoped direct fetch path.
pub const TICKER_FETCH_CAP: usize = 2_000;

/// Page-level sentiment summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallSentiment {
    pub sentiment: String,
    pub bullish_premium_share: f64,
    pub net_premium: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowQueryResponse {
    pub success: bool,
    pub count: usize,
    pub total_count: usize,
    pub page: usize,
    pub total_pages: usize,
    pub limit: usize,
    pub flows: Vec<FlowRecord>,
    /// Legacy alias kept for older clients; same rows as `flows`.
    pub trades: Vec<FlowRecord>,
    pub store_size: usize,
    pub market_status: String,
    pub overall_sentiment: OverallSentiment,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStats {
    pub total_trades: usize,
    pub total_premium: f64,
    pub call_sweeps: usize,
    pub put_sweeps: usize,
    pub call_put_ratio: f64,
    pub put_volume: u64,
    pub unusual_activity: usize,
}

/// Sentiment of one page of flows, premium-weighted.
pub fn overall_sentiment(flows: &[FlowRecord]) -> OverallSentiment {
    let mut bull = 0.0;
    let mut bear = 0.0;
    for flow in flows {
        match flow.sentiment {
            Sentiment::Bull => bull += flow.premium,
            Sentiment::Bear => bear += flow.premium,
            Sentiment::Neutral => {}
        }
    }
    let directional = bull + bear;
    let share = if directional > 0.0 { bull / directional } else { 0.5 };
    let sentiment = if share > 0.55 {
        "Bullish"
    } else if share < 0.45 {
        "Bearish"
    } else {
        "Neutral"
    };
    OverallSentiment {
        sentiment: sentiment.to_string(),
        bullish_premium_share: share,
        net_premium: bull - bear,
    }
}

/// Store-wide stats summary.
pub fn flow_stats(flows: &[FlowRecord]) -> FlowStats {
    let mut call_sweeps = 0usize;
    let mut put_sweeps = 0usize;
    let mut call_volume = 0u64;
    let mut put_volume = 0u64;
    let mut total_premium = 0.0;
    let mut unusual_activity = 0usize;
    for flow in flows {
        total_premium += flow.premium;
        if flow.high_probability {
            unusual_activity += 1;
        }
        match flow.kind {
            OptionKind::Call => {
                call_volume += flow.volume;
                if flow.trade_type == TradeType::Sweep {
                    call_sweeps += 1;
                }
            }
            OptionKind::Put => {
                put_volume += flow.volume;
                if flow.trade_type == TradeType::Sweep {
                    put_sweeps += 1;
                }
            }
        }
    }
    let call_put_ratio = if put_volume > 0 {
        call_volume as f64 / put_volume as f64
    } else if call_volume > 0 {
        f64::INFINITY
    } else {
        0.0
    };
    FlowStats {
        total_trades: flows.len(),
        total_premium,
        call_sweeps,
        put_sweeps,
        call_put_ratio,
        put_volume,
        unusual_activity,
    }
}

pub struct QueryEngine {
    store: Arc<TradeStore>,
    client: Arc<MassiveClient>,
    enricher: Arc<Enricher>,
}

impl QueryEngine {
    pub fn new(store: Arc<TradeStore>, client: Arc<MassiveClient>, enricher: Arc<Enricher>) -> Self {
        Self {
            store,
            client,
            enricher,
        }
    }

    /// Run one query: candidate set, predicates, full sort, page slice.
    ///
    /// A ticker filter switches to a direct vendor snapshot of that ticker
    /// (capped at 2 000 contracts) so thin tickers outside the hot set still
    /// answer; any vendor failure falls back to the store.
    pub async fn query(
        &self,
        filter: &FlowFilter,
        sort: SortKey,
        page: usize,
        limit: usize,
    ) -> FlowQueryResponse {
        let candidates = match &filter.ticker {
            Some(ticker) => match self.ticker_scoped_fetch(ticker).await {
                Some(flows) => flows,
                None => self.store.snapshot(),
            },
            None => self.store.snapshot(),
        };
        let mut matched = apply_filter(filter, candidates);
        sort_flows(sort, &mut matched);
        let page = paginate(matched, page, limit);
        let market_status = self.client.market_status().await;
        let overall = overall_sentiment(&page.items);
        FlowQueryResponse {
            success: true,
            count: page.items.len(),
            total_count: page.total_count,
            page: page.page,
            total_pages: page.total_pages,
            limit: page.limit,
            trades: page.items.clone(),
            flows: page.items,
            store_size: self.store.len(),
            market_status: market_status.label().to_string(),
            overall_sentiment: overall,
        }
    }

    /// Stats over the whole store.
    pub fn stats(&self) -> FlowStats {
        flow_stats(&self.store.snapshot())
    }

    async fn ticker_scoped_fetch(&self, ticker: &str) -> Option<Vec<FlowRecord>> {
        let max_pages = TICKER_FETCH_CAP / data_client::SNAPSHOT_PAGE_LIMIT;
        let fetch = match self
            .client
            .fetch_option_chain(ticker, None, max_pages, HOT_PATH_TIMEOUT)
            .await
        {
            Ok(fetch) => fetch,
            Err(err) => {
                warn!("ticker-scoped fetch for {ticker} failed: {err}; serving store");
                return None;
            }
        };
        if fetch.snapshots.is_empty() {
            return None;
        }
        let mut flows = Vec::with_capacity(fetch.snapshots.len().min(TICKER_FETCH_CAP));
        for snapshot in fetch.snapshots.into_iter().take(TICKER_FETCH_CAP) {
            if let Ok(flow) = self
                .enricher
                .enrich_snapshot(&snapshot, Some(ticker), FeedSource::RestBackfill)
                .await
            {
                flows.push(flow);
            }
        }
        Some(flows)
    }
}

/// Liveness payload served by the outer router.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub service: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        let now: DateTime<Utc> = Utc::now();
        Self {
            status: "ok".to_string(),
            timestamp: now.to_rfc3339(),
            service: "flowscope".to_string(),
        }
    }
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared REST client for the Massive vendor API.
//!
//! All vendor access flows through here: authenticated GETs with per-call
//! timeouts, cursor pagination, rate-limit handling, and market-status
//! lookups. `next_url` cursors may come back without credentials, so the
//! apiKey query parameter is re-injected on every page unconditionally.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use core_types::raw::{
    ContractsEnvelope, MarketStatusResponse, OptionSnapshot, PrevAggResponse, SnapshotEnvelope,
};
use core_types::retry::RetryPolicy;
use core_types::types::MarketStatus;
use log::{debug, warn};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

/// Vendor maximum page size for snapshot/reference endpoints.
pub const SNAPSHOT_PAGE_LIMIT: usize = 100;
/// Pause between cursor pages so a long chain walk does not burst.
pub const INTER_PAGE_DELAY: Duration = Duration::from_millis(75);
/// Back-off applied once when the vendor answers 429.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

pub const SPOT_TIMEOUT: Duration = Duration::from_secs(10);
pub const HOT_PATH_TIMEOUT: Duration = Duration::from_secs(15);
pub const CHAIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(60);

const STATUS_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DataClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid vendor url: {0}")]
    Url(#[from] url::ParseError),
    #[error("vendor rejected credentials (401)")]
    Unauthorized,
    #[error("vendor rate limit hit (429)")]
    RateLimited,
    #[error("vendor resource not found")]
    NotFound,
    #[error("vendor returned status {0}")]
    Status(u16),
}

impl DataClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DataClientError::Unauthorized)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DataClientError::RateLimited)
    }
}

/// Result of walking a paginated snapshot endpoint.
#[derive(Debug, Default)]
pub struct ChainFetch {
    pub snapshots: Vec<OptionSnapshot>,
    pub pages_fetched: usize,
    /// True when the walk stopped early on a repeated 429.
    pub rate_limited: bool,
}

pub struct MassiveClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    status_cache: Mutex<Option<(MarketStatus, Instant)>>,
    status_retry: RetryPolicy,
}

impl MassiveClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, DataClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("flowscope/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
            status_cache: Mutex::new(None),
            status_retry: RetryPolicy::default_network(),
        })
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url.query_pairs_mut().append_pair("apiKey", &self.api_key);
        url
    }

    /// Snapshot page URL for a ticker, optionally pinned to one expiration.
    pub fn snapshot_url(&self, ticker: &str, expiration: Option<NaiveDate>) -> Url {
        let mut url = self.endpoint(&format!("/v3/snapshot/options/{ticker}"));
        url.query_pairs_mut()
            .append_pair("limit", &SNAPSHOT_PAGE_LIMIT.to_string());
        if let Some(date) = expiration {
            url.query_pairs_mut()
                .append_pair("expiration_date", &date.format("%Y-%m-%d").to_string());
        }
        url
    }

    /// Parse a `next_url` cursor and force the apiKey parameter onto it.
    /// Cursors sometimes come back with credentials stripped; the URL is
    /// never trusted to carry them. When the cursor does not parse, the key
    /// is appended textually as a last resort.
    pub fn reinject_api_key(&self, next_url: &str) -> Result<Url, DataClientError> {
        match Url::parse(next_url) {
            Ok(mut url) => {
                let without_key: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| k != "apiKey")
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                url.query_pairs_mut().clear();
                for (k, v) in without_key {
                    url.query_pairs_mut().append_pair(&k, &v);
                }
                url.query_pairs_mut().append_pair("apiKey", &self.api_key);
                Ok(url)
            }
            Err(_) => {
                let sep = if next_url.contains('?') { '&' } else { '?' };
                let patched = format!("{next_url}{sep}apiKey={}", self.api_key);
                Url::parse(&patched)
                    .or_else(|_| self.base_url.join(&patched))
                    .map_err(DataClientError::from)
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        timeout: Duration,
    ) -> Result<T, DataClientError> {
        let response = self.http.get(url).timeout(timeout).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DataClientError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(DataClientError::RateLimited),
            StatusCode::NOT_FOUND => Err(DataClientError::NotFound),
            status if !status.is_success() => Err(DataClientError::Status(status.as_u16())),
            _ => Ok(response.json::<T>().await?),
        }
    }

    /// Fetch one snapshot page.
    pub async fn snapshot_page(
        &self,
        url: Url,
        timeout: Duration,
    ) -> Result<SnapshotEnvelope, DataClientError> {
        self.get_json(url, timeout).await
    }

    /// Walk the snapshot endpoint for a ticker following `next_url` cursors.
    ///
    /// Stops when the cursor runs out or `max_pages` is reached. A 429
    /// sleeps 2 s and retries the same page once; a second 429 ends the walk
    /// with what was collected. A 401 on the first page propagates; later it
    /// ends the walk.
    pub async fn fetch_option_chain(
        &self,
        ticker: &str,
        expiration: Option<NaiveDate>,
        max_pages: usize,
        timeout: Duration,
    ) -> Result<ChainFetch, DataClientError> {
        let mut fetch = ChainFetch::default();
        let mut next = Some(self.snapshot_url(ticker, expiration));
        let mut retried_rate_limit = false;
        while let Some(url) = next.take() {
            if fetch.pages_fetched >= max_pages {
                break;
            }
            let envelope = match self.snapshot_page(url.clone(), timeout).await {
                Ok(envelope) => {
                    retried_rate_limit = false;
                    envelope
                }
                Err(DataClientError::RateLimited) => {
                    if retried_rate_limit {
                        warn!("[{ticker}] repeated 429; abandoning chain walk");
                        fetch.rate_limited = true;
                        break;
                    }
                    retried_rate_limit = true;
                    sleep(RATE_LIMIT_BACKOFF).await;
                    next = Some(url);
                    continue;
                }
                Err(DataClientError::Unauthorized) => {
                    if fetch.pages_fetched == 0 {
                        return Err(DataClientError::Unauthorized);
                    }
                    warn!("[{ticker}] 401 mid-pagination; stopping");
                    break;
                }
                Err(err) => {
                    if fetch.pages_fetched == 0 {
                        return Err(err);
                    }
                    warn!("[{ticker}] chain page failed: {err}; stopping");
                    break;
                }
            };
            fetch.pages_fetched += 1;
            if let Some(results) = envelope.results {
                fetch.snapshots.extend(results);
            }
            next = match envelope.next_url {
                Some(cursor) => Some(self.reinject_api_key(&cursor)?),
                None => None,
            };
            if next.is_some() {
                sleep(INTER_PAGE_DELAY).await;
            }
        }
        debug!(
            "[{ticker}] chain fetch: {} contracts over {} page(s)",
            fetch.snapshots.len(),
            fetch.pages_fetched
        );
        Ok(fetch)
    }

    /// Enumerate available expirations via the reference contracts endpoint.
    pub async fn option_expirations(
        &self,
        ticker: &str,
        max_pages: usize,
    ) -> Result<Vec<NaiveDate>, DataClientError> {
        let mut url = self.endpoint("/v3/reference/options/contracts");
        url.query_pairs_mut()
            .append_pair("underlying_ticker", ticker)
            .append_pair("limit", &SNAPSHOT_PAGE_LIMIT.to_string());
        let mut dates = BTreeSet::new();
        let mut next = Some(url);
        let mut pages = 0usize;
        while let Some(current) = next.take() {
            if pages >= max_pages {
                break;
            }
            let envelope: ContractsEnvelope = self.get_json(current, ENUMERATION_TIMEOUT).await?;
            pages += 1;
            for contract in envelope.results.unwrap_or_default() {
                if let Some(raw) = contract.expiration_date.as_deref() {
                    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                        dates.insert(date);
                    }
                }
            }
            next = match envelope.next_url {
                Some(cursor) => Some(self.reinject_api_key(&cursor)?),
                None => None,
            };
            if next.is_some() {
                sleep(INTER_PAGE_DELAY).await;
            }
        }
        Ok(dates.into_iter().collect())
    }

    /// Previous-session close for an underlying (`/v2/aggs/ticker/<T>/prev`).
    pub async fn previous_close(&self, ticker: &str) -> Result<Option<f64>, DataClientError> {
        let url = self.endpoint(&format!("/v2/aggs/ticker/{ticker}/prev"));
        let response: PrevAggResponse = self.get_json(url, SPOT_TIMEOUT).await?;
        Ok(response
            .results
            .and_then(|bars| bars.into_iter().next())
            .and_then(|bar| bar.c)
            .filter(|c| c.is_finite() && *c > 0.0))
    }

    /// Current market status, cached for 30 s. Failures degrade to Unknown
    /// rather than propagating; this feeds display fields and soft gates.
    pub async fn market_status(&self) -> MarketStatus {
        if let Some((status, at)) = *self.status_cache.lock() {
            if at.elapsed() < STATUS_CACHE_TTL {
                return status;
            }
        }
        let url = self.endpoint("/v1/marketstatus/now");
        let fetched = self
            .status_retry
            .retry_async(|_| {
                let url = url.clone();
                async move {
                    self.get_json::<MarketStatusResponse>(url, SPOT_TIMEOUT)
                        .await
                }
            })
            .await;
        let status = match fetched {
            Ok(response) => response.status(),
            Err(err) => {
                debug!("market status lookup failed: {err}");
                MarketStatus::Unknown
            }
        };
        *self.status_cache.lock() = Some((status, Instant::now()));
        status
    }
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Cached, rate-limited underlying last-price lookups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use data_client::{DataClientError, MassiveClient};
use log::warn;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

pub const SPOT_TTL: Duration = Duration::from_secs(300);
pub const MIN_FETCH_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy)]
struct CachedSpot {
    price: f64,
    fetched_at: Instant,
}

/// Underlying spot oracle. Cache hits inside the TTL return immediately;
/// misses funnel through a single async gate so the vendor sees at most one
/// lookup per 200 ms regardless of caller count. 429/401 answers degrade to
/// None without logging.
pub struct SpotCache {
    client: Arc<MassiveClient>,
    prices: Mutex<HashMap<String, CachedSpot>>,
    gate: AsyncMutex<Option<Instant>>,
    failures: AtomicU64,
    ttl: Duration,
    min_interval: Duration,
}

impl SpotCache {
    pub fn new(client: Arc<MassiveClient>) -> Self {
        Self::with_params(client, SPOT_TTL, MIN_FETCH_INTERVAL)
    }

    pub fn with_params(client: Arc<MassiveClient>, ttl: Duration, min_interval: Duration) -> Self {
        Self {
            client,
            prices: Mutex::new(HashMap::new()),
            gate: AsyncMutex::new(None),
            failures: AtomicU64::new(0),
            ttl,
            min_interval,
        }
    }

    /// Seed the cache from a price observed elsewhere (e.g. the snapshot
    /// feed's `underlying_asset.price`), sparing a vendor round-trip.
    pub fn prime(&self, underlying: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        self.prices.lock().insert(
            underlying.to_ascii_uppercase(),
            CachedSpot {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    fn cached(&self, key: &str) -> Option<f64> {
        let guard = self.prices.lock();
        guard
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.price)
    }

    /// Last price for an underlying, or None when unavailable. Unknown spot
    /// stays unknown; callers skip moneyness math rather than receive a
    /// fabricated value.
    pub async fn get(&self, underlying: &str) -> Option<f64> {
        let key = underlying.to_ascii_uppercase();
        if let Some(price) = self.cached(&key) {
            return Some(price);
        }
        // Shared gate: one miss at a time, paced to the vendor budget.
        {
            let mut last_fetch = self.gate.lock().await;
            if let Some(price) = self.cached(&key) {
                return Some(price);
            }
            if let Some(last) = *last_fetch {
                let since = last.elapsed();
                if since < self.min_interval {
                    sleep(self.min_interval - since).await;
                }
            }
            *last_fetch = Some(Instant::now());
        }
        match self.client.previous_close(&key).await {
            Ok(Some(price)) => {
                self.prices.lock().insert(
                    key,
                    CachedSpot {
                        price,
                        fetched_at: Instant::now(),
                    },
                );
                Some(price)
            }
            Ok(None) => None,
            Err(DataClientError::RateLimited) | Err(DataClientError::Unauthorized) => None,
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("spot lookup failed for {underlying}: {err}");
                None
            }
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn cached_len(&self) -> usize {
        self.prices.lock().len()
    }
}

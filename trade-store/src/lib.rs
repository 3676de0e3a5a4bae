// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Bounded, insertion-ordered flow store.
//!
//! One writer path (the ingestor) and many readers. Readers take the lock
//! just long enough to copy the values out in insertion order; filtering and
//! sorting happen on the copy.

use std::collections::{HashMap, VecDeque};

use chrono::{Duration as ChronoDuration, Utc};
use core_types::types::FlowRecord;
use log::debug;
use parking_lot::Mutex;

pub const MAX_RECORDS: usize = 100_000;
/// Records older than this are dropped by an age sweep.
pub const MAX_AGE_SECS: i64 = 120;
/// Age sweeps start once the store passes this fill fraction.
pub const AGE_SWEEP_FILL: f64 = 0.5;
/// Above this fill fraction a live refresh sweeps unconditionally.
pub const FORCED_SWEEP_FILL: f64 = 0.8;

struct StoreInner {
    records: HashMap<String, FlowRecord>,
    order: VecDeque<String>,
}

pub struct TradeStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl Default for TradeStore {
    fn default() -> Self {
        Self::with_capacity(MAX_RECORDS)
    }
}

impl TradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                records: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Insert a flow, evicting the oldest-inserted entries first when at
    /// capacity. Re-inserting an existing id replaces the value in place.
    pub fn insert(&self, flow: FlowRecord) {
        let id = flow.flow_id();
        let mut inner = self.inner.lock();
        if inner.records.insert(id.clone(), flow).is_some() {
            return;
        }
        inner.order.push_back(id);
        while inner.records.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.records.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Drop every record whose event time is older than `max_age_secs`.
    /// Returns the number removed.
    pub fn age_sweep(&self, max_age_secs: i64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds(max_age_secs);
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        let stale: Vec<String> = inner
            .records
            .iter()
            .filter(|(_, flow)| flow.timestamp < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.records.remove(id);
        }
        if !stale.is_empty() {
            let StoreInner { records, order } = &mut *inner;
            order.retain(|id| records.contains_key(id));
            debug!("age sweep removed {} of {} records", stale.len(), before);
        }
        stale.len()
    }

    /// Copy of the current values in insertion order.
    pub fn snapshot(&self) -> Vec<FlowRecord> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fill_fraction(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Whether the pre-refresh age sweep should run.
    pub fn wants_age_sweep(&self) -> bool {
        self.fill_fraction() > AGE_SWEEP_FILL
    }

    /// Whether a live refresh must sweep regardless of record age mix.
    pub fn wants_forced_sweep(&self) -> bool {
        self.fill_fraction() > FORCED_SWEEP_FILL
    }
}

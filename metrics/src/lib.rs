// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Prometheus metrics for the flow pipeline. hyper v1.+

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use log::warn;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use tokio::net::TcpListener;

pub struct Metrics {
    ingested_flows: IntCounter,
    discarded_records: IntCounterVec,
    backfill_runs: IntCounter,
    vendor_rate_limits: IntCounter,
    vendor_auth_failures: IntCounter,
    ws_reconnects: IntCounter,
    broadcast_frames: IntGauge,
    store_size: IntGauge,
    subscriber_count: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ingested_flows: register_int_counter!(
                "flow_ingested_total",
                "Flow records accepted into the trade store"
            )
            .unwrap(),
            discarded_records: register_int_counter_vec!(
                "flow_discarded_total",
                "Raw records dropped before the store, by reason",
                &["reason"]
            )
            .unwrap(),
            backfill_runs: register_int_counter!(
                "flow_backfill_runs_total",
                "Completed REST backfill cycles"
            )
            .unwrap(),
            vendor_rate_limits: register_int_counter!(
                "vendor_rate_limited_total",
                "Vendor 429 responses observed"
            )
            .unwrap(),
            vendor_auth_failures: register_int_counter!(
                "vendor_unauthorized_total",
                "Vendor 401 responses observed"
            )
            .unwrap(),
            ws_reconnects: register_int_counter!(
                "ws_reconnects_total",
                "Vendor websocket reconnect attempts"
            )
            .unwrap(),
            broadcast_frames: register_int_gauge!(
                "broadcast_frames",
                "Frames fanned out to live subscribers"
            )
            .unwrap(),
            store_size: register_int_gauge!("trade_store_size", "Flow records currently held")
                .unwrap(),
            subscriber_count: register_int_gauge!(
                "live_subscribers",
                "Connected live-flow subscribers"
            )
            .unwrap(),
        }
    }

    pub fn inc_ingested(&self, count: u64) {
        self.ingested_flows.inc_by(count);
    }

    pub fn inc_discarded(&self, reason: &str, count: u64) {
        self.discarded_records.with_label_values(&[reason]).inc_by(count);
    }

    pub fn inc_backfill_runs(&self) {
        self.backfill_runs.inc();
    }

    pub fn inc_rate_limited(&self) {
        self.vendor_rate_limits.inc();
    }

    pub fn inc_unauthorized(&self) {
        self.vendor_auth_failures.inc();
    }

    pub fn inc_ws_reconnects(&self) {
        self.ws_reconnects.inc();
    }

    pub fn set_broadcast_frames(&self, value: u64) {
        self.broadcast_frames.set(value as i64);
    }

    pub fn set_store_size(&self, value: usize) {
        self.store_size.set(value as i64);
    }

    pub fn set_subscriber_count(&self, value: usize) {
        self.subscriber_count.set(value as i64);
    }

    /// Serve the default registry as Prometheus text on the listener.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("metrics accept failed: {err}");
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            tokio::spawn(async move {
                let service = service_fn(|_request: Request<hyper::body::Incoming>| async {
                    let families = prometheus::gather();
                    let mut buffer = Vec::new();
                    let encoder = TextEncoder::new();
                    if let Err(err) = encoder.encode(&families, &mut buffer) {
                        warn!("metrics encode failed: {err}");
                    }
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(buffer))))
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!("metrics connection error: {err}");
                }
            });
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

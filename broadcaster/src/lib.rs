// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Live fan-out of enriched flows to websocket subscribers.
//!
//! The broadcaster is transport-agnostic: the outer socket layer registers a
//! handle per connection, feeds client control frames in, and drains the
//! handle's channel out to the wire. Sends are fire-and-forget; a slow
//! subscriber drops frames in its transport buffer, never here.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use core_types::types::FlowRecord;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Wildcard ticker meaning "everything".
pub const ALL_TICKERS: &str = "*";

/// Client → server control frames. Unknown types are ignored upstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlFrame {
    Subscribe {
        #[serde(default)]
        channel: Option<String>,
    },
    SubscribeTicker {
        ticker: String,
    },
    UnsubscribeTicker {
        ticker: String,
    },
}

impl ControlFrame {
    /// Parse a raw client frame; None for unknown or malformed types.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundFrame {
    Connected,
    Subscribed {
        channel: String,
    },
    SubscribedTicker {
        ticker: String,
    },
    UnsubscribedTicker {
        ticker: String,
    },
    OptionsTrade {
        data: Box<FlowRecord>,
        timestamp: DateTime<Utc>,
    },
}

struct Subscriber {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    tickers: HashSet<String>,
}

impl Subscriber {
    fn wants(&self, ticker: &str) -> bool {
        self.tickers.is_empty()
            || self.tickers.contains(ALL_TICKERS)
            || self.tickers.contains(ticker)
    }
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    frames_sent: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. The default subscription set is empty, which
    /// receives everything.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = tx.send(OutboundFrame::Connected);
        self.subscribers.lock().insert(
            id,
            Subscriber {
                tx,
                tickers: HashSet::new(),
            },
        );
        (id, rx)
    }

    /// Drop a connection and its subscription set.
    pub fn remove(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            debug!("subscriber {id} removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Apply one client control frame and acknowledge it.
    pub fn handle_control(&self, id: u64, frame: ControlFrame) {
        let mut guard = self.subscribers.lock();
        let Some(subscriber) = guard.get_mut(&id) else {
            return;
        };
        match frame {
            ControlFrame::Subscribe { channel } => {
                let channel = channel.unwrap_or_else(|| "options-flow".to_string());
                let _ = subscriber.tx.send(OutboundFrame::Subscribed { channel });
            }
            ControlFrame::SubscribeTicker { ticker } => {
                let ticker = ticker.trim().to_ascii_uppercase();
                if ticker.is_empty() {
                    return;
                }
                subscriber.tickers.insert(ticker.clone());
                let _ = subscriber
                    .tx
                    .send(OutboundFrame::SubscribedTicker { ticker });
            }
            ControlFrame::UnsubscribeTicker { ticker } => {
                let ticker = ticker.trim().to_ascii_uppercase();
                subscriber.tickers.remove(&ticker);
                subscriber.tickers.remove(ALL_TICKERS);
                let _ = subscriber
                    .tx
                    .send(OutboundFrame::UnsubscribedTicker { ticker });
            }
        }
    }

    /// Raw-text convenience wrapper; unknown frame types are ignored.
    pub fn handle_client_text(&self, id: u64, text: &str) {
        if let Some(frame) = ControlFrame::parse(text) {
            self.handle_control(id, frame);
        }
    }

    /// Fan one flow out to every subscriber whose set matches its ticker.
    /// A failed send is logged and the subscriber kept; the transport layer
    /// owns disconnect handling.
    pub fn publish(&self, flow: &FlowRecord) {
        let now = Utc::now();
        let guard = self.subscribers.lock();
        for (id, subscriber) in guard.iter() {
            if !subscriber.wants(&flow.underlying) {
                continue;
            }
            let frame = OutboundFrame::OptionsTrade {
                data: Box::new(flow.clone()),
                timestamp: now,
            };
            if subscriber.tx.send(frame).is_err() {
                warn!("send to subscriber {id} failed");
            } else {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

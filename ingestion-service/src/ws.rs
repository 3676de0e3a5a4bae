//! Vendor options websocket session.
//!
//! One session at a time: connect, authenticate, subscribe to the hot
//! tickers, stream trade events into the enricher. Any close or error tears
//! the session down and a fresh connect follows after the reconnect delay.

use std::fmt;
use std::sync::Arc;
use std::sync::Once;

use core_types::raw::{self, WsFrame};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::{IngestError, IngestionInner};

static TLS_PROVIDER_ONCE: Once = Once::new();

fn ensure_tls_provider() {
    TLS_PROVIDER_ONCE.call_once(|| {
        if let Err(err) = rustls::crypto::ring::default_provider().install_default() {
            panic!("failed to install rustls crypto provider: {err:?}");
        }
    });
}

/// Session lifecycle. Errors from any state fall back to Disconnected and
/// the reconnect timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsSessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Streaming,
}

impl fmt::Display for WsSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WsSessionState::Disconnected => "disconnected",
            WsSessionState::Connecting => "connecting",
            WsSessionState::Authenticating => "authenticating",
            WsSessionState::Subscribed => "subscribed",
            WsSessionState::Streaming => "streaming",
        };
        f.write_str(label)
    }
}

/// Topic list for the hot-ticker subscription, e.g. `O.SPY*,O.QQQ*`.
pub(crate) fn subscription_params(hot_tickers: &[String]) -> String {
    hot_tickers
        .iter()
        .map(|ticker| format!("O.{}*", ticker.to_ascii_uppercase()))
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) async fn run_ws(inner: Arc<IngestionInner>, cancel: CancellationToken) {
    ensure_tls_provider();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match run_session(&inner, &cancel).await {
            Ok(()) => debug!("ws session closed"),
            Err(err) => {
                warn!("ws session error: {err}");
                inner.set_health(engine_api::FeedHealth::degraded(format!(
                    "ws session error: {err}"
                )));
            }
        }
        if cancel.is_cancelled() {
            break;
        }
        inner.deps.metrics.inc_ws_reconnects();
        debug!(
            "ws {} -> {}; reconnecting in {:?}",
            WsSessionState::Disconnected,
            WsSessionState::Connecting,
            inner.config.reconnect_delay
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }
    }
}

async fn run_session(
    inner: &Arc<IngestionInner>,
    cancel: &CancellationToken,
) -> Result<(), IngestError> {
    let mut state = WsSessionState::Connecting;
    info!("ws {state}: {}", inner.config.options_ws_url);
    let (stream, _) = connect_async(inner.config.options_ws_url.as_str()).await?;
    let (mut sink, mut source) = stream.split();

    state = WsSessionState::Authenticating;
    let auth = serde_json::json!({"action": "auth", "params": inner.config.api_key});
    sink.send(Message::Text(auth.to_string().into())).await?;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = source.next() => message,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(err)) => return Err(err.into()),
            None => return Ok(()),
        };
        match message {
            Message::Text(text) => {
                for frame in raw::parse_ws_frames(&text) {
                    match frame {
                        WsFrame::Status(status) => match status.status.as_deref() {
                            Some("connected") => debug!("ws vendor says connected"),
                            Some("auth_success") => {
                                let params = subscription_params(&inner.config.hot_tickers);
                                let subscribe =
                                    serde_json::json!({"action": "subscribe", "params": params});
                                sink.send(Message::Text(subscribe.to_string().into()))
                                    .await?;
                                state = WsSessionState::Subscribed;
                                info!("ws {state}: {params}");
                                state = WsSessionState::Streaming;
                            }
                            Some("auth_failed") | Some("auth_timeout") => {
                                return Err(IngestError::AuthFailed);
                            }
                            other => debug!("ws status {other:?}"),
                        },
                        WsFrame::OptionTrade(trade) => {
                            if state != WsSessionState::Streaming {
                                continue;
                            }
                            handle_trade(inner, &trade).await;
                        }
                        WsFrame::Ignored => {}
                    }
                }
            }
            Message::Ping(payload) => {
                sink.send(Message::Pong(payload)).await?;
            }
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }
}

async fn handle_trade(inner: &Arc<IngestionInner>, trade: &core_types::raw::WsOptionTrade) {
    // Live ticks only count while the market is open; the REST backfill
    // covers everything else.
    if !inner.deps.client.market_status().await.is_open() {
        return;
    }
    match inner.deps.enricher.enrich_ws_trade(trade).await {
        Ok(flow) => {
            inner.deps.broadcaster.publish(&flow);
            inner.deps.store.insert(flow);
            inner.deps.metrics.inc_ingested(1);
        }
        Err(err) => {
            inner.deps.metrics.inc_discarded(discard_label(&err), 1);
        }
    }
}

pub(crate) fn discard_label(err: &enrichment_engine::EnrichError) -> &'static str {
    use enrichment_engine::EnrichError::*;
    match err {
        MalformedSymbol(_) => "malformed_symbol",
        MissingField(_) => "missing_field",
        BadPrice => "bad_price",
        Expired => "expired",
        BelowMinPremium => "below_min_premium",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_topics_wildcard_each_ticker() {
        let params = subscription_params(&["spy".to_string(), "QQQ".to_string()]);
        assert_eq!(params, "O.SPY*,O.QQQ*");
    }

    #[test]
    fn state_labels_render() {
        assert_eq!(WsSessionState::Streaming.to_string(), "streaming");
        assert_eq!(WsSessionState::Disconnected.to_string(), "disconnected");
    }
}

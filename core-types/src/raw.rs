// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Raw vendor payloads and field resolvers.
//!
//! The snapshot feed has shipped several schema generations; the same field
//! can live in three or four places depending on payload age. Each resolver
//! is an ordered list of accessors so the precedence stays testable instead
//! of being buried in coalescing chains.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{MarketStatus, OptionKind};

/// Cursor-paginated envelope shared by the snapshot and reference endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub next_url: Option<String>,
    #[serde(default)]
    pub results: Option<Vec<OptionSnapshot>>,
}

/// One option contract snapshot result.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OptionSnapshot {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub details: Option<ContractDetails>,
    #[serde(default)]
    pub day: Option<DayStats>,
    #[serde(default)]
    pub greeks: Option<VendorGreeks>,
    #[serde(default)]
    pub last_quote: Option<QuoteStats>,
    #[serde(default)]
    pub last_trade: Option<TradeStats>,
    #[serde(default)]
    pub underlying_asset: Option<UnderlyingAsset>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(default)]
    pub implied_volatility: Option<f64>,
    #[serde(default)]
    pub iv: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub mark: Option<f64>,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContractDetails {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub strike_price: Option<f64>,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub day: Option<DayStats>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DayStats {
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub previous_close: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VendorGreeks {
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub theta: Option<f64>,
    #[serde(default)]
    pub vega: Option<f64>,
    #[serde(default)]
    pub mid_iv: Option<f64>,
    #[serde(default)]
    pub iv: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QuoteStats {
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub midpoint: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TradeStats {
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub exchange: Option<i64>,
    #[serde(default)]
    pub sip_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UnderlyingAsset {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

type Accessor<T> = fn(&OptionSnapshot) -> Option<T>;

fn first_of<T>(snapshot: &OptionSnapshot, accessors: &[Accessor<T>]) -> Option<T> {
    accessors.iter().find_map(|get| get(snapshot))
}

/// Contract symbol: `details.ticker`, then top-level `ticker`.
pub fn resolve_symbol(snapshot: &OptionSnapshot) -> Option<String> {
    first_of(
        snapshot,
        &[
            |s| s.details.as_ref().and_then(|d| d.ticker.clone()),
            |s| s.ticker.clone(),
        ],
    )
}

/// Explicit contract type field, either placement. The caller falls back to
/// the symbol's C/P letter when this is absent.
pub fn resolve_kind(snapshot: &OptionSnapshot) -> Option<OptionKind> {
    let raw = first_of(
        snapshot,
        &[
            |s| s.details.as_ref().and_then(|d| d.contract_type.clone()),
            |s| s.contract_type.clone(),
        ],
    )?;
    match raw.to_ascii_lowercase().as_str() {
        "call" | "c" => Some(OptionKind::Call),
        "put" | "p" => Some(OptionKind::Put),
        _ => None,
    }
}

pub fn resolve_strike(snapshot: &OptionSnapshot) -> Option<f64> {
    snapshot
        .details
        .as_ref()
        .and_then(|d| d.strike_price)
        .filter(|s| *s > 0.0)
}

pub fn resolve_expiration(snapshot: &OptionSnapshot) -> Option<NaiveDate> {
    snapshot
        .details
        .as_ref()
        .and_then(|d| d.expiration_date.as_deref())
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

pub fn resolve_underlying(snapshot: &OptionSnapshot) -> Option<String> {
    snapshot
        .underlying_asset
        .as_ref()
        .and_then(|u| u.ticker.clone())
        .filter(|t| !t.is_empty())
}

/// Day volume: `day.volume`, `volume`, `details.day.volume`, `details.volume`.
pub fn resolve_volume(snapshot: &OptionSnapshot) -> u64 {
    first_of(
        snapshot,
        &[
            |s| s.day.as_ref().and_then(|d| d.volume),
            |s| s.volume,
            |s| {
                s.details
                    .as_ref()
                    .and_then(|d| d.day.as_ref())
                    .and_then(|d| d.volume)
            },
            |s| s.details.as_ref().and_then(|d| d.volume),
        ],
    )
    .map(|v| v.max(0.0) as u64)
    .unwrap_or(0)
}

/// Open interest, same placement order as volume.
pub fn resolve_open_interest(snapshot: &OptionSnapshot) -> u64 {
    first_of(
        snapshot,
        &[
            |s| s.day.as_ref().and_then(|d| d.open_interest),
            |s| s.open_interest,
            |s| {
                s.details
                    .as_ref()
                    .and_then(|d| d.day.as_ref())
                    .and_then(|d| d.open_interest)
            },
            |s| s.details.as_ref().and_then(|d| d.open_interest),
        ],
    )
    .map(|v| v.max(0.0) as u64)
    .unwrap_or(0)
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Trade price: `last_trade.price`, `last_quote.midpoint`, `mark`, `last`,
/// then the quote midpoint computed from bid/ask. None means discard.
pub fn resolve_price(snapshot: &OptionSnapshot) -> Option<f64> {
    first_of(
        snapshot,
        &[
            |s| positive(s.last_trade.as_ref().and_then(|t| t.price)),
            |s| positive(s.last_quote.as_ref().and_then(|q| q.midpoint)),
            |s| positive(s.mark),
            |s| positive(s.last),
            |s| {
                let bid = positive(s.bid)?;
                let ask = positive(s.ask)?;
                Some((bid + ask) / 2.0)
            },
        ],
    )
}

pub fn resolve_bid(snapshot: &OptionSnapshot) -> f64 {
    first_of(
        snapshot,
        &[
            |s| s.last_quote.as_ref().and_then(|q| q.bid),
            |s| s.bid,
        ],
    )
    .unwrap_or(0.0)
}

pub fn resolve_ask(snapshot: &OptionSnapshot) -> f64 {
    first_of(
        snapshot,
        &[
            |s| s.last_quote.as_ref().and_then(|q| q.ask),
            |s| s.ask,
        ],
    )
    .unwrap_or(0.0)
}

/// Vendor-supplied IV: `greeks.mid_iv`, `greeks.iv`, `implied_volatility`,
/// legacy top-level `iv`.
pub fn resolve_vendor_iv(snapshot: &OptionSnapshot) -> Option<f64> {
    first_of(
        snapshot,
        &[
            |s| positive(s.greeks.as_ref().and_then(|g| g.mid_iv)),
            |s| positive(s.greeks.as_ref().and_then(|g| g.iv)),
            |s| positive(s.implied_volatility),
            |s| positive(s.iv),
        ],
    )
}

pub fn resolve_spot_hint(snapshot: &OptionSnapshot) -> Option<f64> {
    positive(snapshot.underlying_asset.as_ref().and_then(|u| u.price))
}

/// One options-trade tick off the vendor websocket (`ev == "O"`).
#[derive(Debug, Clone, Deserialize)]
pub struct WsOptionTrade {
    pub sym: String,
    #[serde(default)]
    pub x: Option<i64>,
    pub p: f64,
    pub s: f64,
    #[serde(default)]
    pub c: Option<Vec<i64>>,
    pub t: i64,
    #[serde(default)]
    pub bp: Option<f64>,
    #[serde(default)]
    pub ap: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsStatusMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A decoded frame off the options socket. The vendor sends JSON arrays of
/// heterogeneous messages tagged by `ev`.
#[derive(Debug, Clone)]
pub enum WsFrame {
    Status(WsStatusMessage),
    OptionTrade(WsOptionTrade),
    Ignored,
}

pub fn parse_ws_frames(text: &str) -> Vec<WsFrame> {
    let values: Vec<serde_json::Value> = match serde_json::from_str(text) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(single) => vec![single],
        Err(_) => return Vec::new(),
    };
    values
        .into_iter()
        .map(|value| {
            match value.get("ev").and_then(|ev| ev.as_str()) {
                Some("status") => serde_json::from_value(value)
                    .map(WsFrame::Status)
                    .unwrap_or(WsFrame::Ignored),
                Some("O") => serde_json::from_value(value)
                    .map(WsFrame::OptionTrade)
                    .unwrap_or(WsFrame::Ignored),
                _ => WsFrame::Ignored,
            }
        })
        .collect()
}

/// `/v1/marketstatus/now` response.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketStatusResponse {
    #[serde(default)]
    pub market: Option<String>,
}

impl MarketStatusResponse {
    pub fn status(&self) -> MarketStatus {
        match self.market.as_deref() {
            Some("open") => MarketStatus::Open,
            Some("closed") => MarketStatus::Closed,
            Some("extended-hours") => MarketStatus::ExtendedHours,
            _ => MarketStatus::Unknown,
        }
    }
}

/// `/v2/aggs/ticker/<T>/prev` response.
#[derive(Debug, Clone, Deserialize)]
pub struct PrevAggResponse {
    #[serde(default)]
    pub results: Option<Vec<PrevAggBar>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrevAggBar {
    #[serde(default)]
    pub c: Option<f64>,
}

/// `/v3/reference/options/contracts` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractsEnvelope {
    #[serde(default)]
    pub next_url: Option<String>,
    #[serde(default)]
    pub results: Option<Vec<ReferenceContract>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceContract {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub strike_price: Option<f64>,
    #[serde(default)]
    pub contract_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json(raw: &str) -> OptionSnapshot {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn volume_prefers_day_block() {
        let snapshot = from_json(
            r#"{"day":{"volume":120},"volume":40,"details":{"volume":5}}"#,
        );
        assert_eq!(resolve_volume(&snapshot), 120);
    }

    #[test]
    fn volume_walks_fallback_chain() {
        let snapshot = from_json(r#"{"details":{"day":{"volume":33}}}"#);
        assert_eq!(resolve_volume(&snapshot), 33);
        let snapshot = from_json(r#"{"details":{"volume":7}}"#);
        assert_eq!(resolve_volume(&snapshot), 7);
        let snapshot = from_json("{}");
        assert_eq!(resolve_volume(&snapshot), 0);
    }

    #[test]
    fn open_interest_mirrors_volume_order() {
        let snapshot = from_json(r#"{"open_interest":900,"day":{"open_interest":100}}"#);
        assert_eq!(resolve_open_interest(&snapshot), 100);
        let snapshot = from_json(r#"{"open_interest":900}"#);
        assert_eq!(resolve_open_interest(&snapshot), 900);
    }

    #[test]
    fn price_precedence_and_discard() {
        let snapshot = from_json(
            r#"{"last_trade":{"price":1.55},"last_quote":{"midpoint":1.6},"mark":1.7}"#,
        );
        assert_eq!(resolve_price(&snapshot), Some(1.55));
        let snapshot = from_json(r#"{"last_trade":{"price":0.0},"mark":1.7}"#);
        assert_eq!(resolve_price(&snapshot), Some(1.7));
        let snapshot = from_json(r#"{"bid":1.0,"ask":1.2}"#);
        assert_eq!(resolve_price(&snapshot), Some(1.1));
        let snapshot = from_json("{}");
        assert_eq!(resolve_price(&snapshot), None);
    }

    #[test]
    fn iv_prefers_mid_iv() {
        let snapshot = from_json(
            r#"{"greeks":{"mid_iv":0.31,"iv":0.4},"implied_volatility":0.5}"#,
        );
        assert_eq!(resolve_vendor_iv(&snapshot), Some(0.31));
        let snapshot = from_json(r#"{"implied_volatility":0.5}"#);
        assert_eq!(resolve_vendor_iv(&snapshot), Some(0.5));
    }

    #[test]
    fn kind_reads_both_placements() {
        let snapshot = from_json(r#"{"details":{"contract_type":"put"}}"#);
        assert_eq!(resolve_kind(&snapshot), Some(OptionKind::Put));
        let snapshot = from_json(r#"{"contract_type":"CALL"}"#);
        assert_eq!(resolve_kind(&snapshot), Some(OptionKind::Call));
        let snapshot = from_json("{}");
        assert_eq!(resolve_kind(&snapshot), None);
    }

    #[test]
    fn parses_ws_trade_array() {
        let text = r#"[
            {"ev":"status","status":"auth_success","message":"authenticated"},
            {"ev":"O","sym":"O:SPY251219C00650000","x":4,"p":1.25,"s":30,"t":1734600000000,"bp":1.2,"ap":1.3},
            {"ev":"Q","sym":"whatever"}
        ]"#;
        let frames = parse_ws_frames(text);
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], WsFrame::Status(s) if s.status.as_deref() == Some("auth_success")));
        match &frames[1] {
            WsFrame::OptionTrade(trade) => {
                assert_eq!(trade.sym, "O:SPY251219C00650000");
                assert_eq!(trade.x, Some(4));
                assert!((trade.p - 1.25).abs() < 1e-9);
            }
            other => panic!("expected trade, got {other:?}"),
        }
        assert!(matches!(frames[2], WsFrame::Ignored));
    }

    #[test]
    fn market_status_maps_known_values() {
        let response: MarketStatusResponse =
            serde_json::from_str(r#"{"market":"open"}"#).unwrap();
        assert_eq!(response.status(), MarketStatus::Open);
        let response: MarketStatusResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response.status(), MarketStatus::Unknown);
    }
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Watchlist scanner: sweep a small ticker set for alert-grade flows and
//! attach a trade plan to each.

use std::sync::Arc;
use std::time::Duration;

use core_types::types::{FlowRecord, OptionKind};
use data_client::{DataClientError, MassiveClient, SPOT_TIMEOUT};
use enrichment_engine::{Enricher, FeedSource};
use gex_engine::GexEngine;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use spot_cache::SpotCache;
use thiserror::Error;
use tokio::time::timeout;

/// Watchlists are capped to this many tickers per request.
pub const MAX_WATCHLIST: usize = 10;
/// Snapshot pages fetched per ticker.
pub const PAGES_PER_TICKER: usize = 2;
/// Alerts returned per request, best score first.
pub const MAX_ALERTS: usize = 500;
/// Real GEX lookups stop once this many alerts exist.
pub const GEX_LOOKUP_ALERT_CAP: usize = 50;
/// Budget for one real GEX classification.
pub const GEX_LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);
/// Strikes within this fraction of spot read as "at" the gamma position.
pub const AT_SPOT_BAND: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GexPositionFilter {
    #[default]
    All,
    Above,
    At,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GexPosition {
    Above,
    At,
    Below,
}

impl GexPosition {
    fn matches(self, filter: GexPositionFilter) -> bool {
        match filter {
            GexPositionFilter::All => true,
            GexPositionFilter::Above => self == GexPosition::Above,
            GexPositionFilter::At => self == GexPosition::At,
            GexPositionFilter::Below => self == GexPosition::Below,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub watchlist: Vec<String>,
    pub min_volume: u64,
    pub min_premium: f64,
    pub max_dte: i64,
    pub gex_position: GexPositionFilter,
    pub min_score: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            watchlist: Vec::new(),
            min_volume: 100,
            min_premium: 25_000.0,
            max_dte: 45,
            gex_position: GexPositionFilter::All,
            min_score: 7.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePlan {
    pub entry: f64,
    pub stop_loss_pct: f64,
    pub stop_price: f64,
    pub target1: f64,
    pub target2: f64,
    pub why: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanAlert {
    pub ticker: String,
    pub contract: String,
    pub kind: OptionKind,
    pub strike: f64,
    pub dte: i64,
    pub price: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub premium: f64,
    pub score: f64,
    pub gex_position: GexPosition,
    pub trade_plan: TradePlan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub success: bool,
    pub count: usize,
    pub scanned: Vec<String>,
    pub alerts: Vec<ScanAlert>,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("empty watchlist")]
    EmptyWatchlist,
    #[error(transparent)]
    Vendor(#[from] DataClientError),
}

/// Leniency rules around the numeric gates: a zero-volume contract with
/// heavy open interest still qualifies, and a score within one point of the
/// requested minimum passes.
pub fn passes_filters(flow: &FlowRecord, config: &ScanConfig) -> bool {
    let volume_ok = flow.volume >= config.min_volume
        || (flow.volume == 0 && flow.open_interest >= 10 * config.min_volume);
    if !volume_ok {
        return false;
    }
    if flow.premium < config.min_premium {
        return false;
    }
    if flow.dte > config.max_dte {
        return false;
    }
    flow.setup_score >= config.min_score - 1.0
}

/// Strike-distance proxy for the GEX position. Within 2% of spot reads as
/// "at"; otherwise the side of spot decides. This approximates the real
/// classifier; the engine only consults actual GEX levels when the request
/// filters on position.
pub fn position_by_strike(strike: f64, spot: f64) -> GexPosition {
    if spot > 0.0 && ((strike - spot) / spot).abs() < AT_SPOT_BAND {
        GexPosition::At
    } else if strike > spot {
        GexPosition::Above
    } else {
        GexPosition::Below
    }
}

/// Stop-loss percent from contract kind, position relative to the gamma
/// structure, and conviction. Tighter stops at the wall, wider for lottery
/// positioning, tightened further as the score climbs.
pub fn stop_loss_pct(kind: OptionKind, position: GexPosition, score: f64) -> f64 {
    let base = match (kind, position) {
        (_, GexPosition::At) => 12.0,
        (OptionKind::Call, GexPosition::Above) => 15.0,
        (OptionKind::Call, GexPosition::Below) => 20.0,
        (OptionKind::Put, GexPosition::Below) => 15.0,
        (OptionKind::Put, GexPosition::Above) => 20.0,
    };
    let tightening = (score - 7.0).max(0.0) * 2.0;
    (base - tightening).clamp(8.0, 30.0)
}

/// Profit targets by score tier.
pub fn targets_for_score(entry: f64, score: f64) -> (f64, f64) {
    let (t1_pct, t2_pct) = if score >= 9.0 {
        (0.25, 0.50)
    } else if score >= 7.0 {
        (0.15, 0.30)
    } else {
        (0.10, 0.20)
    };
    (entry * (1.0 + t1_pct), entry * (1.0 + t2_pct))
}

pub fn build_trade_plan(flow: &FlowRecord, position: GexPosition) -> TradePlan {
    let entry = flow.price;
    let pct = stop_loss_pct(flow.kind, position, flow.setup_score);
    let (target1, target2) = targets_for_score(entry, flow.setup_score);
    let mut why = Vec::new();
    if flow.open_interest > 0 && flow.volume > flow.open_interest {
        why.push(format!(
            "volume {} exceeds open interest {}",
            flow.volume, flow.open_interest
        ));
    }
    if flow.premium >= 100_000.0 {
        why.push(format!("premium ${:.0}k", flow.premium / 1000.0));
    }
    if flow.high_probability {
        why.push("high-probability setup".to_string());
    }
    if position == GexPosition::At {
        why.push("strike at the gamma pivot".to_string());
    }
    if flow.dte <= 7 {
        why.push(format!("short-dated ({} DTE)", flow.dte));
    }
    if why.is_empty() {
        why.push(format!("setup score {:.1}", flow.setup_score));
    }
    TradePlan {
        entry,
        stop_loss_pct: pct,
        stop_price: entry * (1.0 - pct / 100.0),
        target1,
        target2,
        why,
    }
}

pub struct Scanner {
    client: Arc<MassiveClient>,
    enricher: Arc<Enricher>,
    spot: Arc<SpotCache>,
    gex: Arc<GexEngine>,
}

impl Scanner {
    pub fn new(
        client: Arc<MassiveClient>,
        enricher: Arc<Enricher>,
        spot: Arc<SpotCache>,
        gex: Arc<GexEngine>,
    ) -> Self {
        Self {
            client,
            enricher,
            spot,
            gex,
        }
    }

    pub async fn scan(&self, config: &ScanConfig) -> Result<ScanResponse, ScanError> {
        if config.watchlist.is_empty() {
            return Err(ScanError::EmptyWatchlist);
        }
        let watchlist: Vec<String> = config
            .watchlist
            .iter()
            .take(MAX_WATCHLIST)
            .map(|t| t.trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        let mut alerts: Vec<ScanAlert> = Vec::new();
        for ticker in &watchlist {
            if let Err(err) = self.scan_ticker(ticker, config, &mut alerts).await {
                warn!("[{ticker}] scan failed: {err}");
            }
        }
        alerts.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        alerts.truncate(MAX_ALERTS);
        Ok(ScanResponse {
            success: true,
            count: alerts.len(),
            scanned: watchlist,
            alerts,
        })
    }

    async fn scan_ticker(
        &self,
        ticker: &str,
        config: &ScanConfig,
        alerts: &mut Vec<ScanAlert>,
    ) -> Result<(), ScanError> {
        let fetch = self
            .client
            .fetch_option_chain(ticker, None, PAGES_PER_TICKER, SPOT_TIMEOUT)
            .await?;
        if fetch.snapshots.is_empty() {
            return Ok(());
        }
        // Spot from the aggs endpoint, else contract metadata.
        let spot = match self.spot.get(ticker).await {
            Some(price) => Some(price),
            None => {
                let hint = fetch
                    .snapshots
                    .iter()
                    .find_map(core_types::raw::resolve_spot_hint);
                if let Some(price) = hint {
                    self.spot.prime(ticker, price);
                }
                hint
            }
        };

        // Fetch the gamma structure once per ticker, only when the request
        // filters on position and the alert budget still allows it.
        let gex_flip = if config.gex_position != GexPositionFilter::All
            && alerts.len() < GEX_LOOKUP_ALERT_CAP
        {
            match timeout(GEX_LOOKUP_TIMEOUT, self.gex.gex(ticker)).await {
                Ok(Ok(response)) => response.key_levels.gamma_flip_point,
                Ok(Err(err)) => {
                    debug!("[{ticker}] gex lookup failed: {err}");
                    None
                }
                Err(_) => {
                    debug!("[{ticker}] gex lookup timed out");
                    None
                }
            }
        } else {
            None
        };

        for snapshot in &fetch.snapshots {
            let Ok(flow) = self
                .enricher
                .enrich_snapshot(snapshot, Some(ticker), FeedSource::RestBackfill)
                .await
            else {
                continue;
            };
            if !passes_filters(&flow, config) {
                continue;
            }
            let reference = gex_flip.or(spot).or(flow.spot);
            let position = match reference {
                Some(reference) => position_by_strike(flow.strike, reference),
                None => continue,
            };
            if !position.matches(config.gex_position) {
                continue;
            }
            let trade_plan = build_trade_plan(&flow, position);
            alerts.push(ScanAlert {
                ticker: ticker.to_string(),
                contract: flow.contract_id.clone(),
                kind: flow.kind,
                strike: flow.strike,
                dte: flow.dte,
                price: flow.price,
                volume: flow.volume,
                open_interest: flow.open_interest,
                premium: flow.premium,
                score: flow.setup_score,
                gex_position: position,
                trade_plan,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use core_types::types::{
        Aggressor, Arrow, ArrowColor, Direction, Moneyness, PositionHint, Sentiment, SideLabel,
        TradeType,
    };

    fn mk_flow(volume: u64, open_interest: u64, premium: f64, score: f64, dte: i64) -> FlowRecord {
        FlowRecord {
            contract_id: "O:SPY251219C00650000".to_string(),
            sequence: 1,
            underlying: "SPY".to_string(),
            strike: 650.0,
            expiration_date: NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
            kind: OptionKind::Call,
            timestamp: Utc::now(),
            price: 2.0,
            size: 10,
            premium,
            volume,
            open_interest,
            bid: 1.9,
            ask: 2.1,
            implied_volatility: None,
            dte,
            spot: Some(640.0),
            otm_percent: Some(1.5),
            moneyness: Some(Moneyness::Otm),
            side: SideLabel::AtAsk,
            aggressor: Aggressor::Buyer,
            sentiment: Sentiment::Bull,
            trade_type: TradeType::Sweep,
            direction: Direction {
                arrow: Arrow::Up,
                color: ArrowColor::Green,
            },
            position_hint: PositionHint::Unknown,
            setup_score: score,
            high_probability: score >= 7.0,
        }
    }

    #[test]
    fn volume_gate_with_oi_leniency() {
        let config = ScanConfig {
            min_volume: 100,
            min_premium: 10_000.0,
            max_dte: 45,
            min_score: 7.0,
            ..ScanConfig::default()
        };
        assert!(passes_filters(&mk_flow(150, 50, 50_000.0, 7.5, 30), &config));
        // Zero volume rescued by OI >= 10x minVolume.
        assert!(passes_filters(&mk_flow(0, 1000, 50_000.0, 7.5, 30), &config));
        assert!(!passes_filters(&mk_flow(0, 900, 50_000.0, 7.5, 30), &config));
        assert!(!passes_filters(&mk_flow(50, 5000, 50_000.0, 7.5, 30), &config));
    }

    #[test]
    fn score_gate_allows_one_point_of_grace() {
        let config = ScanConfig {
            min_volume: 10,
            min_premium: 0.0,
            max_dte: 45,
            min_score: 7.0,
            ..ScanConfig::default()
        };
        assert!(passes_filters(&mk_flow(100, 100, 1000.0, 6.0, 30), &config));
        assert!(!passes_filters(&mk_flow(100, 100, 1000.0, 5.9, 30), &config));
    }

    #[test]
    fn dte_and_premium_gates_are_strict() {
        let config = ScanConfig {
            min_volume: 10,
            min_premium: 25_000.0,
            max_dte: 45,
            min_score: 0.0,
            ..ScanConfig::default()
        };
        assert!(!passes_filters(&mk_flow(100, 100, 24_999.0, 8.0, 30), &config));
        assert!(!passes_filters(&mk_flow(100, 100, 30_000.0, 8.0, 46), &config));
    }

    #[test]
    fn position_proxy_uses_two_percent_band() {
        assert_eq!(position_by_strike(100.5, 100.0), GexPosition::At);
        assert_eq!(position_by_strike(103.0, 100.0), GexPosition::Above);
        assert_eq!(position_by_strike(97.0, 100.0), GexPosition::Below);
    }

    #[test]
    fn stop_loss_table() {
        // At the pivot: tight regardless of kind.
        assert_eq!(stop_loss_pct(OptionKind::Call, GexPosition::At, 7.0), 12.0);
        // Calls above spot run the trend: moderate.
        assert_eq!(
            stop_loss_pct(OptionKind::Call, GexPosition::Above, 7.0),
            15.0
        );
        // Fighting the structure costs more room.
        assert_eq!(
            stop_loss_pct(OptionKind::Call, GexPosition::Below, 7.0),
            20.0
        );
        // Conviction tightens, floored at 8%.
        assert_eq!(stop_loss_pct(OptionKind::Call, GexPosition::At, 10.0), 8.0);
    }

    #[test]
    fn targets_scale_with_score() {
        let (t1, t2) = targets_for_score(2.0, 9.5);
        assert!((t1 - 2.5).abs() < 1e-9);
        assert!((t2 - 3.0).abs() < 1e-9);
        let (t1, t2) = targets_for_score(2.0, 7.5);
        assert!((t1 - 2.3).abs() < 1e-9);
        assert!((t2 - 2.6).abs() < 1e-9);
        let (t1, _) = targets_for_score(2.0, 5.0);
        assert!((t1 - 2.2).abs() < 1e-9);
    }

    #[test]
    fn trade_plan_explains_itself() {
        let flow = mk_flow(2000, 500, 150_000.0, 8.0, 5);
        let plan = build_trade_plan(&flow, GexPosition::At);
        assert_eq!(plan.entry, 2.0);
        assert!(plan.stop_price < plan.entry);
        assert!(plan.target1 > plan.entry);
        assert!(plan.target2 > plan.target1);
        assert!(plan.why.iter().any(|w| w.contains("volume")));
        assert!(plan.why.iter().any(|w| w.contains("premium")));
        assert!(plan.why.iter().any(|w| w.contains("gamma pivot")));
        assert!(plan.why.iter().any(|w| w.contains("short-dated")));
    }

    #[test]
    fn plan_always_has_a_reason() {
        let flow = mk_flow(50, 500, 30_000.0, 5.0, 30);
        let plan = build_trade_plan(&flow, GexPosition::Above);
        assert!(!plan.why.is_empty());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ScanConfig =
            serde_json::from_str(r#"{"watchlist": ["spy"], "gexPosition": "above"}"#).unwrap();
        assert_eq!(config.watchlist, vec!["spy"]);
        assert_eq!(config.gex_position, GexPositionFilter::Above);
        assert_eq!(config.min_score, 7.0);
    }
}

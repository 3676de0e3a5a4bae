//! Query-engine behaviour against a populated trade store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use core_types::types::{
    Aggressor, Arrow, ArrowColor, Direction, FlowRecord, Moneyness, OptionKind, PositionHint,
    Sentiment, SideLabel, TradeType,
};
use data_client::MassiveClient;
use enrichment_engine::Enricher;
use query_engine::{FlowFilter, QueryEngine, SortKey};
use spot_cache::SpotCache;
use trade_store::TradeStore;

fn mk_flow(sequence: u64, underlying: &str, kind: OptionKind, premium: f64) -> FlowRecord {
    FlowRecord {
        contract_id: format!("O:{underlying}251219C00650000"),
        sequence,
        underlying: underlying.to_string(),
        strike: 650.0,
        expiration_date: NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
        kind,
        timestamp: Utc::now() - ChronoDuration::seconds(sequence as i64),
        price: 1.0,
        size: 10,
        premium,
        volume: 100 + sequence,
        open_interest: 500,
        bid: 0.95,
        ask: 1.05,
        implied_volatility: Some("25.00%".to_string()),
        dte: 30,
        spot: Some(640.0),
        otm_percent: Some(1.5),
        moneyness: Some(Moneyness::Otm),
        side: SideLabel::AtAsk,
        aggressor: Aggressor::Buyer,
        sentiment: if kind == OptionKind::Call {
            Sentiment::Bull
        } else {
            Sentiment::Bear
        },
        trade_type: TradeType::Sweep,
        direction: Direction {
            arrow: Arrow::Up,
            color: ArrowColor::Green,
        },
        position_hint: PositionHint::Unknown,
        setup_score: 6.0,
        high_probability: premium >= 25_000.0,
    }
}

fn engine_with(flows: Vec<FlowRecord>) -> (QueryEngine, Arc<TradeStore>) {
    let store = Arc::new(TradeStore::with_capacity(10_000));
    for flow in flows {
        store.insert(flow);
    }
    let client = Arc::new(MassiveClient::new("http://127.0.0.1:1", "k").unwrap());
    let spot = Arc::new(SpotCache::with_params(
        client.clone(),
        Duration::from_secs(300),
        Duration::from_millis(1),
    ));
    let engine = QueryEngine::new(store.clone(), client, Arc::new(Enricher::new(spot)));
    (engine, store)
}

#[tokio::test]
async fn pagination_walks_newest_first() {
    let flows: Vec<FlowRecord> = (1..=25)
        .map(|i| mk_flow(i, "SPY", OptionKind::Call, 1_000.0))
        .collect();
    let (engine, _) = engine_with(flows);
    let response = engine
        .query(&FlowFilter::default(), SortKey::Time, 2, 10)
        .await;
    assert!(response.success);
    assert_eq!(response.count, 10);
    assert_eq!(response.total_count, 25);
    assert_eq!(response.total_pages, 3);
    let sequences: Vec<u64> = response.flows.iter().map(|f| f.sequence).collect();
    assert_eq!(sequences, (11..=20).collect::<Vec<_>>());
    assert_eq!(response.flows.len(), response.trades.len());
}

#[tokio::test]
async fn combined_predicates_and_page_sentiment() {
    let mut flows = Vec::new();
    for i in 1..=10 {
        flows.push(mk_flow(i, "SPY", OptionKind::Call, 50_000.0));
    }
    for i in 11..=20 {
        flows.push(mk_flow(i, "QQQ", OptionKind::Put, 30_000.0));
    }
    for i in 21..=30 {
        flows.push(mk_flow(i, "SPY", OptionKind::Call, 1_000.0));
    }
    let (engine, _) = engine_with(flows);
    let filter = FlowFilter {
        calls: true,
        min_premium: Some(10_000.0),
        ..FlowFilter::default()
    };
    let response = engine.query(&filter, SortKey::Premium, 1, 50).await;
    assert_eq!(response.total_count, 10);
    assert!(response
        .flows
        .iter()
        .all(|f| f.kind == OptionKind::Call && f.premium >= 10_000.0));
    assert_eq!(response.overall_sentiment.sentiment, "Bullish");
    assert!(response.overall_sentiment.net_premium > 0.0);
}

#[tokio::test]
async fn exclusions_and_volume_floor() {
    let flows = vec![
        mk_flow(1, "SPY", OptionKind::Call, 50_000.0),
        mk_flow(2, "TSLA", OptionKind::Call, 50_000.0),
        mk_flow(3, "QQQ", OptionKind::Call, 50_000.0),
    ];
    let (engine, _) = engine_with(flows);
    let filter = FlowFilter {
        exclude_symbols: vec!["tsla".to_string()],
        min_volume: Some(102),
        ..FlowFilter::default()
    };
    let response = engine.query(&filter, SortKey::Time, 1, 10).await;
    let tickers: Vec<&str> = response
        .flows
        .iter()
        .map(|f| f.underlying.as_str())
        .collect();
    assert_eq!(tickers, vec!["QQQ"]);
}

#[tokio::test]
async fn stats_reflect_store_contents() {
    let flows = vec![
        mk_flow(1, "SPY", OptionKind::Call, 50_000.0),
        mk_flow(2, "SPY", OptionKind::Call, 30_000.0),
        mk_flow(3, "SPY", OptionKind::Put, 20_000.0),
    ];
    let (engine, store) = engine_with(flows);
    let stats = engine.stats();
    assert_eq!(stats.total_trades, 3);
    assert_eq!(stats.call_sweeps, 2);
    assert_eq!(stats.put_sweeps, 1);
    assert!((stats.total_premium - 100_000.0).abs() < 1e-6);
    assert_eq!(stats.unusual_activity, 2);
    assert_eq!(store.len(), 3);
}

#[test]
fn health_payload_shape() {
    let health = query_engine::HealthResponse::ok();
    assert_eq!(health.status, "ok");
    assert_eq!(health.service, "flowscope");
    let json = serde_json::to_value(&health).unwrap();
    assert!(json.get("timestamp").is_some());
}

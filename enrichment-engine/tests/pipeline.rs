//! Pipeline-level checks over a grid of synthetic vendor snapshots: every
//! emitted flow must hold the derived-field contracts regardless of input
//! shape.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Duration as ChronoDuration, Local};
use core_types::raw::OptionSnapshot;
use core_types::types::{Aggressor, Sentiment, SideLabel};
use data_client::MassiveClient;
use enrichment_engine::{Enricher, FeedSource};
use spot_cache::SpotCache;

fn test_enricher() -> Enricher {
    let client = Arc::new(MassiveClient::new("http://127.0.0.1:1", "k").unwrap());
    let spot = Arc::new(SpotCache::with_params(
        client,
        Duration::from_secs(300),
        Duration::from_millis(1),
    ));
    Enricher::new(spot)
}

fn symbol_expiring_in(days: i64, kind: char, strike_millis: u64) -> (String, String) {
    let expiry = Local::now().date_naive() + ChronoDuration::days(days);
    let symbol = format!(
        "O:SPY{:02}{:02}{:02}{}{:08}",
        expiry.year() % 100,
        expiry.month(),
        expiry.day(),
        kind,
        strike_millis
    );
    (symbol, expiry.format("%Y-%m-%d").to_string())
}

fn snapshot(
    kind: char,
    strike: f64,
    dte: i64,
    price: f64,
    bid: f64,
    ask: f64,
    volume: u64,
    open_interest: u64,
) -> OptionSnapshot {
    let kind_name = if kind == 'C' { "call" } else { "put" };
    let (symbol, expiry) = symbol_expiring_in(dte, kind, (strike * 1000.0) as u64);
    serde_json::from_str(&format!(
        r#"{{
            "details": {{
                "ticker": "{symbol}",
                "contract_type": "{kind_name}",
                "strike_price": {strike},
                "expiration_date": "{expiry}"
            }},
            "day": {{"volume": {volume}, "open_interest": {open_interest}}},
            "last_quote": {{"bid": {bid}, "ask": {ask}}},
            "last_trade": {{"price": {price}, "exchange": 4, "sip_timestamp": 1734600000000000000}},
            "underlying_asset": {{"ticker": "SPY", "price": 640.0}}
        }}"#
    ))
    .unwrap()
}

#[tokio::test]
async fn emitted_flows_hold_their_invariants_across_the_grid() {
    let enricher = test_enricher();
    let mut emitted = 0usize;
    for &kind in &['C', 'P'] {
        for &strike in &[600.0, 640.0, 680.0] {
            for &dte in &[0i64, 7, 45, 400] {
                for &(price, bid, ask) in &[
                    (1.11, 1.00, 1.10), // above ask
                    (1.05, 1.00, 1.10), // mid
                    (0.95, 1.00, 1.10), // below bid
                    (2.00, 0.00, 0.00), // no quote
                ] {
                    for &(volume, oi) in &[(0u64, 0u64), (0, 5000), (30, 900), (8000, 20000)] {
                        let raw = snapshot(kind, strike, dte, price, bid, ask, volume, oi);
                        let Ok(flow) = enricher
                            .enrich_snapshot(&raw, None, FeedSource::RestBackfill)
                            .await
                        else {
                            continue;
                        };
                        emitted += 1;
                        assert!(
                            (flow.premium - flow.price * flow.size as f64 * 100.0).abs() < 1e-6,
                            "premium formula violated"
                        );
                        assert!((0.0..=10.0).contains(&flow.setup_score));
                        assert!(flow.dte >= 0);
                        assert!(flow.size >= 1);
                        match flow.aggressor {
                            Aggressor::Neutral => {
                                assert_eq!(flow.sentiment, Sentiment::Neutral)
                            }
                            Aggressor::Buyer | Aggressor::Seller => {
                                assert_ne!(flow.sentiment, Sentiment::Neutral)
                            }
                        }
                        if bid <= 0.0 || ask <= 0.0 {
                            assert_eq!(flow.side, SideLabel::Mid);
                        }
                        if let Some(iv) = &flow.implied_volatility {
                            assert!(iv.ends_with('%'), "display IV missing suffix: {iv}");
                        }
                        // Spot came off the snapshot, so moneyness is known.
                        assert!(flow.moneyness.is_some());
                    }
                }
            }
        }
    }
    assert!(emitted > 100, "grid produced only {emitted} flows");
}

#[tokio::test]
async fn discards_never_panic_and_are_counted() {
    let enricher = test_enricher();
    let bad: Vec<OptionSnapshot> = vec![
        serde_json::from_str("{}").unwrap(),
        serde_json::from_str(r#"{"details": {"ticker": "garbage"}}"#).unwrap(),
        serde_json::from_str(
            r#"{"details": {"ticker": "O:SPY200117C00300000", "expiration_date": "2020-01-17"},
                "last_trade": {"price": 1.0}}"#,
        )
        .unwrap(),
    ];
    for raw in &bad {
        assert!(enricher
            .enrich_snapshot(raw, None, FeedSource::RestBackfill)
            .await
            .is_err());
    }
    assert_eq!(enricher.counters().discarded_total(), bad.len() as u64);
}

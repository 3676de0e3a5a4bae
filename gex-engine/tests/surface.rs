//! Surface-level checks over mixed synthetic chains, including the wire
//! casing of the GEX payloads.

use core_types::raw::OptionSnapshot;
use gex_engine::build_surface;

fn snapshot(kind: &str, strike: f64, expiration: &str, gamma: f64, oi: u64) -> OptionSnapshot {
    serde_json::from_str(&format!(
        r#"{{
            "details": {{
                "ticker": "O:TST260116{}{:08}",
                "contract_type": "{kind}",
                "strike_price": {strike},
                "expiration_date": "{expiration}"
            }},
            "greeks": {{"gamma": {gamma}, "delta": 0.5}},
            "open_interest": {oi}
        }}"#,
        if kind == "call" { "C" } else { "P" },
        (strike * 1000.0) as u64,
    ))
    .unwrap()
}

fn mixed_chain() -> Vec<OptionSnapshot> {
    let mut chain = Vec::new();
    for &expiration in &["2026-01-16", "2026-02-20", "2026-03-20"] {
        for i in 0..8 {
            let strike = 460.0 + i as f64 * 10.0;
            chain.push(snapshot("call", strike, expiration, 0.01 + i as f64 * 0.002, 100));
            chain.push(snapshot("put", strike, expiration, 0.015, 120));
        }
    }
    chain
}

#[test]
fn mixed_chain_surface_is_internally_consistent() {
    let chain = mixed_chain();
    let surface = build_surface(&chain, 500.0, false);
    assert_eq!(surface.summary.contracts_used, chain.len());
    assert_eq!(surface.by_expiration.len(), 3);
    // Summary totals equal the sum over expirations.
    let net_sum: f64 = surface.by_expiration.iter().map(|e| e.net_gex).sum();
    assert!((surface.summary.net_gex - net_sum).abs() < 1.0);
    assert!(surface.summary.total_call_gex >= 0.0);
    assert!(surface.summary.total_put_gex <= 0.0);
    // Key levels all sit on (or between) real strikes.
    let wall = surface.key_levels.gamma_wall.unwrap();
    assert!((460.0..=530.0).contains(&wall));
    if let Some(flip) = surface.key_levels.gamma_flip_point {
        assert!((460.0..=530.0).contains(&flip));
    }
    let pain = surface.key_levels.max_pain.unwrap();
    assert!((460.0..=530.0).contains(&pain));
    assert!(surface.key_levels.support.len() <= 3);
    assert!(surface.key_levels.resistance.len() <= 3);
    for strike in &surface.key_levels.support {
        assert!(*strike < 500.0);
    }
    for strike in &surface.key_levels.resistance {
        assert!(*strike > 500.0);
    }
}

#[test]
fn heatmap_rows_align_with_strike_axis() {
    let surface = build_surface(&mixed_chain(), 500.0, false);
    let heatmap = &surface.heatmap;
    assert_eq!(heatmap.cells.len(), heatmap.strikes.len());
    assert_eq!(heatmap.flow_deltas.len(), heatmap.strikes.len());
    for row in &heatmap.cells {
        assert_eq!(row.len(), heatmap.expirations.len());
    }
    // Strikes descend.
    assert!(heatmap.strikes.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn densified_heatmap_still_resolves_exact_strikes() {
    let surface = build_surface(&mixed_chain(), 500.0, true);
    let heatmap = &surface.heatmap;
    // 500.0 lands exactly on the 5.00 grid and on a real strike.
    let row = heatmap
        .strikes
        .iter()
        .position(|&s| (s - 500.0).abs() < 1e-9)
        .expect("grid contains 500");
    assert!(heatmap.cells[row].iter().any(|cell| cell.is_some()));
    // Grid strikes far from any listed strike stay empty.
    if let Some(far) = heatmap.strikes.iter().position(|&s| (s - 900.0).abs() < 1e-9) {
        assert!(heatmap.cells[far].iter().all(|cell| cell.is_none()));
    }
}

#[test]
fn wire_casing_uses_gex_suffixes() {
    let surface = build_surface(&mixed_chain(), 500.0, false);
    let row = serde_json::to_value(&surface.by_expiration[0].strikes[0]).unwrap();
    for key in ["strike", "callGEX", "putGEX", "netGEX", "callOI", "putOI"] {
        assert!(row.get(key).is_some(), "missing key {key}");
    }
    let levels = serde_json::to_value(&surface.key_levels).unwrap();
    for key in ["gammaWall", "gammaFlipPoint", "maxPain", "support", "resistance"] {
        assert!(levels.get(key).is_some(), "missing key {key}");
    }
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Flow predicates, sort keys and pagination.
//!
//! Filters AND together; list-valued filters OR within the list. Sorting
//! always runs over the full filtered set before the page is sliced.

use std::cmp::Ordering;
use std::str::FromStr;

use core_types::types::{FlowRecord, Moneyness, OptionKind, SideLabel, TradeType};
use serde::Deserialize;

/// Bucketed stock-price filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PriceRange {
    #[serde(rename = "<25")]
    Under25,
    #[serde(rename = "25-75")]
    From25To75,
    #[serde(rename = "75-150")]
    From75To150,
    #[serde(rename = ">150")]
    Over150,
}

impl PriceRange {
    fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "<25" => Some(PriceRange::Under25),
            "25-75" => Some(PriceRange::From25To75),
            "75-150" => Some(PriceRange::From75To150),
            ">150" => Some(PriceRange::Over150),
            _ => None,
        }
    }

    fn contains(self, price: f64) -> bool {
        match self {
            PriceRange::Under25 => price < 25.0,
            PriceRange::From25To75 => (25.0..=75.0).contains(&price),
            PriceRange::From75To150 => (75.0..=150.0).contains(&price),
            PriceRange::Over150 => price > 150.0,
        }
    }
}

/// Bucketed volume / open-interest filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CountRange {
    #[serde(rename = "<1k")]
    Under1k,
    #[serde(rename = "1k-5k")]
    From1kTo5k,
    #[serde(rename = "5k-25k")]
    From5kTo25k,
    #[serde(rename = ">25k")]
    Over25k,
}

impl CountRange {
    fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "<1k" => Some(CountRange::Under1k),
            "1k-5k" => Some(CountRange::From1kTo5k),
            "5k-25k" => Some(CountRange::From5kTo25k),
            ">25k" => Some(CountRange::Over25k),
            _ => None,
        }
    }

    fn contains(self, count: u64) -> bool {
        match self {
            CountRange::Under1k => count < 1_000,
            CountRange::From1kTo5k => (1_000..=5_000).contains(&count),
            CountRange::From5kTo25k => (5_000..=25_000).contains(&count),
            CountRange::Over25k => count > 25_000,
        }
    }
}

pub const SHORT_EXPIRY_MAX_DTE: i64 = 30;
pub const LEAPS_MIN_DTE: i64 = 365;

/// Full filter configuration for one query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowFilter {
    #[serde(alias = "filterTicker")]
    pub ticker: Option<String>,
    /// Single-kind filter (`type=Call|Put`).
    #[serde(alias = "type")]
    pub kind: Option<OptionKind>,
    pub calls: bool,
    pub puts: bool,
    pub trade_type: Option<TradeType>,
    pub sweeps: bool,
    pub blocks: bool,
    pub splits: bool,
    pub min_premium: Option<f64>,
    pub max_premium: Option<f64>,
    pub min_strike: Option<f64>,
    pub max_strike: Option<f64>,
    pub min_bidask: Option<f64>,
    pub max_bidask: Option<f64>,
    pub itm: bool,
    pub otm: bool,
    pub atm: bool,
    pub above_ask: bool,
    pub below_bid: bool,
    pub vol_gt_oi: bool,
    pub short_expiry: bool,
    pub leaps: bool,
    pub dte: Vec<i64>,
    pub stock_price: Vec<PriceRange>,
    pub open_interest: Vec<CountRange>,
    pub volume: Vec<CountRange>,
    pub min_volume: Option<u64>,
    pub filter_max_dte: Option<i64>,
    pub min_confidence: Option<f64>,
    pub exclude_symbols: Vec<String>,
}

impl FlowFilter {
    pub fn matches(&self, flow: &FlowRecord) -> bool {
        if let Some(ticker) = &self.ticker {
            if !flow.underlying.eq_ignore_ascii_case(ticker) {
                return false;
            }
        }
        if self
            .exclude_symbols
            .iter()
            .any(|sym| flow.underlying.eq_ignore_ascii_case(sym))
        {
            return false;
        }
        if let Some(kind) = self.kind {
            if flow.kind != kind {
                return false;
            }
        }
        // calls/puts flags: both (or neither) means no filter.
        match (self.calls, self.puts) {
            (true, false) if flow.kind != OptionKind::Call => return false,
            (false, true) if flow.kind != OptionKind::Put => return false,
            _ => {}
        }
        if let Some(trade_type) = self.trade_type {
            if flow.trade_type != trade_type {
                return false;
            }
        }
        if self.sweeps || self.blocks || self.splits {
            let wanted = match flow.trade_type {
                TradeType::Sweep => self.sweeps,
                TradeType::Block => self.blocks,
                TradeType::Split => self.splits,
            };
            if !wanted {
                return false;
            }
        }
        if let Some(min) = self.min_premium {
            if flow.premium < min {
                return false;
            }
        }
        if let Some(max) = self.max_premium {
            if flow.premium > max {
                return false;
            }
        }
        if let Some(min) = self.min_strike {
            if flow.strike < min {
                return false;
            }
        }
        if let Some(max) = self.max_strike {
            if flow.strike > max {
                return false;
            }
        }
        let spread = flow.bid_ask_spread();
        if let Some(min) = self.min_bidask {
            if spread < min {
                return false;
            }
        }
        if let Some(max) = self.max_bidask {
            if spread > max {
                return false;
            }
        }
        if self.itm || self.otm || self.atm {
            let wanted = match flow.moneyness {
                Some(Moneyness::Itm) => self.itm,
                Some(Moneyness::Otm) => self.otm,
                Some(Moneyness::Atm) => self.atm,
                None => false,
            };
            if !wanted {
                return false;
            }
        }
        if self.above_ask && flow.side != SideLabel::AboveAsk {
            return false;
        }
        if self.below_bid && flow.side != SideLabel::BelowBid {
            return false;
        }
        if self.vol_gt_oi && flow.volume <= flow.open_interest {
            return false;
        }
        if self.short_expiry && flow.dte > SHORT_EXPIRY_MAX_DTE {
            return false;
        }
        if self.leaps && flow.dte < LEAPS_MIN_DTE {
            return false;
        }
        if !self.dte.is_empty() && !self.dte.contains(&flow.dte) {
            return false;
        }
        if !self.stock_price.is_empty() {
            let Some(spot) = flow.spot else {
                return false;
            };
            if !self.stock_price.iter().any(|range| range.contains(spot)) {
                return false;
            }
        }
        if !self.open_interest.is_empty()
            && !self
                .open_interest
                .iter()
                .any(|range| range.contains(flow.open_interest))
        {
            return false;
        }
        if !self.volume.is_empty() && !self.volume.iter().any(|range| range.contains(flow.volume)) {
            return false;
        }
        if let Some(min) = self.min_volume {
            if flow.volume < min {
                return false;
            }
        }
        if let Some(max_dte) = self.filter_max_dte {
            if flow.dte > max_dte {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if flow.setup_score < min {
                return false;
            }
        }
        true
    }
}

impl FlowFilter {
    /// Build a filter from raw query-string pairs, the way the outer router
    /// receives them. Unknown keys and unparseable values are ignored.
    pub fn from_query_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filter = FlowFilter::default();
        for (key, value) in pairs {
            match key {
                "ticker" | "filterTicker" => {
                    let trimmed = value.trim();
                    if !trimmed.is_empty() {
                        filter.ticker = Some(trimmed.to_string());
                    }
                }
                "type" => {
                    filter.kind = match value.to_ascii_lowercase().as_str() {
                        "call" => Some(OptionKind::Call),
                        "put" => Some(OptionKind::Put),
                        _ => None,
                    }
                }
                "tradeType" => {
                    filter.trade_type = match value.to_ascii_lowercase().as_str() {
                        "sweep" => Some(TradeType::Sweep),
                        "block" => Some(TradeType::Block),
                        "split" => Some(TradeType::Split),
                        _ => None,
                    }
                }
                "calls" => filter.calls = truthy(value),
                "puts" => filter.puts = truthy(value),
                "sweeps" => filter.sweeps = truthy(value),
                "blocks" => filter.blocks = truthy(value),
                "splits" => filter.splits = truthy(value),
                "itm" => filter.itm = truthy(value),
                "otm" => filter.otm = truthy(value),
                "atm" => filter.atm = truthy(value),
                "aboveAsk" => filter.above_ask = truthy(value),
                "belowBid" => filter.below_bid = truthy(value),
                "volGtOi" => filter.vol_gt_oi = truthy(value),
                "shortExpiry" => filter.short_expiry = truthy(value),
                "leaps" => filter.leaps = truthy(value),
                "minPremium" => filter.min_premium = value.parse().ok(),
                "maxPremium" => filter.max_premium = value.parse().ok(),
                "minStrike" => filter.min_strike = value.parse().ok(),
                "maxStrike" => filter.max_strike = value.parse().ok(),
                "minBidask" => filter.min_bidask = value.parse().ok(),
                "maxBidask" => filter.max_bidask = value.parse().ok(),
                "minConfidence" => filter.min_confidence = value.parse().ok(),
                "minVolume" => filter.min_volume = value.parse().ok(),
                "filterMaxDte" => filter.filter_max_dte = value.parse().ok(),
                "dte" => {
                    filter.dte = value
                        .split(',')
                        .filter_map(|d| d.trim().parse().ok())
                        .collect()
                }
                "stockPrice" => {
                    filter.stock_price = value.split(',').filter_map(PriceRange::parse).collect()
                }
                "openInterest" => {
                    filter.open_interest = value.split(',').filter_map(CountRange::parse).collect()
                }
                "volume" => {
                    filter.volume = value.split(',').filter_map(CountRange::parse).collect()
                }
                "excludeSymbols" => {
                    filter.exclude_symbols = value
                        .split(',')
                        .map(|s| s.trim().to_ascii_uppercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                }
                _ => {}
            }
        }
        filter
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

pub fn apply_filter(filter: &FlowFilter, flows: Vec<FlowRecord>) -> Vec<FlowRecord> {
    flows.into_iter().filter(|f| filter.matches(f)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Time,
    Premium,
    Volume,
    Confidence,
    Iv,
}

impl FromStr for SortKey {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "time" => Ok(SortKey::Time),
            "premium" => Ok(SortKey::Premium),
            "volume" => Ok(SortKey::Volume),
            "confidence" => Ok(SortKey::Confidence),
            "iv" => Ok(SortKey::Iv),
            _ => Err(()),
        }
    }
}

fn desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Sort the full filtered set, descending on the chosen key.
pub fn sort_flows(key: SortKey, flows: &mut [FlowRecord]) {
    match key {
        SortKey::Time => flows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        SortKey::Premium => flows.sort_by(|a, b| desc(a.premium, b.premium)),
        SortKey::Volume => flows.sort_by(|a, b| b.volume.cmp(&a.volume)),
        SortKey::Confidence => flows.sort_by(|a, b| desc(a.setup_score, b.setup_score)),
        SortKey::Iv => flows.sort_by(|a, b| {
            // Missing IV sorts last.
            match (a.iv_value(), b.iv_value()) {
                (Some(x), Some(y)) => desc(x, y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }),
    }
}

/// One page of a sorted result set, 1-based page numbering.
pub struct Page {
    pub items: Vec<FlowRecord>,
    pub total_count: usize,
    pub total_pages: usize,
    pub page: usize,
    pub limit: usize,
}

pub fn paginate(flows: Vec<FlowRecord>, page: usize, limit: usize) -> Page {
    let limit = limit.max(1);
    let page = page.max(1);
    let total_count = flows.len();
    let total_pages = total_count.div_ceil(limit);
    let offset = (page - 1).saturating_mul(limit);
    let items = flows.into_iter().skip(offset).take(limit).collect();
    Page {
        items,
        total_count,
        total_pages,
        page,
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
    use core_types::types::{
        Aggressor, Arrow, ArrowColor, Direction, PositionHint, Sentiment,
    };

    fn mk_flow(sequence: u64) -> FlowRecord {
        FlowRecord {
            contract_id: "O:SPY251219C00650000".to_string(),
            sequence,
            underlying: "SPY".to_string(),
            strike: 650.0,
            expiration_date: NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
            kind: OptionKind::Call,
            timestamp: Utc::now() - ChronoDuration::seconds(sequence as i64),
            price: 1.0,
            size: 10,
            premium: 1000.0 * sequence as f64,
            volume: 100 * sequence,
            open_interest: 500,
            bid: 0.95,
            ask: 1.05,
            implied_volatility: Some(format!("{}.00%", 10 + sequence)),
            dte: 30,
            spot: Some(640.0),
            otm_percent: Some(1.5),
            moneyness: Some(Moneyness::Otm),
            side: SideLabel::AtAsk,
            aggressor: Aggressor::Buyer,
            sentiment: Sentiment::Bull,
            trade_type: TradeType::Split,
            direction: Direction {
                arrow: Arrow::Up,
                color: ArrowColor::Green,
            },
            position_hint: PositionHint::Unknown,
            setup_score: (sequence % 11) as f64,
            high_probability: false,
        }
    }

    #[test]
    fn ticker_filter_is_case_insensitive() {
        let mut filter = FlowFilter::default();
        filter.ticker = Some("spy".to_string());
        assert!(filter.matches(&mk_flow(1)));
        filter.ticker = Some("QQQ".to_string());
        assert!(!filter.matches(&mk_flow(1)));
    }

    #[test]
    fn calls_puts_flags() {
        let mut filter = FlowFilter::default();
        filter.calls = true;
        assert!(filter.matches(&mk_flow(1)));
        filter.calls = false;
        filter.puts = true;
        assert!(!filter.matches(&mk_flow(1)));
        filter.calls = true; // both set: no filter again
        assert!(filter.matches(&mk_flow(1)));
    }

    #[test]
    fn trade_type_multi_select_ors() {
        let mut filter = FlowFilter::default();
        filter.sweeps = true;
        assert!(!filter.matches(&mk_flow(1)));
        filter.splits = true;
        assert!(filter.matches(&mk_flow(1)));
    }

    #[test]
    fn numeric_bounds() {
        let mut filter = FlowFilter::default();
        filter.min_premium = Some(2500.0);
        assert!(!filter.matches(&mk_flow(1)));
        assert!(filter.matches(&mk_flow(3)));
        filter.max_premium = Some(2900.0);
        assert!(!filter.matches(&mk_flow(3)));
    }

    #[test]
    fn moneyness_requires_known_spot() {
        let mut filter = FlowFilter::default();
        filter.otm = true;
        assert!(filter.matches(&mk_flow(1)));
        let mut unknown = mk_flow(1);
        unknown.moneyness = None;
        assert!(!filter.matches(&unknown));
    }

    #[test]
    fn bucket_filters() {
        let mut filter = FlowFilter::default();
        filter.stock_price = vec![PriceRange::Over150];
        assert!(filter.matches(&mk_flow(1))); // spot 640
        filter.stock_price = vec![PriceRange::Under25];
        assert!(!filter.matches(&mk_flow(1)));
        let mut filter = FlowFilter::default();
        filter.volume = vec![CountRange::Under1k];
        assert!(filter.matches(&mk_flow(3))); // volume 300
        filter.volume = vec![CountRange::Over25k];
        assert!(!filter.matches(&mk_flow(3)));
    }

    #[test]
    fn dte_predicates() {
        let mut filter = FlowFilter::default();
        filter.short_expiry = true;
        assert!(filter.matches(&mk_flow(1))); // dte 30
        filter.leaps = true;
        assert!(!filter.matches(&mk_flow(1)));
        let mut filter = FlowFilter::default();
        filter.dte = vec![7, 30];
        assert!(filter.matches(&mk_flow(1)));
        filter.dte = vec![7];
        assert!(!filter.matches(&mk_flow(1)));
    }

    #[test]
    fn sort_time_desc_is_default() {
        let mut flows: Vec<FlowRecord> = (1..=5).map(mk_flow).collect();
        sort_flows(SortKey::Time, &mut flows);
        // Lower sequence = newer timestamp in the fixture.
        let order: Vec<u64> = flows.iter().map(|f| f.sequence).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sort_premium_and_iv() {
        let mut flows: Vec<FlowRecord> = (1..=5).map(mk_flow).collect();
        sort_flows(SortKey::Premium, &mut flows);
        assert_eq!(flows[0].sequence, 5);
        let mut flows: Vec<FlowRecord> = (1..=5).map(mk_flow).collect();
        flows[0].implied_volatility = None;
        sort_flows(SortKey::Iv, &mut flows);
        assert_eq!(flows[0].sequence, 5); // 15.00%
        assert!(flows.last().unwrap().implied_volatility.is_none());
    }

    #[test]
    fn pagination_slices_after_sort() {
        let mut flows: Vec<FlowRecord> = (1..=25).map(mk_flow).collect();
        sort_flows(SortKey::Time, &mut flows);
        let page = paginate(flows, 2, 10);
        assert_eq!(page.total_count, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 10);
        // Items 11..=20 by recency.
        assert_eq!(page.items.first().unwrap().sequence, 11);
        assert_eq!(page.items.last().unwrap().sequence, 20);
    }

    #[test]
    fn pagination_clamps_degenerate_inputs() {
        let flows: Vec<FlowRecord> = (1..=3).map(mk_flow).collect();
        let page = paginate(flows, 0, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 1);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn query_pairs_build_a_full_filter() {
        let filter = FlowFilter::from_query_pairs([
            ("ticker", "spy"),
            ("type", "call"),
            ("sweeps", "true"),
            ("blocks", "1"),
            ("minPremium", "25000"),
            ("volGtOi", "true"),
            ("dte", "0, 7,30"),
            ("stockPrice", ">150,<25"),
            ("openInterest", "1k-5k"),
            ("excludeSymbols", "tsla, nvda"),
            ("bogus", "whatever"),
            ("minVolume", "not-a-number"),
        ]);
        assert_eq!(filter.ticker.as_deref(), Some("spy"));
        assert_eq!(filter.kind, Some(OptionKind::Call));
        assert!(filter.sweeps && filter.blocks && !filter.splits);
        assert_eq!(filter.min_premium, Some(25000.0));
        assert!(filter.vol_gt_oi);
        assert_eq!(filter.dte, vec![0, 7, 30]);
        assert_eq!(
            filter.stock_price,
            vec![PriceRange::Over150, PriceRange::Under25]
        );
        assert_eq!(filter.open_interest, vec![CountRange::From1kTo5k]);
        assert_eq!(filter.exclude_symbols, vec!["TSLA", "NVDA"]);
        assert_eq!(filter.min_volume, None);
    }

    #[test]
    fn query_pairs_ignore_falsy_flags() {
        let filter = FlowFilter::from_query_pairs([("calls", "false"), ("puts", "0")]);
        assert!(!filter.calls && !filter.puts);
        let flow = mk_flow(1);
        assert!(filter.matches(&flow));
    }

    #[test]
    fn filter_deserializes_from_camel_case_json() {
        let filter: FlowFilter = serde_json::from_str(
            r#"{
                "ticker": "SPY",
                "minPremium": 25000,
                "volGtOi": true,
                "stockPrice": [">150"],
                "openInterest": ["1k-5k"],
                "excludeSymbols": ["TSLA"]
            }"#,
        )
        .unwrap();
        assert_eq!(filter.ticker.as_deref(), Some("SPY"));
        assert_eq!(filter.min_premium, Some(25000.0));
        assert!(filter.vol_gt_oi);
        assert_eq!(filter.stock_price, vec![PriceRange::Over150]);
        assert_eq!(filter.open_interest, vec![CountRange::From1kTo5k]);
    }
}

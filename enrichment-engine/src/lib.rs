// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Flow enrichment: raw vendor records in, fully populated flow records out.
//!
//! Both ingest paths land here: contract snapshots from the REST backfill
//! and trade ticks off the websocket. Field resolution over the vendor's
//! schema variants lives in `core_types::raw`; this crate owns the derived
//! analytics and the discard policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use classifier::SweepDetector;
use core_types::occ::{self, SymbolError};
use core_types::raw::{self, OptionSnapshot, WsOptionTrade};
use core_types::types::{FlowRecord, OptionKind, PositionHint};
use log::debug;
use spot_cache::SpotCache;
use thiserror::Error;

/// Which feed produced the raw record. Sets the minimum-premium gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    LiveWs,
    RestBackfill,
}

impl FeedSource {
    pub fn min_premium(self) -> f64 {
        match self {
            FeedSource::LiveWs => 10_000.0,
            FeedSource::RestBackfill => 0.0,
        }
    }
}

/// Reasons a raw record never became a flow. These are absorbed at the
/// pipeline boundary: logged once at debug, counted, never propagated.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error(transparent)]
    MalformedSymbol(#[from] SymbolError),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("missing or non-positive price")]
    BadPrice,
    #[error("contract already expired")]
    Expired,
    #[error("premium below feed minimum")]
    BelowMinPremium,
}

/// Running discard tallies, one per reason, plus the emit count.
#[derive(Debug, Default)]
pub struct EnrichCounters {
    pub emitted: AtomicU64,
    pub malformed: AtomicU64,
    pub missing_field: AtomicU64,
    pub bad_price: AtomicU64,
    pub expired: AtomicU64,
    pub below_min_premium: AtomicU64,
}

impl EnrichCounters {
    fn record(&self, err: &EnrichError) {
        let counter = match err {
            EnrichError::MalformedSymbol(_) => &self.malformed,
            EnrichError::MissingField(_) => &self.missing_field,
            EnrichError::BadPrice => &self.bad_price,
            EnrichError::Expired => &self.expired,
            EnrichError::BelowMinPremium => &self.below_min_premium,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discarded_total(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
            + self.missing_field.load(Ordering::Relaxed)
            + self.bad_price.load(Ordering::Relaxed)
            + self.expired.load(Ordering::Relaxed)
            + self.below_min_premium.load(Ordering::Relaxed)
    }
}

pub struct Enricher {
    spot: Arc<SpotCache>,
    sweeps: SweepDetector,
    sequence: AtomicU64,
    counters: EnrichCounters,
}

impl Enricher {
    pub fn new(spot: Arc<SpotCache>) -> Self {
        Self {
            spot,
            sweeps: SweepDetector::new(),
            sequence: AtomicU64::new(0),
            counters: EnrichCounters::default(),
        }
    }

    pub fn counters(&self) -> &EnrichCounters {
        &self.counters
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Enrich one REST contract snapshot. `underlying_override` covers
    /// payload generations that dropped `underlying_asset`.
    pub async fn enrich_snapshot(
        &self,
        snapshot: &OptionSnapshot,
        underlying_override: Option<&str>,
        source: FeedSource,
    ) -> Result<FlowRecord, EnrichError> {
        let result = self
            .enrich_snapshot_inner(snapshot, underlying_override, source)
            .await;
        self.finish(result)
    }

    /// Enrich one live websocket trade tick.
    pub async fn enrich_ws_trade(&self, tick: &WsOptionTrade) -> Result<FlowRecord, EnrichError> {
        let result = self.enrich_ws_trade_inner(tick).await;
        self.finish(result)
    }

    fn finish(
        &self,
        result: Result<FlowRecord, EnrichError>,
    ) -> Result<FlowRecord, EnrichError> {
        match &result {
            Ok(_) => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters.record(err);
                debug!("discarded raw record: {err}");
            }
        }
        result
    }

    async fn enrich_snapshot_inner(
        &self,
        snapshot: &OptionSnapshot,
        underlying_override: Option<&str>,
        source: FeedSource,
    ) -> Result<FlowRecord, EnrichError> {
        let symbol =
            raw::resolve_symbol(snapshot).ok_or(EnrichError::MissingField("details.ticker"))?;
        let parsed = occ::parse_occ(&symbol)?;
        // Explicit fields win; the symbol is the fallback for all of them.
        let kind = raw::resolve_kind(snapshot).unwrap_or(parsed.kind);
        let strike = raw::resolve_strike(snapshot).unwrap_or(parsed.strike);
        let expiration_date = raw::resolve_expiration(snapshot).unwrap_or(parsed.expiration_date);
        let underlying = raw::resolve_underlying(snapshot)
            .or_else(|| underlying_override.map(|s| s.to_ascii_uppercase()))
            .unwrap_or(parsed.underlying);

        let dte = occ::days_to_expiry(expiration_date);
        if dte < 0 {
            return Err(EnrichError::Expired);
        }

        let volume = raw::resolve_volume(snapshot);
        let open_interest = raw::resolve_open_interest(snapshot);
        let price = raw::resolve_price(snapshot).ok_or(EnrichError::BadPrice)?;
        let bid = raw::resolve_bid(snapshot);
        let ask = raw::resolve_ask(snapshot);

        let size = effective_size(volume, open_interest);
        let premium = price * size as f64 * 100.0;
        if premium < source.min_premium() {
            return Err(EnrichError::BelowMinPremium);
        }

        if let Some(hint) = raw::resolve_spot_hint(snapshot) {
            self.spot.prime(&underlying, hint);
        }
        let spot = self.spot.get(&underlying).await;

        let timestamp = snapshot
            .last_trade
            .as_ref()
            .and_then(|t| t.sip_timestamp)
            .and_then(timestamp_from_nanos)
            .unwrap_or_else(Utc::now);
        let exchange = snapshot.last_trade.as_ref().and_then(|t| t.exchange);

        let implied_volatility = self.resolve_iv(snapshot, price, spot, strike, kind, dte);

        Ok(self.assemble(FlowInputs {
            symbol,
            underlying,
            strike,
            expiration_date,
            kind,
            timestamp,
            price,
            size,
            premium,
            volume,
            open_interest,
            bid,
            ask,
            implied_volatility,
            dte,
            spot,
            exchange,
        }))
    }

    async fn enrich_ws_trade_inner(
        &self,
        tick: &WsOptionTrade,
    ) -> Result<FlowRecord, EnrichError> {
        let parsed = occ::parse_occ(&tick.sym)?;
        let dte = occ::days_to_expiry(parsed.expiration_date);
        if dte < 0 {
            return Err(EnrichError::Expired);
        }
        if !(tick.p.is_finite() && tick.p > 0.0) {
            return Err(EnrichError::BadPrice);
        }
        // Ticks carry no day stats; size comes straight off the print.
        let size = effective_size(tick.s.max(0.0) as u64, 0);
        let premium = tick.p * size as f64 * 100.0;
        if premium < FeedSource::LiveWs.min_premium() {
            return Err(EnrichError::BelowMinPremium);
        }
        let spot = self.spot.get(&parsed.underlying).await;
        let timestamp = timestamp_from_millis(tick.t).unwrap_or_else(Utc::now);
        let implied_volatility = self.invert_iv(tick.p, spot, parsed.strike, parsed.kind, dte);

        Ok(self.assemble(FlowInputs {
            symbol: tick.sym.clone(),
            underlying: parsed.underlying,
            strike: parsed.strike,
            expiration_date: parsed.expiration_date,
            kind: parsed.kind,
            timestamp,
            price: tick.p,
            size,
            premium,
            volume: 0,
            open_interest: 0,
            bid: tick.bp.unwrap_or(0.0),
            ask: tick.ap.unwrap_or(0.0),
            implied_volatility,
            dte,
            spot,
            exchange: tick.x,
        }))
    }

    /// Vendor IV when supplied, else a Newton–Raphson solve when every
    /// input it needs is present.
    fn resolve_iv(
        &self,
        snapshot: &OptionSnapshot,
        price: f64,
        spot: Option<f64>,
        strike: f64,
        kind: OptionKind,
        dte: i64,
    ) -> Option<String> {
        if let Some(vendor) = raw::resolve_vendor_iv(snapshot) {
            return Some(greeks_engine::format_iv_percent(vendor));
        }
        self.invert_iv(price, spot, strike, kind, dte)
    }

    fn invert_iv(
        &self,
        price: f64,
        spot: Option<f64>,
        strike: f64,
        kind: OptionKind,
        dte: i64,
    ) -> Option<String> {
        let spot = spot?;
        if dte <= 0 || strike <= 0.0 {
            return None;
        }
        let tau = greeks_engine::year_fraction(dte);
        greeks_engine::solve_implied_vol(
            price,
            kind.is_call(),
            spot,
            strike,
            greeks_engine::RISK_FREE_RATE,
            tau,
        )
        .map(greeks_engine::format_iv_percent)
    }

    fn assemble(&self, inputs: FlowInputs) -> FlowRecord {
        let (side, aggressor) = classifier::classify_side(inputs.price, inputs.bid, inputs.ask);
        let sentiment = classifier::sentiment_for(inputs.kind, aggressor);
        let direction = classifier::direction_for(inputs.kind, aggressor);
        let (otm_percent, moneyness) = match inputs.spot {
            Some(spot) if spot > 0.0 => {
                let pct = classifier::otm_percent(inputs.kind, inputs.strike, spot);
                (Some(pct), Some(classifier::moneyness_label(pct)))
            }
            _ => (None, None),
        };
        let trade_type = self.sweeps.classify(
            &inputs.symbol,
            inputs.exchange,
            inputs.timestamp,
            inputs.size,
            inputs.premium,
        );
        let position_hint = if inputs.volume == 0 && inputs.open_interest == 0 {
            PositionHint::Unknown
        } else {
            classifier::position_hint(inputs.volume, inputs.open_interest, None)
        };
        let setup_score = classifier::setup_score(
            inputs.volume,
            inputs.open_interest,
            inputs.premium,
            trade_type,
            side,
            inputs.dte,
        );
        let high_probability = classifier::is_high_probability(
            setup_score,
            inputs.volume,
            inputs.open_interest,
            inputs.premium,
        );
        FlowRecord {
            contract_id: inputs.symbol,
            sequence: self.next_sequence(),
            underlying: inputs.underlying,
            strike: inputs.strike,
            expiration_date: inputs.expiration_date,
            kind: inputs.kind,
            timestamp: inputs.timestamp,
            price: inputs.price,
            size: inputs.size,
            premium: inputs.premium,
            volume: inputs.volume,
            open_interest: inputs.open_interest,
            bid: inputs.bid,
            ask: inputs.ask,
            implied_volatility: inputs.implied_volatility,
            dte: inputs.dte,
            spot: inputs.spot,
            otm_percent,
            moneyness,
            side,
            aggressor,
            sentiment,
            trade_type,
            direction,
            position_hint,
            setup_score,
            high_probability,
        }
    }
}

struct FlowInputs {
    symbol: String,
    underlying: String,
    strike: f64,
    expiration_date: chrono::NaiveDate,
    kind: OptionKind,
    timestamp: DateTime<Utc>,
    price: f64,
    size: u64,
    premium: f64,
    volume: u64,
    open_interest: u64,
    bid: f64,
    ask: f64,
    implied_volatility: Option<String>,
    dte: i64,
    spot: Option<f64>,
    exchange: Option<i64>,
}

/// Effective trade size. A zero base (no prints / no day volume yet) falls
/// back to 5% of open interest floored at 10, then to a sentinel 1.
pub fn effective_size(base: u64, open_interest: u64) -> u64 {
    if base > 0 {
        base
    } else if open_interest > 0 {
        ((open_interest as f64 * 0.05) as u64).max(10)
    } else {
        1
    }
}

fn timestamp_from_nanos(ns: i64) -> Option<DateTime<Utc>> {
    if ns <= 0 {
        return None;
    }
    Some(Utc.timestamp_nanos(ns))
}

fn timestamp_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Gamma-exposure aggregation.
//!
//! On-demand pipeline: fetch the full chain snapshot, group by expiration
//! and strike, aggregate dealer gamma per strike, extract key levels, and
//! assemble the heatmap. Contracts without a vendor gamma or without open
//! interest are skipped outright; GEX totals never fall back to IV-derived
//! gammas.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use core_types::occ;
use core_types::raw::{self, OptionSnapshot};
use core_types::types::{ErrorEnvelope, OptionKind};
use data_client::{DataClientError, MassiveClient, CHAIN_TIMEOUT};
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

/// Page cap for the primary chain walk.
pub const GEX_MAX_PAGES: usize = 100;
/// Page cap for the expiration enumeration endpoint.
pub const EXPIRATION_ENUM_PAGES: usize = 10;
/// Per-expiration fallback snapshot calls are bounded to this many expiries.
pub const PER_EXPIRY_FALLBACK_CAP: usize = 25;
const PER_EXPIRY_PAGES: usize = 5;
/// Heatmap cells snap to the closest real strike within this distance.
pub const HEATMAP_STRIKE_TOLERANCE: f64 = 0.5;

#[derive(Debug, Error)]
pub enum GexError {
    #[error("no option chain available for {ticker}")]
    EmptyChain { ticker: String },
    #[error("could not determine spot price for {ticker}")]
    UnknownSpot { ticker: String },
    #[error(transparent)]
    Vendor(#[from] DataClientError),
}

impl GexError {
    /// Whether this maps to a 404-shaped client answer.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GexError::EmptyChain { .. }
                | GexError::UnknownSpot { .. }
                | GexError::Vendor(DataClientError::NotFound)
        )
    }

    /// Client-facing envelope for this failure.
    pub fn envelope(&self, ticker: &str) -> ErrorEnvelope {
        let error = if self.is_not_found() {
            "No options data available"
        } else {
            "Vendor request failed"
        };
        ErrorEnvelope::new(error, self.to_string()).with_ticker(ticker)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeGex {
    pub strike: f64,
    #[serde(rename = "callGEX")]
    pub call_gex: f64,
    #[serde(rename = "putGEX")]
    pub put_gex: f64,
    #[serde(rename = "netGEX")]
    pub net_gex: f64,
    #[serde(rename = "callOI")]
    pub call_oi: u64,
    #[serde(rename = "putOI")]
    pub put_oi: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationGex {
    pub expiration: NaiveDate,
    pub strikes: Vec<StrikeGex>,
    #[serde(rename = "netGEX")]
    pub net_gex: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLevels {
    pub gamma_wall: Option<f64>,
    pub gamma_flip_point: Option<f64>,
    pub max_pain: Option<f64>,
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GexSummary {
    #[serde(rename = "totalCallGEX")]
    pub total_call_gex: f64,
    #[serde(rename = "totalPutGEX")]
    pub total_put_gex: f64,
    #[serde(rename = "netGEX")]
    pub net_gex: f64,
    pub total_delta: f64,
    pub total_gamma: f64,
    pub contracts_used: usize,
    pub contracts_skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heatmap {
    /// Ascending.
    pub expirations: Vec<NaiveDate>,
    /// Descending; one row of cells per strike.
    pub strikes: Vec<f64>,
    pub cells: Vec<Vec<Option<f64>>>,
    /// Per strike row: last non-null cell minus first non-null cell.
    pub flow_deltas: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GexResponse {
    pub success: bool,
    pub ticker: String,
    pub spot_price: f64,
    pub summary: GexSummary,
    pub by_expiration: Vec<ExpirationGex>,
    pub key_levels: KeyLevels,
    pub heatmap: Heatmap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapResponse {
    pub success: bool,
    pub ticker: String,
    pub spot_price: f64,
    pub heatmap: Heatmap,
    pub key_levels: KeyLevels,
}

struct ParsedContract {
    expiration: NaiveDate,
    strike: f64,
    kind: OptionKind,
    gamma: f64,
    delta: Option<f64>,
    open_interest: u64,
}

fn parse_contract(snapshot: &OptionSnapshot) -> Option<ParsedContract> {
    let parsed_symbol = raw::resolve_symbol(snapshot).and_then(|s| occ::parse_occ(&s).ok());
    let expiration = raw::resolve_expiration(snapshot)
        .or_else(|| parsed_symbol.as_ref().map(|p| p.expiration_date))?;
    let strike = raw::resolve_strike(snapshot)
        .or_else(|| parsed_symbol.as_ref().map(|p| p.strike))
        .filter(|s| *s > 0.0)?;
    let kind = raw::resolve_kind(snapshot).or_else(|| parsed_symbol.map(|p| p.kind))?;
    // Hard rule: vendor gamma or nothing.
    let gamma = snapshot
        .greeks
        .as_ref()
        .and_then(|g| g.gamma)
        .filter(|g| g.is_finite())?;
    let open_interest = raw::resolve_open_interest(snapshot);
    if open_interest == 0 {
        return None;
    }
    Some(ParsedContract {
        expiration,
        strike,
        kind,
        gamma,
        delta: snapshot.greeks.as_ref().and_then(|g| g.delta),
        open_interest,
    })
}

/// Everything derived from one chain snapshot at a known spot.
pub struct GexSurface {
    pub summary: GexSummary,
    pub by_expiration: Vec<ExpirationGex>,
    pub key_levels: KeyLevels,
    pub heatmap: Heatmap,
}

/// Aggregate a chain into per-strike/per-expiry GEX plus key levels.
///
/// `densify` switches the heatmap strike axis to a regular 2.50/5.00 grid
/// over [0.2·S, 2·S]; otherwise the natural strikes are used.
pub fn build_surface(snapshots: &[OptionSnapshot], spot: f64, densify: bool) -> GexSurface {
    let notional = 100.0 * spot * spot;
    let mut used = 0usize;
    let mut skipped = 0usize;
    let mut total_delta = 0.0;
    let mut total_gamma = 0.0;
    // expiration → strike(milli-cents key) → aggregate
    let mut grouped: BTreeMap<NaiveDate, BTreeMap<i64, StrikeGex>> = BTreeMap::new();
    for snapshot in snapshots {
        let Some(contract) = parse_contract(snapshot) else {
            skipped += 1;
            continue;
        };
        used += 1;
        let oi = contract.open_interest as f64;
        total_gamma += contract.gamma * oi * 100.0;
        if let Some(delta) = contract.delta {
            total_delta += delta * oi * 100.0;
        }
        let cell = grouped
            .entry(contract.expiration)
            .or_default()
            .entry(strike_key(contract.strike))
            .or_insert_with(|| StrikeGex {
                strike: contract.strike,
                call_gex: 0.0,
                put_gex: 0.0,
                net_gex: 0.0,
                call_oi: 0,
                put_oi: 0,
            });
        let exposure = contract.gamma * oi * notional;
        match contract.kind {
            OptionKind::Call => {
                cell.call_gex += exposure;
                cell.call_oi += contract.open_interest;
            }
            OptionKind::Put => {
                // Sign convention: puts contribute negatively for dealers.
                cell.put_gex -= exposure;
                cell.put_oi += contract.open_interest;
            }
        }
        cell.net_gex = cell.call_gex + cell.put_gex;
    }

    let mut total_call_gex = 0.0;
    let mut total_put_gex = 0.0;
    let by_expiration: Vec<ExpirationGex> = grouped
        .iter()
        .map(|(expiration, strikes)| {
            let mut rows: Vec<StrikeGex> = strikes.values().cloned().collect();
            rows.sort_by(|a, b| b.strike.partial_cmp(&a.strike).unwrap_or(std::cmp::Ordering::Equal));
            let net: f64 = rows.iter().map(|r| r.net_gex).sum();
            for row in &rows {
                total_call_gex += row.call_gex;
                total_put_gex += row.put_gex;
            }
            ExpirationGex {
                expiration: *expiration,
                strikes: rows,
                net_gex: net,
            }
        })
        .collect();

    // Collapse across expirations for the key levels.
    let mut combined: BTreeMap<i64, StrikeGex> = BTreeMap::new();
    for expiry in &by_expiration {
        for row in &expiry.strikes {
            let cell = combined
                .entry(strike_key(row.strike))
                .or_insert_with(|| StrikeGex {
                    strike: row.strike,
                    call_gex: 0.0,
                    put_gex: 0.0,
                    net_gex: 0.0,
                    call_oi: 0,
                    put_oi: 0,
                });
            cell.call_gex += row.call_gex;
            cell.put_gex += row.put_gex;
            cell.net_gex = cell.call_gex + cell.put_gex;
            cell.call_oi += row.call_oi;
            cell.put_oi += row.put_oi;
        }
    }
    let combined: Vec<StrikeGex> = combined.into_values().collect();
    let key_levels = key_levels(&combined, spot);
    let heatmap = build_heatmap(&by_expiration, spot, densify);

    GexSurface {
        summary: GexSummary {
            total_call_gex,
            total_put_gex,
            net_gex: total_call_gex + total_put_gex,
            total_delta,
            total_gamma,
            contracts_used: used,
            contracts_skipped: skipped,
        },
        by_expiration,
        key_levels,
        heatmap,
    }
}

fn strike_key(strike: f64) -> i64 {
    (strike * 1000.0).round() as i64
}

/// Key levels over ascending per-strike aggregates.
fn key_levels(strikes: &[StrikeGex], spot: f64) -> KeyLevels {
    let gamma_wall = strikes
        .iter()
        .max_by(|a, b| {
            a.net_gex
                .abs()
                .partial_cmp(&b.net_gex.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|row| row.strike);

    let mut support: Vec<&StrikeGex> = strikes.iter().filter(|r| r.strike < spot).collect();
    support.sort_by(|a, b| {
        b.net_gex
            .abs()
            .partial_cmp(&a.net_gex.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let support: Vec<f64> = support.iter().take(3).map(|r| r.strike).collect();

    let mut resistance: Vec<&StrikeGex> = strikes.iter().filter(|r| r.strike > spot).collect();
    resistance.sort_by(|a, b| {
        b.net_gex
            .abs()
            .partial_cmp(&a.net_gex.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let resistance: Vec<f64> = resistance.iter().take(3).map(|r| r.strike).collect();

    let gamma_flip_point = gamma_flip(strikes);
    let max_pain = max_pain(strikes);

    KeyLevels {
        gamma_wall,
        gamma_flip_point,
        max_pain,
        support,
        resistance,
    }
}

/// Zero crossing of netGEX scanning strikes in ascending order, linearly
/// interpolated between the two bracketing strikes.
fn gamma_flip(strikes: &[StrikeGex]) -> Option<f64> {
    for pair in strikes.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.net_gex == 0.0 {
            return Some(a.strike);
        }
        if a.net_gex.signum() != b.net_gex.signum() && b.net_gex != 0.0 {
            let span = b.net_gex - a.net_gex;
            if span.abs() < f64::EPSILON {
                return Some(a.strike);
            }
            let t = -a.net_gex / span;
            return Some(a.strike + t * (b.strike - a.strike));
        }
    }
    strikes
        .last()
        .filter(|row| row.net_gex == 0.0)
        .map(|row| row.strike)
}

/// Strike minimising total option-holder payout. Ties keep the first
/// candidate seen (ascending strike order).
fn max_pain(strikes: &[StrikeGex]) -> Option<f64> {
    if strikes.is_empty() {
        return None;
    }
    let mut best: Option<(f64, f64)> = None;
    for candidate in strikes {
        let k = candidate.strike;
        let mut pain = 0.0;
        for row in strikes {
            pain += (k - row.strike).max(0.0) * row.call_oi as f64;
            pain += (row.strike - k).max(0.0) * row.put_oi as f64;
        }
        match best {
            Some((_, best_pain)) if pain >= best_pain => {}
            _ => best = Some((k, pain)),
        }
    }
    best.map(|(k, _)| k)
}

fn build_heatmap(by_expiration: &[ExpirationGex], spot: f64, densify: bool) -> Heatmap {
    let expirations: Vec<NaiveDate> = by_expiration.iter().map(|e| e.expiration).collect();
    let mut strikes: Vec<f64> = if densify {
        densified_strikes(spot)
    } else {
        let mut natural: Vec<f64> = by_expiration
            .iter()
            .flat_map(|e| e.strikes.iter().map(|r| r.strike))
            .collect();
        natural.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        natural.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
        natural
    };
    strikes.reverse(); // descending rows

    let mut cells = Vec::with_capacity(strikes.len());
    let mut flow_deltas = Vec::with_capacity(strikes.len());
    for &strike in &strikes {
        let mut row: Vec<Option<f64>> = Vec::with_capacity(expirations.len());
        for expiry in by_expiration {
            let closest = expiry
                .strikes
                .iter()
                .map(|r| (r, (r.strike - strike).abs()))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            row.push(match closest {
                Some((r, distance)) if distance <= HEATMAP_STRIKE_TOLERANCE => Some(r.net_gex),
                _ => None,
            });
        }
        let non_null: Vec<f64> = row.iter().flatten().copied().collect();
        flow_deltas.push(if non_null.len() > 1 {
            non_null[non_null.len() - 1] - non_null[0]
        } else {
            0.0
        });
        cells.push(row);
    }
    Heatmap {
        expirations,
        strikes,
        cells,
        flow_deltas,
    }
}

/// Regular strike grid over [0.2·S, 2·S], stepped 2.50 for cheaper
/// underlyings and 5.00 above.
fn densified_strikes(spot: f64) -> Vec<f64> {
    if spot <= 0.0 {
        return Vec::new();
    }
    let step = if spot < 250.0 { 2.5 } else { 5.0 };
    let low = (0.2 * spot / step).floor() * step;
    let high = 2.0 * spot;
    let mut strikes = Vec::new();
    let mut strike = low.max(step);
    while strike <= high {
        strikes.push(strike);
        strike += step;
    }
    strikes
}

pub struct GexEngine {
    client: Arc<MassiveClient>,
}

impl GexEngine {
    pub fn new(client: Arc<MassiveClient>) -> Self {
        Self { client }
    }

    /// Full GEX surface for a ticker.
    pub async fn gex(&self, ticker: &str) -> Result<GexResponse, GexError> {
        let (snapshots, spot) = self.fetch_chain(ticker).await?;
        let surface = build_surface(&snapshots, spot, false);
        Ok(GexResponse {
            success: true,
            ticker: ticker.to_ascii_uppercase(),
            spot_price: spot,
            summary: surface.summary,
            by_expiration: surface.by_expiration,
            key_levels: surface.key_levels,
            heatmap: surface.heatmap,
        })
    }

    /// Densified heatmap view plus the key-level summary.
    pub async fn heatmap(&self, ticker: &str) -> Result<HeatmapResponse, GexError> {
        let (snapshots, spot) = self.fetch_chain(ticker).await?;
        let surface = build_surface(&snapshots, spot, true);
        Ok(HeatmapResponse {
            success: true,
            ticker: ticker.to_ascii_uppercase(),
            spot_price: spot,
            heatmap: surface.heatmap,
            key_levels: surface.key_levels,
        })
    }

    async fn fetch_chain(
        &self,
        ticker: &str,
    ) -> Result<(Vec<OptionSnapshot>, f64), GexError> {
        // Coverage check first: how many expirations should the chain carry.
        let known_expirations = match self
            .client
            .option_expirations(ticker, EXPIRATION_ENUM_PAGES)
            .await
        {
            Ok(dates) => dates,
            Err(err) => {
                debug!("[{ticker}] expiration enumeration failed: {err}");
                Vec::new()
            }
        };

        let fetch = self
            .client
            .fetch_option_chain(ticker, None, GEX_MAX_PAGES, CHAIN_TIMEOUT)
            .await?;
        let mut snapshots = fetch.snapshots;

        let distinct: std::collections::BTreeSet<NaiveDate> = snapshots
            .iter()
            .filter_map(raw::resolve_expiration)
            .collect();
        if distinct.len() <= 1 && known_expirations.len() > 1 && fetch.pages_fetched > 1 {
            // Some payload generations collapse the unfiltered snapshot to a
            // single expiry; walk the expirations individually instead.
            warn!(
                "[{ticker}] snapshot collapsed to one expiration; fetching {} expiries directly",
                known_expirations.len().min(PER_EXPIRY_FALLBACK_CAP)
            );
            snapshots.clear();
            for date in known_expirations.into_iter().take(PER_EXPIRY_FALLBACK_CAP) {
                match self
                    .client
                    .fetch_option_chain(ticker, Some(date), PER_EXPIRY_PAGES, CHAIN_TIMEOUT)
                    .await
                {
                    Ok(page) => snapshots.extend(page.snapshots),
                    Err(err) => debug!("[{ticker}] per-expiry fetch {date} failed: {err}"),
                }
            }
        }

        if snapshots.is_empty() {
            return Err(GexError::EmptyChain {
                ticker: ticker.to_string(),
            });
        }
        let spot = resolve_spot(&snapshots).ok_or_else(|| GexError::UnknownSpot {
            ticker: ticker.to_string(),
        })?;
        Ok((snapshots, spot))
    }
}

/// Spot from any contract's underlying metadata, else the median strike.
fn resolve_spot(snapshots: &[OptionSnapshot]) -> Option<f64> {
    if let Some(price) = snapshots.iter().find_map(raw::resolve_spot_hint) {
        return Some(price);
    }
    let mut strikes: Vec<f64> = snapshots
        .iter()
        .filter_map(raw::resolve_strike)
        .filter(|s| *s > 0.0)
        .collect();
    if strikes.is_empty() {
        return None;
    }
    strikes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(strikes[strikes.len() / 2])
}

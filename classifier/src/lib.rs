// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::collections::{HashMap, VecDeque};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use core_types::types::{
    Aggressor, Arrow, ArrowColor, Direction, Moneyness, OptionKind, PositionHint, Sentiment,
    SideLabel, TradeType,
};
use parking_lot::Mutex;

/// Two ticks on different exchanges inside this window make a sweep.
pub const SWEEP_WINDOW_MS: i64 = 500;
/// Ring depth kept per contract.
pub const SWEEP_RING_CAP: usize = 10;

const SHARD_COUNT: usize = 16;

/// Classify where a print landed relative to the quote.
///
/// τ is a tenth of the spread; prints inside τ of the touch count as "at"
/// the touch, prints beyond it lean toward whichever side of the mid they
/// sit on.
pub fn classify_side(price: f64, bid: f64, ask: f64) -> (SideLabel, Aggressor) {
    if bid <= 0.0 || ask <= 0.0 {
        return (SideLabel::Mid, Aggressor::Neutral);
    }
    let mid = (bid + ask) / 2.0;
    let spread = ask - bid;
    let tau = 0.1 * spread;
    if price > ask {
        (SideLabel::AboveAsk, Aggressor::Buyer)
    } else if price >= ask - tau {
        (SideLabel::AtAsk, Aggressor::Buyer)
    } else if price < bid {
        (SideLabel::BelowBid, Aggressor::Seller)
    } else if price <= bid + tau {
        (SideLabel::AtBid, Aggressor::Seller)
    } else if price > mid {
        (SideLabel::ToAsk, Aggressor::Buyer)
    } else if price < mid {
        (SideLabel::ToBid, Aggressor::Seller)
    } else {
        (SideLabel::Mid, Aggressor::Neutral)
    }
}

pub fn sentiment_for(kind: OptionKind, aggressor: Aggressor) -> Sentiment {
    match (kind, aggressor) {
        (OptionKind::Call, Aggressor::Buyer) => Sentiment::Bull,
        (OptionKind::Call, Aggressor::Seller) => Sentiment::Bear,
        (OptionKind::Put, Aggressor::Buyer) => Sentiment::Bear,
        (OptionKind::Put, Aggressor::Seller) => Sentiment::Bull,
        (_, Aggressor::Neutral) => Sentiment::Neutral,
    }
}

pub fn direction_for(kind: OptionKind, aggressor: Aggressor) -> Direction {
    match (kind, aggressor) {
        (OptionKind::Call, Aggressor::Buyer) | (OptionKind::Put, Aggressor::Seller) => Direction {
            arrow: Arrow::Up,
            color: ArrowColor::Green,
        },
        (OptionKind::Call, Aggressor::Seller) | (OptionKind::Put, Aggressor::Buyer) => Direction {
            arrow: Arrow::Down,
            color: ArrowColor::Red,
        },
        (_, Aggressor::Neutral) => Direction {
            arrow: Arrow::Up,
            color: ArrowColor::Grey,
        },
    }
}

/// Signed distance from the money, in percent. Positive is out of the money
/// for either contract kind.
pub fn otm_percent(kind: OptionKind, strike: f64, spot: f64) -> f64 {
    let raw = (strike - spot) / spot * 100.0;
    match kind {
        OptionKind::Call => raw,
        OptionKind::Put => -raw,
    }
}

pub fn moneyness_label(otm_pct: f64) -> Moneyness {
    if otm_pct.abs() < 0.5 {
        Moneyness::Atm
    } else if otm_pct > 0.0 {
        Moneyness::Otm
    } else {
        Moneyness::Itm
    }
}

/// Separate 1%-of-spot window used for ATM colour tagging.
pub fn within_one_percent(strike: f64, spot: f64) -> bool {
    spot > 0.0 && ((strike - spot) / spot).abs() < 0.01
}

#[derive(Clone, Copy)]
struct RingEntry {
    exchange: i64,
    ts: DateTime<Utc>,
}

/// Sweep/block/split classifier.
///
/// Keeps a short per-contract ring of (exchange, event-time); a prior tick
/// on a different exchange inside 500 ms marks the current one a sweep.
/// The map is sharded by contract-id hash since both the websocket task and
/// the backfill task classify through it.
pub struct SweepDetector {
    shards: Vec<Mutex<HashMap<String, VecDeque<RingEntry>>>>,
}

impl Default for SweepDetector {
    fn default() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }
}

impl SweepDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard_for(&self, contract_id: &str) -> &Mutex<HashMap<String, VecDeque<RingEntry>>> {
        let mut hasher = DefaultHasher::new();
        contract_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Classify a tick. Tests run in order: block thresholds, then the
    /// cross-exchange ring (when exchange/time are known), then the
    /// size/premium heuristics (when they are not), else split.
    pub fn classify(
        &self,
        contract_id: &str,
        exchange: Option<i64>,
        ts: DateTime<Utc>,
        size: u64,
        premium: f64,
    ) -> TradeType {
        if size >= 100 && premium >= 50_000.0 {
            return TradeType::Block;
        }
        if let Some(exchange) = exchange {
            let window = ChronoDuration::milliseconds(SWEEP_WINDOW_MS);
            let mut shard = self.shard_for(contract_id).lock();
            let ring = shard.entry(contract_id.to_string()).or_default();
            let swept = ring
                .iter()
                .any(|prior| prior.exchange != exchange && (ts - prior.ts).abs() <= window);
            ring.push_back(RingEntry { exchange, ts });
            while ring.len() > SWEEP_RING_CAP {
                ring.pop_front();
            }
            if swept {
                return TradeType::Sweep;
            }
            return TradeType::Split;
        }
        // No venue/time information: fall back to size/premium shape.
        if size >= 50 && premium >= 25_000.0 && (size >= 100 || premium >= 50_000.0) {
            return TradeType::Sweep;
        }
        if size >= 200 || premium >= 100_000.0 {
            return TradeType::Block;
        }
        if size >= 25 && premium >= 10_000.0 {
            return TradeType::Sweep;
        }
        TradeType::Split
    }

    pub fn tracked_contracts(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}

/// Opening/closing hint from volume against open interest.
pub fn position_hint(volume: u64, open_interest: u64, prev_open_interest: Option<u64>) -> PositionHint {
    if let Some(prev) = prev_open_interest {
        if volume > prev {
            return PositionHint::Opening;
        }
        if open_interest < prev && volume as f64 > 0.1 * open_interest as f64 && volume > 0 {
            return PositionHint::Closing;
        }
        return PositionHint::Unknown;
    }
    if open_interest > 0 && volume as f64 / open_interest as f64 >= 0.5 {
        return PositionHint::Opening;
    }
    if volume >= 1000 && open_interest < 2 * volume {
        return PositionHint::Opening;
    }
    if open_interest >= 1000
        && volume < 50
        && (volume as f64 / open_interest as f64) < 0.05
    {
        return PositionHint::Closing;
    }
    PositionHint::Unknown
}

/// Setup score, 0–10. Starts at 5 and applies the tier table.
pub fn setup_score(
    volume: u64,
    open_interest: u64,
    premium: f64,
    trade_type: TradeType,
    side: SideLabel,
    dte: i64,
) -> f64 {
    let mut score: f64 = 5.0;
    if volume >= 5000 {
        score += 2.0;
    } else if volume >= 1000 {
        score += 1.0;
    } else if volume < 10 {
        score -= 3.0;
    }
    if open_interest < 10 {
        score -= 3.0;
    } else if open_interest < 100 {
        score -= 1.0;
    } else if open_interest >= 1000 {
        score += 1.0;
    }
    if premium >= 1_000_000.0 {
        score += 2.0;
    } else if premium >= 100_000.0 {
        score += 1.0;
    } else if premium < 10_000.0 {
        score -= 1.0;
    }
    if matches!(trade_type, TradeType::Sweep | TradeType::Block) {
        score += 1.0;
    }
    if side.is_aggressive_buy() {
        score += 1.0;
    }
    if dte == 0 {
        score -= 1.0;
    } else if (30..=60).contains(&dte) {
        score += 1.0;
    }
    score.clamp(0.0, 10.0)
}

pub fn is_high_probability(score: f64, volume: u64, open_interest: u64, premium: f64) -> bool {
    score >= 7.0 && volume >= 100 && open_interest >= 100 && premium >= 25_000.0
}

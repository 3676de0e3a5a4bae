// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Call or put side of an option contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    pub fn is_call(self) -> bool {
        matches!(self, OptionKind::Call)
    }

    pub fn letter(self) -> char {
        match self {
            OptionKind::Call => 'C',
            OptionKind::Put => 'P',
        }
    }
}

/// Which side of the book initiated the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggressor {
    Buyer,
    Seller,
    Neutral,
}

/// Directional read of a flow given contract kind and aggressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    #[serde(rename = "BULL")]
    Bull,
    #[serde(rename = "BEAR")]
    Bear,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

/// Where the print landed relative to the quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideLabel {
    #[serde(rename = "Above Ask")]
    AboveAsk,
    #[serde(rename = "At Ask")]
    AtAsk,
    #[serde(rename = "To Ask")]
    ToAsk,
    #[serde(rename = "Mid")]
    Mid,
    #[serde(rename = "To Bid")]
    ToBid,
    #[serde(rename = "At Bid")]
    AtBid,
    #[serde(rename = "Below Bid")]
    BelowBid,
}

impl SideLabel {
    /// Aggressive buy-side prints (used by the setup score).
    pub fn is_aggressive_buy(self) -> bool {
        matches!(self, SideLabel::AboveAsk | SideLabel::AtAsk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    Sweep,
    Block,
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Moneyness {
    #[serde(rename = "ITM")]
    Itm,
    #[serde(rename = "ATM")]
    Atm,
    #[serde(rename = "OTM")]
    Otm,
}

/// Opening/closing hint derived from volume vs open interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionHint {
    Opening,
    Closing,
    #[serde(rename = "")]
    Unknown,
}

/// Rendered direction arrow for a flow row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Direction {
    pub arrow: Arrow,
    pub color: ArrowColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arrow {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrowColor {
    Green,
    Red,
    Grey,
}

/// Immutable identity of an option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub underlying: String,
    pub strike: f64,
    pub expiration_date: NaiveDate,
    pub kind: OptionKind,
}

/// One enriched trade/contract observation. Created by the enricher and
/// never mutated after insertion into the trade store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRecord {
    /// OCC contract symbol, e.g. `O:SPY251219C00650000`.
    pub contract_id: String,
    /// Monotonic per-process sequence assigned at enrichment time.
    pub sequence: u64,
    pub underlying: String,
    pub strike: f64,
    pub expiration_date: NaiveDate,
    pub kind: OptionKind,
    /// Event time, UTC.
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    /// Effective trade size in contracts.
    pub size: u64,
    /// price * size * 100.
    pub premium: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub bid: f64,
    pub ask: f64,
    /// Display IV, e.g. `"23.45%"`. Absent when neither supplied nor solvable.
    pub implied_volatility: Option<String>,
    pub dte: i64,
    /// Underlying price at enrichment time, when the spot oracle had one.
    pub spot: Option<f64>,
    pub otm_percent: Option<f64>,
    pub moneyness: Option<Moneyness>,
    pub side: SideLabel,
    pub aggressor: Aggressor,
    pub sentiment: Sentiment,
    pub trade_type: TradeType,
    pub direction: Direction,
    pub position_hint: PositionHint,
    pub setup_score: f64,
    pub high_probability: bool,
}

impl FlowRecord {
    /// Store key: contract id plus sequence, unique per observation.
    pub fn flow_id(&self) -> String {
        format!("{}#{}", self.contract_id, self.sequence)
    }

    pub fn bid_ask_spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Numeric IV recovered from the display form, for sorting.
    pub fn iv_value(&self) -> Option<f64> {
        self.implied_volatility
            .as_deref()
            .and_then(|s| s.trim_end_matches('%').parse::<f64>().ok())
    }
}

/// Upstream market session state, as reported by the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Closed,
    #[serde(rename = "extended-hours")]
    ExtendedHours,
    Unknown,
}

impl MarketStatus {
    pub fn is_open(self) -> bool {
        matches!(self, MarketStatus::Open)
    }

    pub fn label(self) -> &'static str {
        match self {
            MarketStatus::Open => "open",
            MarketStatus::Closed => "closed",
            MarketStatus::ExtendedHours => "extended-hours",
            MarketStatus::Unknown => "unknown",
        }
    }
}

/// Client-facing error envelope shared by every surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: message.into(),
            ticker: None,
        }
    }

    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }
}

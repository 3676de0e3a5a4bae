// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! OCC option contract symbol codec.
//!
//! Format: `O:<UNDERLYING><YYMMDD><C|P><STRIKE*1000, 8 digits>`. The
//! trailing 8-digit strike is the anchor: the character before it must be
//! `C` or `P`, the 6 characters before that are the expiration date, and
//! whatever remains is the underlying ticker.

use chrono::{Local, NaiveDate};
use thiserror::Error;

use crate::types::{Contract, OptionKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    #[error("malformed option symbol: {0}")]
    MalformedSymbol(String),
}

/// Parse an OCC symbol (with `O:` or `O.` prefix) into its contract parts.
pub fn parse_occ(symbol: &str) -> Result<Contract, SymbolError> {
    let body = symbol
        .strip_prefix("O:")
        .or_else(|| symbol.strip_prefix("O."))
        .ok_or_else(|| SymbolError::MalformedSymbol(symbol.to_string()))?;
    // 1 ticker char minimum + 6 date + 1 direction + 8 strike
    if body.len() < 16 || !body.is_ascii() {
        return Err(SymbolError::MalformedSymbol(symbol.to_string()));
    }
    let len = body.len();
    let strike_part = &body[len - 8..];
    if !strike_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SymbolError::MalformedSymbol(symbol.to_string()));
    }
    let kind = match &body[len - 9..len - 8] {
        "C" => OptionKind::Call,
        "P" => OptionKind::Put,
        _ => return Err(SymbolError::MalformedSymbol(symbol.to_string())),
    };
    let date_part = &body[len - 15..len - 9];
    if !date_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SymbolError::MalformedSymbol(symbol.to_string()));
    }
    let yy: i32 = date_part[0..2].parse().unwrap_or(0);
    let mm: u32 = date_part[2..4].parse().unwrap_or(0);
    let dd: u32 = date_part[4..6].parse().unwrap_or(0);
    let expiration_date = NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
        .ok_or_else(|| SymbolError::MalformedSymbol(symbol.to_string()))?;
    let underlying = &body[..len - 15];
    if underlying.is_empty() || !underlying.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(SymbolError::MalformedSymbol(symbol.to_string()));
    }
    let strike_millis: u32 = strike_part
        .parse()
        .map_err(|_| SymbolError::MalformedSymbol(symbol.to_string()))?;
    Ok(Contract {
        underlying: underlying.to_string(),
        strike: strike_millis as f64 / 1000.0,
        expiration_date,
        kind,
    })
}

/// Canonical OCC symbol for a contract.
pub fn format_occ(contract: &Contract) -> String {
    format!(
        "O:{}{}{}{:08}",
        contract.underlying,
        contract.expiration_date.format("%y%m%d"),
        contract.kind.letter(),
        (contract.strike * 1000.0).round() as u64,
    )
}

/// Days to expiration relative to the given civil date. Negative means the
/// contract has already expired.
pub fn days_to_expiry_from(expiration: NaiveDate, today: NaiveDate) -> i64 {
    (expiration - today).num_days()
}

/// Days to expiration against local midnight today.
pub fn days_to_expiry(expiration: NaiveDate) -> i64 {
    days_to_expiry_from(expiration, Local::now().date_naive())
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Black–Scholes pricing kernel for European options on non-dividend-paying
//! underlyings, plus Newton–Raphson implied-volatility inversion.

pub const RISK_FREE_RATE: f64 = 0.045;
pub const DAYS_PER_YEAR: f64 = 365.25;

const MIN_VOL: f64 = 0.01;
const MAX_VOL: f64 = 5.0;
const IV_TOLERANCE: f64 = 1e-4;
const IV_MAX_ITERS: usize = 100;
const IV_INITIAL_GUESS: f64 = 0.30;
const VEGA_FLOOR: f64 = 1e-4;
const INV_SQRT_TWO_PI: f64 = 0.3989422804014327;

/// Price and first-order sensitivities at a single (σ, τ) point.
#[derive(Debug, Clone, Copy)]
pub struct Greeks {
    pub price: f64,
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
}

/// Year fraction for a civil-day DTE.
pub fn year_fraction(dte_days: i64) -> f64 {
    (dte_days.max(0) as f64) / DAYS_PER_YEAR
}

pub fn norm_pdf(x: f64) -> f64 {
    INV_SQRT_TWO_PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF via the Abramowitz & Stegun five-term polynomial.
pub fn norm_cdf(x: f64) -> f64 {
    const P: f64 = 0.2316419;
    const B1: f64 = 0.319381530;
    const B2: f64 = -0.356563782;
    const B3: f64 = 1.781477937;
    const B4: f64 = -1.821255978;
    const B5: f64 = 1.330274429;
    let abs_x = x.abs();
    let k = 1.0 / (1.0 + P * abs_x);
    let poly = k * (B1 + k * (B2 + k * (B3 + k * (B4 + k * B5))));
    let tail = norm_pdf(abs_x) * poly;
    if x >= 0.0 { 1.0 - tail } else { tail }
}

/// Price, Δ, Γ and ν for one contract. None when the inputs put the model
/// outside its domain (non-positive spot/strike/vol/tau).
pub fn bs_price_and_greeks(
    is_call: bool,
    spot: f64,
    strike: f64,
    rate: f64,
    vol: f64,
    tau: f64,
) -> Option<Greeks> {
    if !(spot > 0.0 && strike > 0.0 && vol > 0.0 && tau > 0.0) {
        return None;
    }
    let sqrt_tau = tau.sqrt();
    let denom = vol * sqrt_tau;
    if !denom.is_finite() || denom <= 0.0 {
        return None;
    }
    let log_term = (spot / strike).ln();
    if !log_term.is_finite() {
        return None;
    }
    let d1 = (log_term + (rate + 0.5 * vol * vol) * tau) / denom;
    let d2 = d1 - denom;
    let disc = (-rate * tau).exp();
    let pdf_d1 = norm_pdf(d1);
    let gamma = pdf_d1 / (spot * denom);
    let vega = spot * pdf_d1 * sqrt_tau;
    if !gamma.is_finite() || !vega.is_finite() {
        return None;
    }
    let (price, delta) = if is_call {
        let price = spot * norm_cdf(d1) - strike * disc * norm_cdf(d2);
        (price, norm_cdf(d1))
    } else {
        let price = strike * disc * norm_cdf(-d2) - spot * norm_cdf(-d1);
        (price, norm_cdf(d1) - 1.0)
    };
    Some(Greeks {
        price,
        delta,
        gamma,
        vega,
    })
}

pub fn bs_price(is_call: bool, spot: f64, strike: f64, rate: f64, vol: f64, tau: f64) -> Option<f64> {
    bs_price_and_greeks(is_call, spot, strike, rate, vol, tau).map(|g| g.price)
}

/// Newton–Raphson inversion of the Black–Scholes price for σ.
///
/// Starts at 0.30, runs at most 100 iterations, converges when the price
/// error drops under 1e-4, bails out when vega underflows, and clamps σ to
/// [0.01, 5.0] each step. The result must be finite and strictly inside
/// (0, 5) to be accepted.
pub fn solve_implied_vol(
    market_price: f64,
    is_call: bool,
    spot: f64,
    strike: f64,
    rate: f64,
    tau: f64,
) -> Option<f64> {
    if !market_price.is_finite() || market_price <= 0.0 || spot <= 0.0 || strike <= 0.0 || tau <= 0.0
    {
        return None;
    }
    let mut sigma = IV_INITIAL_GUESS;
    for _ in 0..IV_MAX_ITERS {
        let model = bs_price_and_greeks(is_call, spot, strike, rate, sigma, tau)?;
        let diff = model.price - market_price;
        if diff.abs() < IV_TOLERANCE {
            return accept(sigma);
        }
        if model.vega.abs() < VEGA_FLOOR {
            return None;
        }
        sigma -= diff / model.vega;
        if !sigma.is_finite() {
            return None;
        }
        sigma = sigma.clamp(MIN_VOL, MAX_VOL);
    }
    None
}

fn accept(sigma: f64) -> Option<f64> {
    if sigma.is_finite() && sigma > 0.0 && sigma < MAX_VOL {
        Some(sigma)
    } else {
        None
    }
}

/// Client-facing IV: `σ·100` to two decimals with a `%` suffix. Values above
/// 1.0 are treated as already-percent and normalised back down first.
pub fn format_iv_percent(value: f64) -> String {
    let sigma = if value > 1.0 { value / 100.0 } else { value };
    format!("{:.2}%", sigma * 100.0)
}

//! LMSR (logarithmic market scoring rule) pricing.
//!
//! Markets price their outcomes with the LMSR cost function
//!
//! ```text
//! b        = funding / ln(n)
//! C(q)     = b · ln(Σ_j exp(q_j / b))
//! price_i  = exp(q_i / b) / Σ_j exp(q_j / b)
//! ```
//!
//! where `q` is the vector of net outcome tokens sold. Funding and token counts
//! are on-chain integers up to 2^256, so every step runs on [`BigDecimal`] at
//! [`PRECISION`] significant digits. Exponentials are evaluated after
//! subtracting the largest exponent, which keeps every term in `(0, 1]`.
//!
//! # Example
//!
//! ```
//! use num_bigint::BigInt;
//! use pm_event_indexer::pricing::{format_price, marginal_prices};
//!
//! let funding = BigInt::from(10u64.pow(18));
//! let net_sold = vec![BigInt::from(1_584_900_000_000_000_000u64), BigInt::from(0)];
//!
//! let prices = marginal_prices(&net_sold, &funding).unwrap();
//! let rendered: Vec<String> = prices.iter().map(format_price).collect();
//! assert_eq!(rendered, ["0.7500", "0.2500"]);
//! ```

use bigdecimal::{BigDecimal, RoundingMode};
use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::error::{IndexerError, IndexerResult};

/// Significant decimal digits carried through every computation.
pub const PRECISION: u64 = 100;

/// Below this exponent `exp(x)` is treated as zero; the term cannot move a
/// 100-digit sum.
const EXP_UNDERFLOW: i64 = -260;

/// Series iteration guard.
const MAX_TERMS: usize = 2_000;

/// Marginal price of one outcome.
///
/// # Errors
///
/// Returns a math error for fewer than two outcomes, non-positive funding or
/// an out-of-range index.
pub fn marginal_price(
    index: usize,
    net_sold: &[BigInt],
    funding: &BigInt,
) -> IndexerResult<BigDecimal> {
    if index >= net_sold.len() {
        return Err(IndexerError::math(
            format!("Outcome index {index} out of range for {} outcomes", net_sold.len()),
            None,
        ));
    }
    let prices = marginal_prices(net_sold, funding)?;
    Ok(prices[index].clone())
}

/// Marginal prices of every outcome. They sum to one within rounding.
///
/// # Errors
///
/// Returns a math error for fewer than two outcomes or non-positive funding.
pub fn marginal_prices(net_sold: &[BigInt], funding: &BigInt) -> IndexerResult<Vec<BigDecimal>> {
    let b = liquidity(net_sold.len(), funding)?;
    let exponents: Vec<BigDecimal> = net_sold.iter().map(|q| scaled(q, &b)).collect();
    let max = max_of(&exponents);

    let weights: Vec<BigDecimal> = exponents.iter().map(|x| exp(&(x - &max))).collect();
    let total = weights.iter().fold(BigDecimal::zero(), |acc, w| acc + w);

    Ok(weights.iter().map(|w| (w / &total).with_prec(PRECISION)).collect())
}

/// Value of the LMSR cost function `C(q)`.
///
/// # Errors
///
/// Returns a math error for fewer than two outcomes or non-positive funding.
pub fn cost_function(net_sold: &[BigInt], funding: &BigInt) -> IndexerResult<BigDecimal> {
    let b = liquidity(net_sold.len(), funding)?;
    let exponents: Vec<BigDecimal> = net_sold.iter().map(|q| scaled(q, &b)).collect();
    let max = max_of(&exponents);

    let total = exponents
        .iter()
        .fold(BigDecimal::zero(), |acc, x| acc + exp(&(x - &max)));
    // total >= 1 because the max term is exp(0)
    let log_sum = ln(&total)? + max;
    Ok((b * log_sum).with_prec(PRECISION))
}

/// Collateral needed to buy `count` tokens of outcome `index`, rounded up.
///
/// # Errors
///
/// Returns a math error for invalid markets or an out-of-range index.
pub fn calc_cost(
    net_sold: &[BigInt],
    funding: &BigInt,
    index: usize,
    count: &BigInt,
) -> IndexerResult<BigInt> {
    let delta = trade_delta(net_sold, funding, index, count)?;
    Ok(round_up(&delta))
}

/// Collateral received for selling `count` tokens of outcome `index`, rounded down.
///
/// # Errors
///
/// Returns a math error for invalid markets or an out-of-range index.
pub fn calc_profit(
    net_sold: &[BigInt],
    funding: &BigInt,
    index: usize,
    count: &BigInt,
) -> IndexerResult<BigInt> {
    let delta = trade_delta(net_sold, funding, index, &-count)?;
    Ok(round_down(&-delta))
}

/// Price rendered with four fractional digits, e.g. `0.7500`.
#[must_use]
pub fn format_price(price: &BigDecimal) -> String {
    let rounded = price.with_scale_round(4, RoundingMode::HalfUp);
    let (digits, _) = rounded.as_bigint_and_exponent();
    let sign = if digits.is_negative() { "-" } else { "" };
    let digits = digits.abs();
    let unit = BigInt::from(10_000);
    format!("{sign}{}.{:04}", &digits / &unit, &digits % &unit)
}

/// Price as `f64`, for display and tolerance checks only.
#[must_use]
pub fn price_to_f64(price: &BigDecimal) -> f64 {
    price.to_f64().unwrap_or(f64::NAN)
}

/// Natural logarithm of a positive decimal.
///
/// # Errors
///
/// Returns a math error for zero or negative input.
pub fn ln(x: &BigDecimal) -> IndexerResult<BigDecimal> {
    if x.sign() != Sign::Plus {
        return Err(IndexerError::math(format!("ln undefined for {x}"), None));
    }

    // x = m · 2^k with m in [1, 2)
    let two = BigDecimal::from(2);
    let half = BigDecimal::new(BigInt::from(5), 1);
    let mut m = x.with_prec(PRECISION);
    let mut k: i64 = 0;
    while m >= two {
        m = (&m * &half).with_prec(PRECISION);
        k += 1;
    }
    while m < BigDecimal::one() {
        m = (&m * &two).with_prec(PRECISION);
        k -= 1;
    }

    let ln_m = ln_near_one(&m);
    if k == 0 {
        return Ok(ln_m);
    }
    Ok((ln_m + ln2() * BigDecimal::from(k)).with_prec(PRECISION))
}

/// `e^x`. Very negative exponents underflow to zero.
#[must_use]
pub fn exp(x: &BigDecimal) -> BigDecimal {
    if x.is_zero() {
        return BigDecimal::one();
    }
    if *x < BigDecimal::from(EXP_UNDERFLOW) {
        return BigDecimal::zero();
    }

    // Halve until |r| < 1/2, expand, then square back up
    let half = BigDecimal::new(BigInt::from(5), 1);
    let mut r = x.with_prec(PRECISION);
    let mut squarings = 0u32;
    while r.abs() >= half {
        r = (&r * &half).with_prec(PRECISION);
        squarings += 1;
    }

    let epsilon = epsilon();
    let mut sum = BigDecimal::one();
    let mut term = BigDecimal::one();
    for i in 1..MAX_TERMS {
        let divisor = BigDecimal::from(i64::try_from(i).unwrap_or(i64::MAX));
        term = (&term * &r / divisor).with_prec(PRECISION);
        if term.abs() < epsilon {
            break;
        }
        sum += &term;
    }

    for _ in 0..squarings {
        sum = (&sum * &sum).with_prec(PRECISION);
    }
    sum
}

/// `b = funding / ln(n)`, validating the market first.
fn liquidity(outcomes: usize, funding: &BigInt) -> IndexerResult<BigDecimal> {
    if outcomes < 2 {
        return Err(IndexerError::math(
            format!("LMSR needs at least two outcomes, got {outcomes}"),
            None,
        ));
    }
    if !funding.is_positive() {
        return Err(IndexerError::math(
            format!("LMSR needs positive funding, got {funding}"),
            None,
        ));
    }
    let n = BigDecimal::from(i64::try_from(outcomes).unwrap_or(i64::MAX));
    let ln_n = ln(&n)?;
    Ok((BigDecimal::from(funding.clone()) / ln_n).with_prec(PRECISION))
}

fn scaled(q: &BigInt, b: &BigDecimal) -> BigDecimal {
    (BigDecimal::from(q.clone()) / b).with_prec(PRECISION)
}

fn max_of(values: &[BigDecimal]) -> BigDecimal {
    values
        .iter()
        .max()
        .cloned()
        .unwrap_or_else(BigDecimal::zero)
}

/// `C(q + count·e_index) − C(q)`.
fn trade_delta(
    net_sold: &[BigInt],
    funding: &BigInt,
    index: usize,
    count: &BigInt,
) -> IndexerResult<BigDecimal> {
    if index >= net_sold.len() {
        return Err(IndexerError::math(
            format!("Outcome index {index} out of range for {} outcomes", net_sold.len()),
            None,
        ));
    }
    let before = cost_function(net_sold, funding)?;
    let mut after_sold = net_sold.to_vec();
    after_sold[index] += count;
    let after = cost_function(&after_sold, funding)?;
    Ok(after - before)
}

/// `ln(m)` for `m` in `[1, 2)` via `2 · atanh((m − 1) / (m + 1))`.
fn ln_near_one(m: &BigDecimal) -> BigDecimal {
    let z = ((m - BigDecimal::one()) / (m + BigDecimal::one())).with_prec(PRECISION);
    BigDecimal::from(2) * atanh(&z)
}

fn ln2() -> BigDecimal {
    let third = (BigDecimal::one() / BigDecimal::from(3)).with_prec(PRECISION);
    BigDecimal::from(2) * atanh(&third)
}

/// `atanh(z) = z + z³/3 + z⁵/5 + …` for `|z| ≤ 1/3`.
fn atanh(z: &BigDecimal) -> BigDecimal {
    let epsilon = epsilon();
    let z_squared = (z * z).with_prec(PRECISION);
    let mut power = z.clone();
    let mut sum = z.clone();
    for i in 1..MAX_TERMS {
        power = (&power * &z_squared).with_prec(PRECISION);
        let denominator = BigDecimal::from(i64::try_from(2 * i + 1).unwrap_or(i64::MAX));
        let term = (&power / denominator).with_prec(PRECISION);
        if term.abs() < epsilon {
            break;
        }
        sum += term;
    }
    sum.with_prec(PRECISION)
}

fn epsilon() -> BigDecimal {
    BigDecimal::new(BigInt::one(), i64::try_from(PRECISION + 5).unwrap_or(i64::MAX))
}

fn round_up(value: &BigDecimal) -> BigInt {
    let (digits, _) = value.with_scale_round(0, RoundingMode::Ceiling).as_bigint_and_exponent();
    digits
}

fn round_down(value: &BigDecimal) -> BigInt {
    let (digits, _) = value.with_scale_round(0, RoundingMode::Floor).as_bigint_and_exponent();
    digits
}

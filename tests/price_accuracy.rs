//! Integration tests for LMSR price accuracy.
//!
//! These tests check the market maker's invariants at full precision: prices
//! form a distribution, trade costs match the cost function, and the known
//! reference trade lands on its expected prices.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::unreadable_literal)]

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{One, Zero};
use std::str::FromStr;

use pm_event_indexer::error::IndexerError;
use pm_event_indexer::pricing::{
    calc_cost, calc_profit, cost_function, format_price, marginal_price, marginal_prices,
    price_to_f64,
};

fn wei(value: &str) -> BigInt {
    BigInt::from_str(value).unwrap()
}

fn one_ether() -> BigInt {
    wei("1000000000000000000")
}

fn tolerance(digits: i64) -> BigDecimal {
    BigDecimal::new(BigInt::one(), digits)
}

fn sum(prices: &[BigDecimal]) -> BigDecimal {
    prices.iter().fold(BigDecimal::zero(), |acc, price| acc + price)
}

/// Prices sum to one for markets of every shape.
#[test]
fn test_prices_form_a_distribution() {
    let funding = one_ether();
    let markets = [
        vec![BigInt::zero(), BigInt::zero()],
        vec![wei("1584900000000000000"), BigInt::zero()],
        vec![wei("250000000000000000"), wei("-730000000000000000"), wei("3100000000000000000")],
        vec![BigInt::from(1), BigInt::from(2), BigInt::from(3), BigInt::from(4), BigInt::from(5)],
        vec![BigInt::from(2u8).pow(200), BigInt::from(2u8).pow(199), BigInt::zero()],
    ];

    for net_sold in &markets {
        let prices = marginal_prices(net_sold, &funding).unwrap();
        assert_eq!(prices.len(), net_sold.len());
        assert!(prices.iter().all(|price| *price >= BigDecimal::zero()));
        let deviation = (sum(&prices) - BigDecimal::one()).abs();
        assert!(deviation < tolerance(90), "prices of {net_sold:?} sum off by {deviation}");
    }
}

/// Buying 1.5849 tokens of outcome 0 against 1 token of funding moves a
/// two-outcome market from 50/50 to 75/25.
#[test]
fn test_reference_trade() {
    let funding = one_ether();
    let before = [BigInt::zero(), BigInt::zero()];
    let after = [wei("1584900000000000000"), BigInt::zero()];

    let uniform: Vec<String> =
        marginal_prices(&before, &funding).unwrap().iter().map(format_price).collect();
    assert_eq!(uniform, ["0.5000", "0.5000"]);

    let moved: Vec<String> =
        marginal_prices(&after, &funding).unwrap().iter().map(format_price).collect();
    assert_eq!(moved, ["0.7500", "0.2500"]);

    let price = price_to_f64(&marginal_price(0, &after, &funding).unwrap());
    assert!((price - 0.75).abs() < 1e-4, "price {price} too far from 0.75");
}

#[test]
fn test_uniform_prices_for_equal_net_sold() {
    let funding = one_ether();
    let net_sold = vec![wei("42000000000000000"); 4];
    for price in marginal_prices(&net_sold, &funding).unwrap() {
        assert_eq!(format_price(&price), "0.2500");
    }
}

/// Adding the same amount to every outcome leaves prices unchanged.
#[test]
fn test_prices_are_shift_invariant() {
    let funding = one_ether();
    let shift = wei("700000000000000000");
    let base = [wei("300000000000000000"), wei("1200000000000000000"), BigInt::zero()];
    let shifted: Vec<BigInt> = base.iter().map(|q| q + &shift).collect();

    let a = marginal_prices(&base, &funding).unwrap();
    let b = marginal_prices(&shifted, &funding).unwrap();
    for (left, right) in a.iter().zip(&b) {
        assert!((left - right).abs() < tolerance(80));
    }
}

#[test]
fn test_buying_raises_only_the_bought_price() {
    let funding = one_ether();
    let before = [BigInt::zero(), BigInt::zero(), BigInt::zero()];
    let after = [BigInt::zero(), wei("100000000000000000"), BigInt::zero()];

    let old = marginal_prices(&before, &funding).unwrap();
    let new = marginal_prices(&after, &funding).unwrap();
    assert!(new[1] > old[1]);
    assert!(new[0] < old[0]);
    assert!(new[2] < old[2]);
    assert_eq!(new[0], new[2]);
}

/// An empty market costs exactly its funding: `b · ln(n) = funding`.
#[test]
fn test_empty_market_cost_equals_funding() {
    let funding = one_ether();
    for outcomes in [2, 3, 7] {
        let cost = cost_function(&vec![BigInt::zero(); outcomes], &funding).unwrap();
        let deviation = (cost - BigDecimal::from(funding.clone())).abs();
        assert!(deviation < tolerance(60), "{outcomes} outcomes: off by {deviation}");
    }
}

#[test]
fn test_trade_cost_matches_cost_function() {
    let funding = one_ether();
    let before = vec![wei("300000000000000000"), BigInt::zero(), wei("-100000000000000000")];
    let count = wei("250000000000000000");
    let mut after = before.clone();
    after[2] += &count;

    let expected =
        cost_function(&after, &funding).unwrap() - cost_function(&before, &funding).unwrap();
    let cost = calc_cost(&before, &funding, 2, &count).unwrap();
    assert!(BigDecimal::from(cost.clone()) >= expected);
    assert!((BigDecimal::from(cost) - expected).abs() <= BigDecimal::one());
}

/// Selling back what was just bought returns the cost, minus rounding.
#[test]
fn test_buy_then_sell_round_trip() {
    let funding = wei("5000000000000000000");
    let start = [wei("120000000000000000"), wei("800000000000000000")];
    let count = wei("1000000000000000000");

    let cost = calc_cost(&start, &funding, 1, &count).unwrap();
    let after = [start[0].clone(), &start[1] + &count];
    let profit = calc_profit(&after, &funding, 1, &count).unwrap();

    assert!(cost >= profit);
    assert!(&cost - &profit <= BigInt::from(1));
    // Below one collateral unit per token, above the pre-trade price
    assert!(cost < count);
}

#[test]
fn test_domain_errors() {
    let funding = one_ether();
    let two = [BigInt::zero(), BigInt::zero()];

    for result in [
        marginal_prices(&[BigInt::zero()], &funding),
        marginal_prices(&two, &BigInt::zero()),
        marginal_prices(&two, &-funding.clone()),
    ] {
        assert!(matches!(result, Err(IndexerError::MathError { .. })));
    }
    assert!(marginal_price(5, &two, &funding).is_err());
    assert!(calc_cost(&two, &funding, 2, &BigInt::from(1)).is_err());
    assert!(cost_function(&[], &funding).is_err());
}

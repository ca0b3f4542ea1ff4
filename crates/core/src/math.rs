//! Fixed-point arithmetic for valuation.
//!
//! Token amounts stay in U256 until the final ratio; prices are carried as
//! 1e8 fixed-point so the USD conversions are pure integer math. Floats
//! appear only at the comparison layer.

use alloy::primitives::U256;

/// Oracle and feed price scale (8 decimals).
pub const PRICE_DECIMALS: u8 = 8;

/// 1e8 as U256.
pub const PRICE_ONE: U256 = U256::from_limbs([100_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%).
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10_000u64, 0, 0, 0]);

const POW10: [u128; 39] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
    100_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000_000,
];

/// Fast power of 10 (exact through 10^38).
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 39 {
        U256::from(POW10[exp as usize])
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

/// Ceiling division.
#[inline(always)]
pub fn ceil_div(numerator: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::MAX;
    }
    (numerator + denominator - U256::from(1u64)) / denominator
}

/// Convert a feed/oracle USD price (f64) to 1e8 fixed-point.
#[inline(always)]
pub fn price_to_fixed(usd: f64) -> U256 {
    if usd <= 0.0 || !usd.is_finite() {
        return U256::ZERO;
    }
    U256::from((usd * 1e8).round() as u128)
}

/// USD value of `amount` base units at a 1e8 price, as 1e8 fixed-point.
/// usd8 = amount * price8 / 10^decimals
#[inline(always)]
pub fn usd_fixed(amount: U256, price_fixed: U256, decimals: u8) -> U256 {
    if amount.is_zero() || price_fixed.is_zero() {
        return U256::ZERO;
    }
    amount * price_fixed / pow10(decimals)
}

/// 1e8 fixed-point USD to f64, for comparisons and logging.
#[inline(always)]
pub fn fixed_to_f64(usd_fixed: U256) -> f64 {
    u256_to_f64(usd_fixed) / 1e8
}

/// Lossy U256 -> f64. Fine past 2^53 because the decisive comparisons are
/// re-checked against the on-chain oracle before dispatch.
#[inline(always)]
pub fn u256_to_f64(value: U256) -> f64 {
    if value <= U256::from(u128::MAX) {
        let v: u128 = value.to();
        v as f64
    } else {
        let limbs = value.as_limbs();
        let mut acc = 0f64;
        for (i, limb) in limbs.iter().enumerate() {
            acc += (*limb as f64) * 2f64.powi(64 * i as i32);
        }
        acc
    }
}

/// value * (10000 + bps) / 10000
#[inline(always)]
pub fn apply_bps_up(value: U256, bps: u16) -> U256 {
    value * U256::from(10_000u64 + u64::from(bps)) / BPS_DENOMINATOR
}

/// value * (10000 - bps) / 10000
#[inline(always)]
pub fn apply_bps_down(value: U256, bps: u16) -> U256 {
    value * U256::from(10_000u64.saturating_sub(u64::from(bps))) / BPS_DENOMINATOR
}

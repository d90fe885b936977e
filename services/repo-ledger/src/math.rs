//! Fixed-point valuation math
//!
//! COMPLIANCE:
//! - Integer arithmetic only
//! - Every multiplication checked or widened to 256 bits

use crate::error::{LedgerError, LedgerResult};
use services_common::{MAX_DECIMALS, RATE_PRECISION, THREESIXTY_DAYCOUNT_SECONDS, Timestamp};

const LOW_MASK: u128 = u64::MAX as u128;

/// Full 256-bit product as (high, low) words
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let (a_lo, a_hi) = (a & LOW_MASK, a >> 64);
    let (b_lo, b_hi) = (b & LOW_MASK, b >> 64);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & LOW_MASK) + (hl & LOW_MASK);
    let lo = (ll & LOW_MASK) | (mid << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (hi, lo)
}

/// `floor(a * b / denom)` without intermediate overflow
pub fn mul_div(a: u128, b: u128, denom: u128) -> LedgerResult<u128> {
    if denom == 0 {
        return Err(LedgerError::ArithmeticOverflow("division by zero"));
    }
    let (hi, lo) = mul_wide(a, b);
    if hi == 0 {
        return Ok(lo / denom);
    }
    if hi >= denom {
        return Err(LedgerError::ArithmeticOverflow("mul_div quotient"));
    }

    // Shift-subtract long division; remainder stays below denom
    let mut rem = hi;
    let mut quot = 0u128;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> bit) & 1);
        quot <<= 1;
        if carry == 1 || rem >= denom {
            rem = rem.wrapping_sub(denom);
            quot |= 1;
        }
    }
    Ok(quot)
}

/// `10^decimals`
pub fn pow10(decimals: u8) -> LedgerResult<u128> {
    if decimals > MAX_DECIMALS {
        return Err(LedgerError::ArithmeticOverflow("decimal precision"));
    }
    Ok(10u128.pow(u32::from(decimals)))
}

/// Whether an instrument maturing at `maturity` has matured by `now`
#[inline(always)]
#[must_use]
pub fn has_matured(maturity: Timestamp, now: Timestamp) -> bool {
    maturity <= now
}

/// Convert a repo token balance into purchase-asset units at `precision`
///
/// `balance * redemption_value * precision / (10^decimals * RATE_PRECISION)`
pub fn normalize(
    balance: u128,
    redemption_value: u128,
    decimals: u8,
    precision: u128,
) -> LedgerResult<u128> {
    let base_units = mul_div(balance, redemption_value, RATE_PRECISION)?;
    mul_div(base_units, precision, pow10(decimals)?)
}

/// Fraction of a 360-day year left until maturity, scaled by `precision`
pub fn time_fraction(maturity: Timestamp, precision: u128, now: Timestamp) -> LedgerResult<u128> {
    let remaining = u128::from(now.secs_until(maturity));
    mul_div(remaining, precision, u128::from(THREESIXTY_DAYCOUNT_SECONDS))
}

/// Discount a normalized amount with simple interest on a 360-day basis
///
/// `normalized / (1 + rate * remaining_days / 360)`; matured amounts are
/// valued at par.
pub fn present_value(
    normalized: u128,
    precision: u128,
    maturity: Timestamp,
    rate: u128,
    now: Timestamp,
) -> LedgerResult<u128> {
    if has_matured(maturity, now) {
        return Ok(normalized);
    }
    let fraction = time_fraction(maturity, precision, now)?;
    let discount = mul_div(rate, fraction, RATE_PRECISION)?;
    let denom = precision
        .checked_add(discount)
        .ok_or(LedgerError::ArithmeticOverflow("discount denominator"))?;
    mul_div(normalized, precision, denom)
}

/// Remaining seconds weighted by amount, zero once matured
pub fn weighted_time_to_maturity(
    maturity: Timestamp,
    amount: u128,
    now: Timestamp,
) -> LedgerResult<u128> {
    u128::from(now.secs_until(maturity))
        .checked_mul(amount)
        .ok_or(LedgerError::ArithmeticOverflow("weighted time to maturity"))
}

//! Integer Token Amounts
//!
//! All accounting is done in whole smallest-unit integers. No floating
//! point appears anywhere in settlement.
//!
//! ## Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Amount: u64 smallest units (9 decimals)                    │
//! │  1 HLX = 1_000_000_000 units                                │
//! │                                                             │
//! │  Products (stake * reward) are widened to u128 before the   │
//! │  division, so floor(a * b / c) never overflows for u64 a,b. │
//! └─────────────────────────────────────────────────────────────┘
//! ```

/// Token amount in smallest units.
pub type Amount = u64;

/// Decimal places of the stake token.
pub const TOKEN_DECIMALS: u32 = 9;

/// 1.0 token in smallest units.
pub const ONE_TOKEN: Amount = 1_000_000_000;

/// Basis points denominator (100% = 10_000 bps).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Convert whole tokens to smallest units.
#[inline]
pub const fn tokens(whole: u64) -> Amount {
    whole * ONE_TOKEN
}

/// `floor(a * b / c)` with a u128 intermediate.
///
/// Returns `None` when `c == 0` or the result does not fit in an `Amount`.
#[inline]
pub fn mul_div_floor(a: Amount, b: Amount, c: Amount) -> Option<Amount> {
    if c == 0 {
        return None;
    }
    let product = (a as u128) * (b as u128);
    Amount::try_from(product / c as u128).ok()
}

/// `floor(amount * bps / 10_000)`.
///
/// `bps` above 10_000 is clamped to 100%.
#[inline]
pub fn bps_of(amount: Amount, bps: u64) -> Amount {
    let bps = bps.min(BPS_DENOMINATOR);
    // bps <= denominator, so the result is <= amount and always fits
    ((amount as u128 * bps as u128) / BPS_DENOMINATOR as u128) as Amount
}

/// Format an amount as a decimal token string (for logs).
pub fn format_tokens(amount: Amount) -> String {
    let whole = amount / ONE_TOKEN;
    let frac = amount % ONE_TOKEN;
    if frac == 0 {
        format!("{}", whole)
    } else {
        let frac = format!("{:09}", frac);
        format!("{}.{}", whole, frac.trim_end_matches('0'))
    }
}

// =============================================================================
// TESTS
// =============================================================================

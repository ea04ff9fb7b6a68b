//! Exact attoFIL arithmetic and display formatting.
//!
//! All monetary state is carried as integer attoFIL (`U256`, or `I256` where a
//! figure can legitimately go negative). Fractional values only exist at two
//! boundaries: FIL-denominated pool reads coming in (`Decimal`), and
//! percentage/FIL strings going out.

use alloy::primitives::{uint, I256, U256};
use rust_decimal::Decimal;
use serde::Serializer;

use crate::errors::PoolscopeError;

/// Subunits per whole FIL.
pub const WAD: U256 = uint!(1_000_000_000_000_000_000_U256);

/// Decimal places of the native unit.
pub const ATTO_DECIMALS: u32 = 18;

/// Chain epochs per year (30s epochs, 365.25 days).
pub const EPOCHS_IN_YEAR: u64 = 1_051_920;

/// Chain epochs per day.
pub const EPOCHS_IN_DAY: u64 = 2_880;

/// Parse a FIL-denominated decimal string into attoFIL.
///
/// Exact for integral inputs; fractional digits beyond 18 are truncated
/// (fixed multiply-then-truncate, matching the contract-read conversion the
/// pool SDK performs).
pub fn parse_fil_to_atto(s: &str) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        return Err(PoolscopeError::Conversion("empty amount".into()).into());
    }
    if s.starts_with('-') {
        return Err(PoolscopeError::Conversion(format!("negative amount: {s}")).into());
    }

    let (whole, frac) = match s.split_once('.') {
        Some((a, b)) => (a, b),
        None => (s, ""),
    };

    let whole_v: U256 = if whole.is_empty() {
        U256::ZERO
    } else {
        whole
            .parse()
            .map_err(|e| PoolscopeError::Conversion(format!("whole part of {s:?}: {e}")))?
    };

    // Truncate past atto precision, zero-pad up to it.
    let mut frac_s: String = frac
        .chars()
        .take(ATTO_DECIMALS as usize)
        .collect();
    if !frac_s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PoolscopeError::Conversion(format!("fractional part of {s:?}")).into());
    }
    while frac_s.len() < ATTO_DECIMALS as usize {
        frac_s.push('0');
    }
    let frac_v: U256 = frac_s
        .parse()
        .map_err(|e| PoolscopeError::Conversion(format!("fractional part of {s:?}: {e}")))?;

    whole_v
        .checked_mul(WAD)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| PoolscopeError::Conversion(format!("amount overflow: {s}")).into())
}

/// Convert an exact FIL-denominated `Decimal` into attoFIL.
pub fn fil_to_atto(d: &Decimal) -> eyre::Result<U256> {
    parse_fil_to_atto(&d.to_string())
}

/// Represent an attoFIL amount as a FIL-denominated `Decimal` (exact).
pub fn atto_to_fil(v: U256) -> eyre::Result<Decimal> {
    let raw: u128 = v
        .try_into()
        .map_err(|_| PoolscopeError::Conversion(format!("amount beyond decimal range: {v}")))?;
    let signed = i128::try_from(raw)
        .map_err(|_| PoolscopeError::Conversion(format!("amount beyond decimal range: {v}")))?;
    Decimal::try_from_i128_with_scale(signed, ATTO_DECIMALS)
        .map_err(|e| PoolscopeError::Conversion(format!("amount {v}: {e}")).into())
}

/// Format a signed attoFIL amount as FIL with exactly three decimal places.
///
/// Rounds half-up on the third decimal.
pub fn format_fil(v: I256) -> String {
    let neg = v.is_negative();
    let abs = v.unsigned_abs();

    let milli_unit = WAD / U256::from(1_000_u64);
    let mut whole = abs / WAD;
    let rem = abs % WAD;
    let mut milli = u64::try_from(rem / milli_unit).unwrap_or(0);
    if rem % milli_unit >= milli_unit / U256::from(2_u64) {
        milli += 1;
        if milli == 1_000 {
            whole += U256::from(1_u64);
            milli = 0;
        }
    }

    let sign = if neg && (whole > U256::ZERO || milli > 0) {
        "-"
    } else {
        ""
    };
    format!("{sign}{whole}.{milli:03}")
}

/// `format_fil` for unsigned amounts.
pub fn format_fil_unsigned(v: U256) -> eyre::Result<String> {
    let signed = I256::try_from(v)
        .map_err(|_| PoolscopeError::Conversion(format!("amount beyond signed range: {v}")))?;
    Ok(format_fil(signed))
}

/// Annualize a WAD-scaled per-epoch rate into a plain yearly fraction.
///
/// `annual = rate × EPOCHS_IN_YEAR ÷ WAD`, evaluated exactly.
pub fn annualize_rate(rate_per_epoch: U256) -> eyre::Result<Decimal> {
    let rate: u128 = rate_per_epoch
        .try_into()
        .map_err(|_| PoolscopeError::Conversion(format!("rate out of range: {rate_per_epoch}")))?;
    let scaled = rate
        .checked_mul(u128::from(EPOCHS_IN_YEAR))
        .ok_or_else(|| PoolscopeError::Conversion(format!("rate out of range: {rate_per_epoch}")))?;
    let signed = i128::try_from(scaled)
        .map_err(|_| PoolscopeError::Conversion(format!("rate out of range: {rate_per_epoch}")))?;
    Decimal::try_from_i128_with_scale(signed, ATTO_DECIMALS)
        .map_err(|e| PoolscopeError::Conversion(format!("rate {rate_per_epoch}: {e}")).into())
}

/// Render a fraction as a percentage with exactly three decimal places.
pub fn format_percent(fraction: Decimal) -> eyre::Result<String> {
    let pct = fraction
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| PoolscopeError::Conversion(format!("percentage overflow: {fraction}")))?;
    Ok(format!("{pct:.3}%"))
}

pub fn serialize_u256_dec<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

pub fn serialize_i256_dec<S: Serializer>(v: &I256, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

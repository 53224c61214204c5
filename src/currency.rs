//! Currency/unit codes and fixed-precision amount validation.
//!
//! Accounts can hold fiat currencies (ISO 4217 codes with their standard
//! minor-unit scale) or asset tickers such as stock symbols, which get a
//! generous default scale for fractional holdings. Amounts are
//! `rust_decimal::Decimal` everywhere; raw floats never enter the ledger.

use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};

/// Minor-unit scales for the fiat currencies the ledger recognizes.
const FIAT_SCALES: &[(&str, u32)] = &[
    ("KRW", 0),
    ("JPY", 0),
    ("VND", 0),
    ("USD", 2),
    ("EUR", 2),
    ("GBP", 2),
    ("CNY", 2),
    ("HKD", 2),
    ("CHF", 2),
    ("AUD", 2),
    ("CAD", 2),
    ("SGD", 2),
];

/// Decimal places allowed for non-fiat asset tickers (fractional shares).
pub const ASSET_SCALE: u32 = 8;

/// Maximum decimal places an amount in `code` may carry.
pub fn scale_of(code: &str) -> u32 {
    FIAT_SCALES
        .iter()
        .find(|(fiat, _)| *fiat == code)
        .map(|(_, scale)| *scale)
        .unwrap_or(ASSET_SCALE)
}

/// Validate a currency/unit code at the creation boundary.
///
/// Codes are 2-12 ASCII uppercase alphanumerics starting with a letter:
/// `KRW`, `USD`, `GOOGL`. Anything else is `InvalidCurrency`.
pub fn validate_code(code: &str) -> Result<()> {
    let valid_shape = code.len() >= 2
        && code.len() <= 12
        && code.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());

    if valid_shape {
        Ok(())
    } else {
        Err(LedgerError::InvalidCurrency {
            code: code.to_string(),
        })
    }
}

/// Reject amounts whose precision exceeds the currency's scale.
///
/// Trailing zeros are ignored: `10.00` KRW is fine, `10.5` KRW is not.
pub fn check_scale(amount: Decimal, currency: &str) -> Result<()> {
    let scale = scale_of(currency);
    if amount.normalize().scale() > scale {
        return Err(LedgerError::ExcessivePrecision {
            amount,
            currency: currency.to_string(),
            scale,
        });
    }
    Ok(())
}

/// Boundary check for caller-supplied movement amounts: strictly positive
/// and within the currency's scale.
pub fn check_amount(amount: Decimal, currency: &str) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount { amount });
    }
    check_scale(amount, currency)
}

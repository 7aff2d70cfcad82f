//! Currency codes and decimal amount formatting.
//!
//! All amounts computed by cartsync are client-side display estimates. The
//! commerce backend recomputes totals before any charge is made.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Format an amount in the given currency, rounded to two places.
#[must_use]
pub fn format_amount(amount: Decimal, currency_code: &CurrencyCode) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    match currency_code.symbol() {
        Some(symbol) => format!("{symbol}{rounded:.2}"),
        None => format!("{rounded:.2} {currency_code}"),
    }
}

/// ISO 4217 currency codes.
///
/// Codes the storefront formats with a symbol are enumerated; anything else
/// the backend sends is carried through as [`CurrencyCode::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
    INR,
    /// Any other code, stored uppercased.
    Other(String),
}

impl CurrencyCode {
    /// Display symbol, if the currency has a well-known one.
    #[must_use]
    pub const fn symbol(&self) -> Option<&'static str> {
        match self {
            Self::USD | Self::CAD | Self::AUD => Some("$"),
            Self::EUR => Some("€"),
            Self::GBP => Some("£"),
            Self::INR => Some("₹"),
            Self::Other(_) => None,
        }
    }

    /// The three-letter code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
            Self::INR => "INR",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<String> for CurrencyCode {
    fn from(code: String) -> Self {
        let upper = code.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "USD" => Self::USD,
            "EUR" => Self::EUR,
            "GBP" => Self::GBP,
            "CAD" => Self::CAD,
            "AUD" => Self::AUD,
            "INR" => Self::INR,
            _ => Self::Other(upper),
        }
    }
}

impl From<&str> for CurrencyCode {
    fn from(code: &str) -> Self {
        Self::from(code.to_owned())
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.code().to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount_with_symbol() {
        assert_eq!(format_amount(Decimal::new(275, 1), &CurrencyCode::USD), "$27.50");
        assert_eq!(format_amount(Decimal::new(10005, 3), &CurrencyCode::GBP), "£10.01");
    }

    #[test]
    fn test_unknown_currency_display() {
        assert_eq!(format_amount(Decimal::new(5, 0), &CurrencyCode::from("jpy")), "5.00 JPY");
    }

    #[test]
    fn test_currency_code_roundtrips_through_string() {
        let code: CurrencyCode = serde_json::from_str("\"eur\"").unwrap();
        assert_eq!(code, CurrencyCode::EUR);
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"EUR\"");
    }

    #[test]
    fn test_empty_currency_defaults_to_usd() {
        assert_eq!(CurrencyCode::from(""), CurrencyCode::USD);
    }
}

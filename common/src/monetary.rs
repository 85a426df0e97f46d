//! Currency metadata and amount rounding.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalize a currency code for lookups and cache keys.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Round an amount to `decimal_places`, half away from zero.
pub fn round_amount(value: Decimal, decimal_places: u32) -> Decimal {
    value.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointAwayFromZero)
}

/// A currency known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Currency code (ISO 4217 for fiat), upper case.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Precision used when rounding amounts in this currency.
    pub decimal_places: u32,
    /// Whether the currency can currently be funded or traded.
    pub is_active: bool,
    /// Whether the currency is a crypto asset.
    pub is_crypto: bool,
    /// When the currency was registered.
    pub created_at: DateTime<Utc>,
}

impl Currency {
    /// Create a new active fiat currency.
    pub fn new(code: &str, name: impl Into<String>, decimal_places: u32) -> Self {
        Self {
            code: normalize_code(code),
            name: name.into(),
            decimal_places,
            is_active: true,
            is_crypto: false,
            created_at: Utc::now(),
        }
    }

    /// Mark the currency as a crypto asset.
    pub fn crypto(mut self) -> Self {
        self.is_crypto = true;
        self
    }

    /// Mark the currency as inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Round an amount to this currency's precision.
    pub fn round(&self, value: Decimal) -> Decimal {
        round_amount(value, self.decimal_places)
    }

    /// Common currencies
    pub fn ngn() -> Self {
        Self::new("NGN", "Nigerian Naira", 2)
    }

    pub fn usd() -> Self {
        Self::new("USD", "US Dollar", 2)
    }

    pub fn eur() -> Self {
        Self::new("EUR", "Euro", 2)
    }

    pub fn gbp() -> Self {
        Self::new("GBP", "British Pound", 2)
    }

    pub fn jpy() -> Self {
        Self::new("JPY", "Japanese Yen", 0)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" ngn "), "NGN");
        assert_eq!(Currency::new("usd", "US Dollar", 2).code, "USD");
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_amount(dec!(10.005), 2), dec!(10.01));
        assert_eq!(round_amount(dec!(10.004), 2), dec!(10.00));
        assert_eq!(round_amount(dec!(2.5), 0), dec!(3));
    }

    #[test]
    fn test_currency_round() {
        assert_eq!(Currency::usd().round(dec!(9.999)), dec!(10.00));
        assert_eq!(Currency::jpy().round(dec!(150.5)), dec!(151));
    }
}

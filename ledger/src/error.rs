//! Ledger error types.

use fxwallet_common::{RegistryError, WalletId};
use fxwallet_fx::FxError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the ledger engine.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Unknown or inactive currency code.
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    /// Amount is not positive or exceeds the currency precision.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Funding reference is empty.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Trade from a currency into itself.
    #[error("Cannot trade {0} into itself")]
    SameCurrencyTrade(String),

    /// A debit would drive a non-exempt balance negative.
    #[error("Insufficient funds in {currency} for wallet {wallet}: required {required}, available {available}")]
    InsufficientFunds {
        wallet: WalletId,
        currency: String,
        required: Decimal,
        available: Decimal,
    },

    /// No usable exchange rate.
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    /// A transaction with this reference is already committed.
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    /// Storage failure; the unit of work was rolled back.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LedgerError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::MarketDataUnavailable(_) | LedgerError::Storage(_)
        )
    }

    /// Stable error code for callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidCurrency(_) => "INVALID_CURRENCY",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::InvalidReference(_) => "INVALID_REFERENCE",
            LedgerError::SameCurrencyTrade(_) => "SAME_CURRENCY_TRADE",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::MarketDataUnavailable(_) => "MARKET_DATA_UNAVAILABLE",
            LedgerError::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            LedgerError::Storage(_) => "STORAGE_ERROR",
            LedgerError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<FxError> for LedgerError {
    fn from(err: FxError) -> Self {
        LedgerError::MarketDataUnavailable(err.to_string())
    }
}

impl From<RegistryError> for LedgerError {
    fn from(err: RegistryError) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::SameCurrencyTrade("USD".into()).error_code(),
            "SAME_CURRENCY_TRADE"
        );
        assert!(LedgerError::Storage("down".into()).is_retryable());
        assert!(!LedgerError::InvalidCurrency("XYZ".into()).is_retryable());
    }

    #[test]
    fn test_fx_error_maps_to_market_data() {
        let err: LedgerError = FxError::ProviderError("timeout".into()).into();
        assert_eq!(err.error_code(), "MARKET_DATA_UNAVAILABLE");
    }
}

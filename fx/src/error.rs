//! FX error types.

use fxwallet_common::RegistryError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur while pricing a currency pair.
#[derive(Debug, Error)]
pub enum FxError {
    /// No usable rate could be produced for the caller.
    #[error("Market data unavailable for {subject}: {reason}")]
    MarketDataUnavailable { subject: String, reason: String },

    /// Provider has no rate for the requested pair.
    #[error("Rate not available for {0}")]
    RateNotAvailable(String),

    /// Provider returned an error.
    #[error("Rate provider error: {0}")]
    ProviderError(String),

    /// Provider returned a non-positive rate.
    #[error("Invalid rate {rate} for {pair}")]
    InvalidRate { pair: String, rate: Decimal },

    /// Currency registry lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FxError {
    /// Wrap any failure as `MarketDataUnavailable` for the given subject.
    pub fn unavailable(subject: impl Into<String>, cause: &FxError) -> Self {
        match cause {
            FxError::MarketDataUnavailable { subject, reason } => FxError::MarketDataUnavailable {
                subject: subject.clone(),
                reason: reason.clone(),
            },
            other => FxError::MarketDataUnavailable {
                subject: subject.into(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

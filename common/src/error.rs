//! Error types shared by collaborator contracts.

use thiserror::Error;

/// Errors raised by a currency registry backend.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// The registry backend could not be reached.
    #[error("Currency registry unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for registry lookups.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

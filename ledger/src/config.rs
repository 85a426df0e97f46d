//! Ledger configuration.

use fxwallet_common::WalletId;
use uuid::Uuid;

/// Well-known id of the external provider wallet.
pub const EXTERNAL_PROVIDER_WALLET: u128 = 1;

/// Well-known id of the system reserve wallet.
pub const SYSTEM_RESERVE_WALLET: u128 = 2;

/// Ledger engine configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Wallet debited when value enters the system.
    pub external_wallet_id: WalletId,
    /// System reserve wallet.
    pub reserve_wallet_id: WalletId,
    /// Database URL, when backed by PostgreSQL.
    pub database_url: Option<String>,
    /// Page size used when the caller passes none.
    pub default_page_size: usize,
    /// Largest page a caller may request.
    pub max_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            external_wallet_id: WalletId::from_uuid(Uuid::from_u128(EXTERNAL_PROVIDER_WALLET)),
            reserve_wallet_id: WalletId::from_uuid(Uuid::from_u128(SYSTEM_RESERVE_WALLET)),
            database_url: None,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }

        if let Ok(id) = std::env::var("LEDGER_EXTERNAL_WALLET_ID") {
            if let Ok(id) = WalletId::parse(&id) {
                config.external_wallet_id = id;
            }
        }

        if let Ok(id) = std::env::var("LEDGER_RESERVE_WALLET_ID") {
            if let Ok(id) = WalletId::parse(&id) {
                config.reserve_wallet_id = id;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.external_wallet_id == self.reserve_wallet_id {
            return Err("External and reserve wallets must differ".to_string());
        }

        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err("Default page size must be between 1 and the max page size".to_string());
        }

        if matches!(&self.database_url, Some(url) if url.is_empty()) {
            return Err("Database URL cannot be empty".to_string());
        }

        Ok(())
    }
}

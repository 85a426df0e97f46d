//! Wallet balance rows.

use chrono::{DateTime, Utc};
use fxwallet_common::WalletId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Key of a balance row: one per (wallet, currency).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub wallet_id: WalletId,
    pub currency: String,
}

impl BalanceKey {
    pub fn new(wallet_id: WalletId, currency: impl Into<String>) -> Self {
        Self {
            wallet_id,
            currency: currency.into(),
        }
    }
}

/// Running balance of one wallet in one currency.
///
/// Maintained incrementally by every ledger entry; equals credits minus
/// debits for the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    /// Wallet identifier.
    pub wallet_id: WalletId,
    /// Currency code.
    pub currency: String,
    /// Signed balance.
    pub balance: Decimal,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl WalletBalance {
    /// Create a new zero balance.
    pub fn zero(wallet_id: WalletId, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            wallet_id,
            currency: currency.into(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Row key.
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.wallet_id, self.currency.clone())
    }

    /// Check if the balance covers a debit.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

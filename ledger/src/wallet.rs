//! Wallet definitions.

use chrono::{DateTime, Utc};
use fxwallet_common::{UserId, WalletId};
use serde::{Deserialize, Serialize};

/// Wallet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletKind {
    /// Owned by a user. Balances may not go negative.
    User,
    /// Counterparty for value entering the system from outside.
    External,
    /// System reserve.
    Reserve,
}

impl WalletKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletKind::User => "USER",
            WalletKind::External => "EXTERNAL",
            WalletKind::Reserve => "RESERVE",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(WalletKind::User),
            "EXTERNAL" => Some(WalletKind::External),
            "RESERVE" => Some(WalletKind::Reserve),
            _ => None,
        }
    }
}

/// A wallet: one per user, plus the system wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier.
    pub id: WalletId,
    /// Owning user; `None` for system wallets.
    pub owner: Option<UserId>,
    /// Wallet kind.
    pub kind: WalletKind,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a new user wallet.
    pub fn for_user(owner: UserId) -> Self {
        Self {
            id: WalletId::new(),
            owner: Some(owner),
            kind: WalletKind::User,
            created_at: Utc::now(),
        }
    }

    /// Create a system wallet with a well-known id.
    pub fn system(id: WalletId, kind: WalletKind) -> Self {
        Self {
            id,
            owner: None,
            kind,
            created_at: Utc::now(),
        }
    }

    /// System wallets may carry a negative balance.
    pub fn is_exempt(&self) -> bool {
        self.kind != WalletKind::User
    }
}

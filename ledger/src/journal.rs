//! Transactions and ledger entries for double-entry bookkeeping.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fxwallet_common::{EntryId, TransactionId, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::balance::BalanceKey;
use crate::wallet::Wallet;

/// Type of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Debit entry (decreases the wallet balance).
    Debit,
    /// Credit entry (increases the wallet balance).
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "DEBIT",
            EntryType::Credit => "CREDIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEBIT" => Some(EntryType::Debit),
            "CREDIT" => Some(EntryType::Credit),
            _ => None,
        }
    }
}

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Awaiting asynchronous confirmation.
    Pending,
    /// Committed. Immutable from here on.
    Success,
    /// Confirmation failed.
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "SUCCESS" => Some(TransactionStatus::Success),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// What a transaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Value entered a user wallet from the external provider.
    Funding,
    /// A user swapped one currency for another.
    Trade,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Funding => "FUNDING",
            TransactionKind::Trade => "TRADE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FUNDING" => Some(TransactionKind::Funding),
            "TRADE" => Some(TransactionKind::Trade),
            _ => None,
        }
    }
}

/// Header of one money movement. Owns its ledger entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID.
    pub id: TransactionId,
    /// Wallet the movement was requested for.
    pub wallet_id: WalletId,
    /// Caller-supplied idempotency key; globally unique.
    pub reference: String,
    /// What the transaction did.
    pub kind: TransactionKind,
    /// Amount, in `currency`.
    pub amount: Decimal,
    /// Currency code of `amount`.
    pub currency: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Status.
    pub status: TransactionStatus,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// A successful funding transaction.
    pub fn funding(
        wallet_id: WalletId,
        reference: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let currency = currency.into();
        Self {
            id: TransactionId::new(),
            wallet_id,
            reference: reference.into(),
            kind: TransactionKind::Funding,
            amount,
            description: Some(format!("Funded {} via External Provider", currency)),
            currency,
            status: TransactionStatus::Success,
            metadata: serde_json::json!({ "source": "external_provider" }),
            created_at: Utc::now(),
        }
    }

    /// A successful trade transaction. `amount` is the debited side.
    pub fn trade(
        wallet_id: WalletId,
        reference: impl Into<String>,
        amount: Decimal,
        from: &str,
        to: &str,
        credited: Decimal,
        rate: Decimal,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            wallet_id,
            reference: reference.into(),
            kind: TransactionKind::Trade,
            amount,
            currency: from.to_string(),
            description: Some(format!("Traded {} {} for {} {}", amount, from, credited, to)),
            status: TransactionStatus::Success,
            metadata: serde_json::json!({
                "from_currency": from,
                "to_currency": to,
                "debited": amount.to_string(),
                "credited": credited.to_string(),
                "rate": rate.to_string(),
            }),
            created_at: Utc::now(),
        }
    }
}

/// An immutable record of one debit or credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Owning transaction.
    pub transaction_id: TransactionId,
    /// Wallet affected.
    pub wallet_id: WalletId,
    /// Currency code.
    pub currency: String,
    /// Non-negative magnitude.
    pub amount: Decimal,
    /// Entry type (debit or credit).
    pub entry_type: EntryType,
    /// Balance of the (wallet, currency) row after this entry.
    pub balance_after: Decimal,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Get signed effect on the wallet balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Debit => -self.amount,
            EntryType::Credit => self.amount,
        }
    }
}

/// One leg of a money movement, before it is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub wallet_id: WalletId,
    /// Whether the wallet may go negative.
    pub exempt: bool,
    pub currency: String,
    pub amount: Decimal,
    pub entry_type: EntryType,
}

impl Posting {
    /// Debit `amount` from `wallet`.
    pub fn debit(wallet: &Wallet, currency: impl Into<String>, amount: Decimal) -> Self {
        Self {
            wallet_id: wallet.id,
            exempt: wallet.is_exempt(),
            currency: currency.into(),
            amount,
            entry_type: EntryType::Debit,
        }
    }

    /// Credit `amount` to `wallet`.
    pub fn credit(wallet: &Wallet, currency: impl Into<String>, amount: Decimal) -> Self {
        Self {
            wallet_id: wallet.id,
            exempt: wallet.is_exempt(),
            currency: currency.into(),
            amount,
            entry_type: EntryType::Credit,
        }
    }

    /// Balance row this posting touches.
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.wallet_id, self.currency.clone())
    }

    /// Get signed effect on the wallet balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Debit => -self.amount,
            EntryType::Credit => self.amount,
        }
    }

    /// Materialize the entry for this posting.
    pub fn into_entry(self, transaction_id: TransactionId, balance_after: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: EntryId::new(),
            transaction_id,
            wallet_id: self.wallet_id,
            currency: self.currency,
            amount: self.amount,
            entry_type: self.entry_type,
            balance_after,
            created_at: Utc::now(),
        }
    }
}

/// The entries written by one transaction.
#[derive(Debug, Clone)]
pub struct JournalBatch {
    /// Entries in the batch.
    pub entries: Vec<LedgerEntry>,
    /// Transaction ID for the batch.
    pub transaction_id: TransactionId,
}

impl JournalBatch {
    /// Create a new batch.
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            entries: Vec::new(),
            transaction_id,
        }
    }

    /// Add an entry to the batch.
    pub fn add_entry(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    /// Verify the batch is balanced (debits == credits per currency).
    pub fn is_balanced(&self) -> bool {
        let mut balances: HashMap<&str, Decimal> = HashMap::new();

        for entry in &self.entries {
            *balances.entry(entry.currency.as_str()).or_insert(Decimal::ZERO) +=
                entry.signed_amount();
        }

        balances.values().all(|balance| balance.is_zero())
    }

    /// Get total debits in a currency.
    pub fn total_debits(&self, currency: &str) -> Decimal {
        self.total(currency, EntryType::Debit)
    }

    /// Get total credits in a currency.
    pub fn total_credits(&self, currency: &str) -> Decimal {
        self.total(currency, EntryType::Credit)
    }

    fn total(&self, currency: &str, entry_type: EntryType) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.entry_type == entry_type && e.currency == currency)
            .map(|e| e.amount)
            .sum()
    }
}

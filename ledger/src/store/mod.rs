//! Storage contract for the ledger.
//!
//! A [`LedgerStore`] answers read-only queries and opens units of work.
//! A [`LedgerTx`] is one all-or-nothing unit: nothing it writes is visible
//! to other callers until [`LedgerTx::commit`], and dropping it without
//! committing discards everything.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use fxwallet_common::{TransactionId, UserId, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::balance::WalletBalance;
use crate::error::LedgerResult;
use crate::journal::{LedgerEntry, Transaction, TransactionKind};
use crate::wallet::{Wallet, WalletKind};

/// Read side of the store, plus the entry point for units of work.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;

    /// Committed transaction with this reference, if any.
    async fn find_transaction_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>>;

    /// The user's wallet, if one was created.
    async fn find_user_wallet(&self, user_id: &UserId) -> LedgerResult<Option<Wallet>>;

    /// Committed balances of a wallet, ordered by currency code.
    async fn balances_for_wallet(&self, wallet_id: WalletId) -> LedgerResult<Vec<WalletBalance>>;

    /// Transactions of a wallet, newest first, plus the total count.
    async fn transactions_for_wallet(
        &self,
        wallet_id: WalletId,
        offset: usize,
        limit: usize,
    ) -> LedgerResult<(Vec<Transaction>, usize)>;

    /// Entries owned by a transaction, in posting order.
    async fn entries_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> LedgerResult<Vec<LedgerEntry>>;

    /// Every balance row and the entry sums, read from one committed state.
    async fn audit_snapshot(&self) -> LedgerResult<AuditSnapshot>;
}

/// One unit of work.
///
/// Balance rows returned by [`LedgerTx::lock_balance`] stay exclusively
/// locked until the unit commits or rolls back.
#[async_trait]
pub trait LedgerTx: Send {
    /// Transaction with this reference, committed or staged in this unit.
    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>>;

    /// The user's wallet, created if absent.
    async fn get_or_create_user_wallet(&mut self, user_id: &UserId) -> LedgerResult<Wallet>;

    /// A system wallet by well-known id, provisioned if absent.
    async fn get_or_create_system_wallet(
        &mut self,
        id: WalletId,
        kind: WalletKind,
    ) -> LedgerResult<Wallet>;

    /// Insert a transaction header. Fails with `DuplicateReference` if the
    /// reference is taken.
    async fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()>;

    /// Insert a ledger entry.
    async fn insert_entry(&mut self, entry: &LedgerEntry) -> LedgerResult<()>;

    /// Lock the (wallet, currency) row, creating it at zero if absent, and
    /// return its current value. Locking a row twice in one unit returns
    /// the value staged so far.
    async fn lock_balance(&mut self, wallet_id: WalletId, currency: &str)
        -> LedgerResult<WalletBalance>;

    /// Stage a new value for a row locked in this unit.
    async fn update_balance(&mut self, balance: &WalletBalance) -> LedgerResult<()>;

    /// Make every write of this unit visible at once.
    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    /// Discard every write of this unit.
    async fn rollback(self: Box<Self>) -> LedgerResult<()>;
}

/// Balances and entry sums as of a single point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    /// Every balance row, ordered by wallet and currency.
    pub balances: Vec<WalletBalance>,
    /// Credit and debit sums per (wallet, currency).
    pub entry_totals: Vec<EntryTotals>,
    /// Credit and debit sums per (transaction, currency).
    pub transaction_totals: Vec<TransactionTotals>,
}

/// Sums of entries for one (wallet, currency) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTotals {
    pub wallet_id: WalletId,
    pub currency: String,
    pub credits: Decimal,
    pub debits: Decimal,
}

/// Sums of entries for one (transaction, currency) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTotals {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub currency: String,
    pub credits: Decimal,
    pub debits: Decimal,
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Number of pages at this limit.
    pub fn total_pages(&self) -> usize {
        if self.limit == 0 {
            return 0;
        }
        (self.total + self.limit - 1) / self.limit
    }

    /// Whether a page follows this one.
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

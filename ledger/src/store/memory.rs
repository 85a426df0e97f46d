//! In-memory ledger store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fxwallet_common::{TransactionId, UserId, WalletId};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{AuditSnapshot, EntryTotals, LedgerStore, LedgerTx, TransactionTotals};
use crate::balance::{BalanceKey, WalletBalance};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{EntryType, LedgerEntry, Transaction};
use crate::wallet::{Wallet, WalletKind};

#[derive(Default)]
struct Journal {
    transactions: HashMap<TransactionId, Transaction>,
    by_reference: HashMap<String, TransactionId>,
    by_wallet: HashMap<WalletId, Vec<TransactionId>>,
    entries: Vec<LedgerEntry>,
    entries_by_transaction: HashMap<TransactionId, Vec<usize>>,
}

impl Journal {
    fn insert_transaction(&mut self, transaction: Transaction) {
        self.by_reference
            .insert(transaction.reference.clone(), transaction.id);
        self.by_wallet
            .entry(transaction.wallet_id)
            .or_default()
            .push(transaction.id);
        self.transactions.insert(transaction.id, transaction);
    }

    fn push_entry(&mut self, entry: LedgerEntry) {
        self.entries_by_transaction
            .entry(entry.transaction_id)
            .or_default()
            .push(self.entries.len());
        self.entries.push(entry);
    }

    fn by_reference(&self, reference: &str) -> Option<Transaction> {
        self.by_reference
            .get(reference)
            .and_then(|id| self.transactions.get(id))
            .cloned()
    }

    fn entry_totals(&self) -> Vec<EntryTotals> {
        let mut totals: HashMap<BalanceKey, (Decimal, Decimal)> = HashMap::new();

        for entry in &self.entries {
            let sums = totals
                .entry(BalanceKey::new(entry.wallet_id, entry.currency.clone()))
                .or_default();
            match entry.entry_type {
                EntryType::Credit => sums.0 += entry.amount,
                EntryType::Debit => sums.1 += entry.amount,
            }
        }

        totals
            .into_iter()
            .map(|(key, (credits, debits))| EntryTotals {
                wallet_id: key.wallet_id,
                currency: key.currency,
                credits,
                debits,
            })
            .collect()
    }

    fn transaction_totals(&self) -> LedgerResult<Vec<TransactionTotals>> {
        let mut totals: HashMap<(TransactionId, String), (Decimal, Decimal)> = HashMap::new();

        for entry in &self.entries {
            let sums = totals
                .entry((entry.transaction_id, entry.currency.clone()))
                .or_default();
            match entry.entry_type {
                EntryType::Credit => sums.0 += entry.amount,
                EntryType::Debit => sums.1 += entry.amount,
            }
        }

        let mut result = Vec::with_capacity(totals.len());
        for ((transaction_id, currency), (credits, debits)) in totals {
            let kind = self
                .transactions
                .get(&transaction_id)
                .map(|t| t.kind)
                .ok_or_else(|| {
                    LedgerError::Storage(format!("entries reference unknown transaction {}", transaction_id))
                })?;
            result.push(TransactionTotals {
                transaction_id,
                kind,
                currency,
                credits,
                debits,
            });
        }
        Ok(result)
    }
}

#[derive(Default)]
struct Shared {
    wallets: DashMap<WalletId, Wallet>,
    user_wallets: DashMap<UserId, WalletId>,
    /// Committed balance rows.
    balances: DashMap<BalanceKey, WalletBalance>,
    /// One exclusive lock per balance row.
    row_locks: DashMap<BalanceKey, Arc<Mutex<()>>>,
    journal: RwLock<Journal>,
}

impl Shared {
    fn sorted_balances(&self, keep: impl Fn(&WalletBalance) -> bool) -> Vec<WalletBalance> {
        let mut balances: Vec<WalletBalance> = self
            .balances
            .iter()
            .filter(|b| keep(b.value()))
            .map(|b| b.clone())
            .collect();
        balances.sort_by(|a, b| a.key().cmp(&b.key()));
        balances
    }
}

/// Ledger store held in process memory.
///
/// Units of work stage their writes and publish them at commit under the
/// journal write lock, where the reference uniqueness check also happens.
/// Wallet creation is published immediately: a wallet is an identity, and
/// an empty one left behind by a rolled-back unit carries no value.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed ledger entries.
    pub fn entry_count(&self) -> usize {
        self.shared.journal.read().entries.len()
    }

    /// Number of committed transactions.
    pub fn transaction_count(&self) -> usize {
        self.shared.journal.read().transactions.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryTx {
            shared: self.shared.clone(),
            transactions: Vec::new(),
            entries: Vec::new(),
            rows: HashMap::new(),
        }))
    }

    async fn find_transaction_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>> {
        Ok(self.shared.journal.read().by_reference(reference))
    }

    async fn find_user_wallet(&self, user_id: &UserId) -> LedgerResult<Option<Wallet>> {
        let wallet_id = match self.shared.user_wallets.get(user_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.shared.wallets.get(&wallet_id).map(|w| w.clone()))
    }

    async fn balances_for_wallet(&self, wallet_id: WalletId) -> LedgerResult<Vec<WalletBalance>> {
        // Commits write balances under the journal write lock.
        let _journal = self.shared.journal.read();
        Ok(self.shared.sorted_balances(|b| b.wallet_id == wallet_id))
    }

    async fn transactions_for_wallet(
        &self,
        wallet_id: WalletId,
        offset: usize,
        limit: usize,
    ) -> LedgerResult<(Vec<Transaction>, usize)> {
        let journal = self.shared.journal.read();
        let ids = match journal.by_wallet.get(&wallet_id) {
            Some(ids) => ids,
            None => return Ok((Vec::new(), 0)),
        };

        let items = ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| journal.transactions.get(id).cloned())
            .collect();

        Ok((items, ids.len()))
    }

    async fn entries_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let journal = self.shared.journal.read();
        Ok(journal
            .entries_by_transaction
            .get(&transaction_id)
            .map(|positions| positions.iter().map(|&i| journal.entries[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn audit_snapshot(&self) -> LedgerResult<AuditSnapshot> {
        let journal = self.shared.journal.read();
        Ok(AuditSnapshot {
            balances: self.shared.sorted_balances(|_| true),
            entry_totals: journal.entry_totals(),
            transaction_totals: journal.transaction_totals()?,
        })
    }
}

struct LockedRow {
    _guard: OwnedMutexGuard<()>,
    balance: WalletBalance,
    dirty: bool,
}

struct MemoryTx {
    shared: Arc<Shared>,
    transactions: Vec<Transaction>,
    entries: Vec<LedgerEntry>,
    rows: HashMap<BalanceKey, LockedRow>,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>> {
        if let Some(staged) = self.transactions.iter().find(|t| t.reference == reference) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.shared.journal.read().by_reference(reference))
    }

    async fn get_or_create_user_wallet(&mut self, user_id: &UserId) -> LedgerResult<Wallet> {
        let shared = &self.shared;
        let wallet_id = *shared
            .user_wallets
            .entry(user_id.clone())
            .or_insert_with(|| {
                let wallet = Wallet::for_user(user_id.clone());
                let id = wallet.id;
                shared.wallets.insert(id, wallet);
                id
            });

        shared
            .wallets
            .get(&wallet_id)
            .map(|w| w.clone())
            .ok_or_else(|| LedgerError::Storage(format!("wallet {} missing", wallet_id)))
    }

    async fn get_or_create_system_wallet(
        &mut self,
        id: WalletId,
        kind: WalletKind,
    ) -> LedgerResult<Wallet> {
        Ok(self
            .shared
            .wallets
            .entry(id)
            .or_insert_with(|| Wallet::system(id, kind))
            .value()
            .clone())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        let staged = self
            .transactions
            .iter()
            .any(|t| t.reference == transaction.reference);
        let committed = self
            .shared
            .journal
            .read()
            .by_reference
            .contains_key(&transaction.reference);

        if staged || committed {
            return Err(LedgerError::DuplicateReference(transaction.reference.clone()));
        }

        self.transactions.push(transaction.clone());
        Ok(())
    }

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> LedgerResult<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    async fn lock_balance(
        &mut self,
        wallet_id: WalletId,
        currency: &str,
    ) -> LedgerResult<WalletBalance> {
        let key = BalanceKey::new(wallet_id, currency);
        if let Some(row) = self.rows.get(&key) {
            return Ok(row.balance.clone());
        }

        let lock = self
            .shared
            .row_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        let balance = self
            .shared
            .balances
            .get(&key)
            .map(|b| b.clone())
            .unwrap_or_else(|| WalletBalance::zero(wallet_id, currency));

        self.rows.insert(
            key,
            LockedRow {
                _guard: guard,
                balance: balance.clone(),
                dirty: false,
            },
        );
        Ok(balance)
    }

    async fn update_balance(&mut self, balance: &WalletBalance) -> LedgerResult<()> {
        match self.rows.get_mut(&balance.key()) {
            Some(row) => {
                row.balance = balance.clone();
                row.dirty = true;
                Ok(())
            }
            None => Err(LedgerError::Storage(format!(
                "balance {}/{} updated without lock",
                balance.wallet_id, balance.currency
            ))),
        }
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let MemoryTx {
            shared,
            transactions,
            entries,
            rows,
        } = *self;

        let mut journal = shared.journal.write();

        if let Some(duplicate) = transactions
            .iter()
            .find(|t| journal.by_reference.contains_key(&t.reference))
        {
            return Err(LedgerError::DuplicateReference(duplicate.reference.clone()));
        }

        for transaction in transactions {
            journal.insert_transaction(transaction);
        }
        for entry in entries {
            journal.push_entry(entry);
        }
        for (key, row) in rows.iter().filter(|(_, row)| row.dirty) {
            shared.balances.insert(key.clone(), row.balance.clone());
        }

        drop(journal);
        drop(rows);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Posting;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    async fn credit(tx: &mut dyn LedgerTx, wallet: &Wallet, reference: &str, amount: Decimal) {
        let transaction = Transaction::funding(wallet.id, reference, amount, "NGN");
        tx.insert_transaction(&transaction).await.unwrap();

        let mut balance = tx.lock_balance(wallet.id, "NGN").await.unwrap();
        balance.balance += amount;
        let entry = Posting::credit(wallet, "NGN", amount).into_entry(transaction.id, balance.balance);
        tx.insert_entry(&entry).await.unwrap();
        tx.update_balance(&balance).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let wallet = tx.get_or_create_user_wallet(&UserId::new("u1")).await.unwrap();

        credit(tx.as_mut(), &wallet, "ref-1", dec!(100)).await;
        assert!(store.find_transaction_by_reference("ref-1").await.unwrap().is_none());

        tx.commit().await.unwrap();

        assert!(store.find_transaction_by_reference("ref-1").await.unwrap().is_some());
        let balances = store.balances_for_wallet(wallet.id).await.unwrap();
        assert_eq!(balances[0].balance, dec!(100));
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let wallet = tx.get_or_create_user_wallet(&UserId::new("u1")).await.unwrap();

        credit(tx.as_mut(), &wallet, "ref-1", dec!(100)).await;
        tx.rollback().await.unwrap();

        assert!(store.find_transaction_by_reference("ref-1").await.unwrap().is_none());
        assert!(store.balances_for_wallet(wallet.id).await.unwrap().is_empty());
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_unit() {
        let store = MemoryLedgerStore::new();
        let mut first = store.begin().await.unwrap();
        let wallet = first.get_or_create_user_wallet(&UserId::new("u1")).await.unwrap();
        credit(first.as_mut(), &wallet, "ref-1", dec!(100)).await;

        let mut second = store.begin().await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), second.lock_balance(wallet.id, "NGN")).await;
        assert!(blocked.is_err());

        first.commit().await.unwrap();

        let balance = second.lock_balance(wallet.id, "NGN").await.unwrap();
        assert_eq!(balance.balance, dec!(100));
    }

    #[tokio::test]
    async fn test_unrelated_rows_do_not_block() {
        let store = MemoryLedgerStore::new();
        let mut first = store.begin().await.unwrap();
        let wallet = first.get_or_create_user_wallet(&UserId::new("u1")).await.unwrap();
        first.lock_balance(wallet.id, "NGN").await.unwrap();

        let mut second = store.begin().await.unwrap();
        let result =
            tokio::time::timeout(Duration::from_millis(50), second.lock_balance(wallet.id, "USD")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_reference_detected_at_commit() {
        let store = MemoryLedgerStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let wallet = first.get_or_create_user_wallet(&UserId::new("u1")).await.unwrap();

        first
            .insert_transaction(&Transaction::funding(wallet.id, "ref-1", dec!(1), "NGN"))
            .await
            .unwrap();
        second
            .insert_transaction(&Transaction::funding(wallet.id, "ref-1", dec!(1), "NGN"))
            .await
            .unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;

        assert!(matches!(result, Err(LedgerError::DuplicateReference(r)) if r == "ref-1"));
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_audit_snapshot_sees_whole_commits() {
        let store = MemoryLedgerStore::new();
        let mut setup = store.begin().await.unwrap();
        let wallet = setup.get_or_create_user_wallet(&UserId::new("u1")).await.unwrap();
        setup.rollback().await.unwrap();

        let writer = {
            let store = store.clone();
            let wallet = wallet.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let mut tx = store.begin().await.unwrap();
                    credit(tx.as_mut(), &wallet, &format!("ref-{}", i), dec!(1)).await;
                    tx.commit().await.unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let snapshot = store.audit_snapshot().await.unwrap();
            let credited: Decimal = snapshot.entry_totals.iter().map(|t| t.credits).sum();
            let stored: Decimal = snapshot.balances.iter().map(|b| b.balance).sum();
            assert_eq!(stored, credited);
            assert_eq!(Decimal::from(snapshot.transaction_totals.len()), credited);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let balances = store.balances_for_wallet(wallet.id).await.unwrap();
        assert_eq!(balances[0].balance, dec!(200));
    }

    #[tokio::test]
    async fn test_user_wallet_is_stable() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = tx.get_or_create_user_wallet(&UserId::new("u1")).await.unwrap();
        let again = tx.get_or_create_user_wallet(&UserId::new("u1")).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(first.id, again.id);
        let found = store.find_user_wallet(&UserId::new("u1")).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_update_without_lock_rejected() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let balance = WalletBalance::zero(WalletId::new(), "NGN");

        let result = tx.update_balance(&balance).await;

        assert!(matches!(result, Err(LedgerError::Storage(_))));
    }
}

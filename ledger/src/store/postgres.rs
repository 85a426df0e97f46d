//! PostgreSQL ledger store.
//!
//! Balance rows are locked with `SELECT ... FOR UPDATE` inside a database
//! transaction; reference uniqueness is enforced by a unique index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxwallet_common::{EntryId, TransactionId, UserId, WalletId};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use tracing::info;
use uuid::Uuid;

use super::{AuditSnapshot, EntryTotals, LedgerStore, LedgerTx, TransactionTotals};
use crate::balance::WalletBalance;
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{EntryType, LedgerEntry, Transaction, TransactionKind, TransactionStatus};
use crate::wallet::{Wallet, WalletKind};

const TRANSACTION_COLUMNS: &str = "id, wallet_id, reference, kind, amount, currency_code, \
     description, status, metadata, created_at";
const ENTRY_COLUMNS: &str =
    "id, transaction_id, wallet_id, currency_code, amount, entry_type, balance_after, created_at";
const BALANCE_COLUMNS: &str = "wallet_id, currency_code, balance, created_at, updated_at";

const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn corrupt(what: &str, value: &str) -> LedgerError {
    LedgerError::Storage(format!("unknown {} '{}' in database", what, value))
}

#[derive(Debug, FromRow)]
struct WalletRow {
    id: Uuid,
    owner_id: Option<String>,
    kind: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<WalletRow> for Wallet {
    type Error = LedgerError;

    fn try_from(row: WalletRow) -> Result<Self, Self::Error> {
        Ok(Wallet {
            id: WalletId::from_uuid(row.id),
            owner: row.owner_id.map(UserId::new),
            kind: WalletKind::parse(&row.kind).ok_or_else(|| corrupt("wallet kind", &row.kind))?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BalanceRow {
    wallet_id: Uuid,
    currency_code: String,
    balance: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BalanceRow> for WalletBalance {
    fn from(row: BalanceRow) -> Self {
        WalletBalance {
            wallet_id: WalletId::from_uuid(row.wallet_id),
            currency: row.currency_code,
            balance: row.balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    wallet_id: Uuid,
    reference: String,
    kind: String,
    amount: Decimal,
    currency_code: String,
    description: Option<String>,
    status: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            wallet_id: WalletId::from_uuid(row.wallet_id),
            reference: row.reference,
            kind: TransactionKind::parse(&row.kind)
                .ok_or_else(|| corrupt("transaction kind", &row.kind))?,
            amount: row.amount,
            currency: row.currency_code,
            description: row.description,
            status: TransactionStatus::parse(&row.status)
                .ok_or_else(|| corrupt("transaction status", &row.status))?,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: Uuid,
    transaction_id: Uuid,
    wallet_id: Uuid,
    currency_code: String,
    amount: Decimal,
    entry_type: String,
    balance_after: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: EntryId::from_uuid(row.id),
            transaction_id: TransactionId::from_uuid(row.transaction_id),
            wallet_id: WalletId::from_uuid(row.wallet_id),
            currency: row.currency_code,
            amount: row.amount,
            entry_type: EntryType::parse(&row.entry_type)
                .ok_or_else(|| corrupt("entry type", &row.entry_type))?,
            balance_after: row.balance_after,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EntryTotalsRow {
    wallet_id: Uuid,
    currency_code: String,
    credits: Decimal,
    debits: Decimal,
}

#[derive(Debug, FromRow)]
struct TransactionTotalsRow {
    transaction_id: Uuid,
    kind: String,
    currency_code: String,
    credits: Decimal,
    debits: Decimal,
}

/// Ledger store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to ledger database");
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn find_transaction_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE reference = $1", TRANSACTION_COLUMNS);
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn find_user_wallet(&self, user_id: &UserId) -> LedgerResult<Option<Wallet>> {
        sqlx::query_as::<_, WalletRow>(
            "SELECT id, owner_id, kind, created_at FROM wallets WHERE owner_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Wallet::try_from)
        .transpose()
    }

    async fn balances_for_wallet(&self, wallet_id: WalletId) -> LedgerResult<Vec<WalletBalance>> {
        let sql = format!(
            "SELECT {} FROM wallet_balances WHERE wallet_id = $1 ORDER BY currency_code",
            BALANCE_COLUMNS
        );
        let rows = sqlx::query_as::<_, BalanceRow>(&sql)
            .bind(*wallet_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(WalletBalance::from).collect())
    }

    async fn transactions_for_wallet(
        &self,
        wallet_id: WalletId,
        offset: usize,
        limit: usize,
    ) -> LedgerResult<(Vec<Transaction>, usize)> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE wallet_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(*wallet_id.as_uuid())
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions WHERE wallet_id = $1")
            .bind(*wallet_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(Transaction::try_from)
            .collect::<LedgerResult<Vec<_>>>()?;
        Ok((items, total.max(0) as usize))
    }

    async fn entries_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE transaction_id = $1 ORDER BY created_at, id",
            ENTRY_COLUMNS
        );
        sqlx::query_as::<_, EntryRow>(&sql)
            .bind(*transaction_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect()
    }

    async fn audit_snapshot(&self) -> LedgerResult<AuditSnapshot> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "SELECT {} FROM wallet_balances ORDER BY wallet_id, currency_code",
            BALANCE_COLUMNS
        );
        let balances = sqlx::query_as::<_, BalanceRow>(&sql)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(WalletBalance::from)
            .collect();

        let entry_totals = sqlx::query_as::<_, EntryTotalsRow>(
            "SELECT wallet_id, currency_code, \
                    COALESCE(SUM(amount) FILTER (WHERE entry_type = 'CREDIT'), 0) AS credits, \
                    COALESCE(SUM(amount) FILTER (WHERE entry_type = 'DEBIT'), 0) AS debits \
             FROM ledger_entries GROUP BY wallet_id, currency_code",
        )
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| EntryTotals {
            wallet_id: WalletId::from_uuid(row.wallet_id),
            currency: row.currency_code,
            credits: row.credits,
            debits: row.debits,
        })
        .collect();

        let transaction_totals = sqlx::query_as::<_, TransactionTotalsRow>(
            "SELECT e.transaction_id, t.kind, e.currency_code, \
                    COALESCE(SUM(e.amount) FILTER (WHERE e.entry_type = 'CREDIT'), 0) AS credits, \
                    COALESCE(SUM(e.amount) FILTER (WHERE e.entry_type = 'DEBIT'), 0) AS debits \
             FROM ledger_entries e JOIN transactions t ON t.id = e.transaction_id \
             GROUP BY e.transaction_id, t.kind, e.currency_code",
        )
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| {
            Ok(TransactionTotals {
                transaction_id: TransactionId::from_uuid(row.transaction_id),
                kind: TransactionKind::parse(&row.kind)
                    .ok_or_else(|| corrupt("transaction kind", &row.kind))?,
                currency: row.currency_code,
                credits: row.credits,
                debits: row.debits,
            })
        })
        .collect::<LedgerResult<Vec<_>>>()?;

        tx.commit().await?;

        Ok(AuditSnapshot {
            balances,
            entry_totals,
            transaction_totals,
        })
    }
}

struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE reference = $1", TRANSACTION_COLUMNS);
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(reference)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn get_or_create_user_wallet(&mut self, user_id: &UserId) -> LedgerResult<Wallet> {
        let candidate = Wallet::for_user(user_id.clone());
        sqlx::query(
            "INSERT INTO wallets (id, owner_id, kind, created_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (owner_id) DO NOTHING",
        )
        .bind(*candidate.id.as_uuid())
        .bind(user_id.as_str())
        .bind(candidate.kind.as_str())
        .bind(candidate.created_at)
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, owner_id, kind, created_at FROM wallets WHERE owner_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Wallet::try_from(row)
    }

    async fn get_or_create_system_wallet(
        &mut self,
        id: WalletId,
        kind: WalletKind,
    ) -> LedgerResult<Wallet> {
        sqlx::query(
            "INSERT INTO wallets (id, owner_id, kind) VALUES ($1, NULL, $2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(*id.as_uuid())
        .bind(kind.as_str())
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, owner_id, kind, created_at FROM wallets WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;
        Wallet::try_from(row)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO transactions (id, wallet_id, reference, kind, amount, currency_code, \
             description, status, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(*transaction.id.as_uuid())
        .bind(*transaction.wallet_id.as_uuid())
        .bind(&transaction.reference)
        .bind(transaction.kind.as_str())
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(&transaction.description)
        .bind(transaction.status.as_str())
        .bind(transaction.metadata.clone())
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::DuplicateReference(transaction.reference.clone())
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO ledger_entries (id, transaction_id, wallet_id, currency_code, amount, \
             entry_type, balance_after, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(*entry.id.as_uuid())
        .bind(*entry.transaction_id.as_uuid())
        .bind(*entry.wallet_id.as_uuid())
        .bind(&entry.currency)
        .bind(entry.amount)
        .bind(entry.entry_type.as_str())
        .bind(entry.balance_after)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_balance(
        &mut self,
        wallet_id: WalletId,
        currency: &str,
    ) -> LedgerResult<WalletBalance> {
        sqlx::query(
            "INSERT INTO wallet_balances (wallet_id, currency_code, balance) VALUES ($1, $2, 0) \
             ON CONFLICT (wallet_id, currency_code) DO NOTHING",
        )
        .bind(*wallet_id.as_uuid())
        .bind(currency)
        .execute(&mut *self.tx)
        .await?;

        let sql = format!(
            "SELECT {} FROM wallet_balances WHERE wallet_id = $1 AND currency_code = $2 FOR UPDATE",
            BALANCE_COLUMNS
        );
        let row = sqlx::query_as::<_, BalanceRow>(&sql)
            .bind(*wallet_id.as_uuid())
            .bind(currency)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.into())
    }

    async fn update_balance(&mut self, balance: &WalletBalance) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE wallet_balances SET balance = $3, updated_at = $4 \
             WHERE wallet_id = $1 AND currency_code = $2",
        )
        .bind(*balance.wallet_id.as_uuid())
        .bind(&balance.currency)
        .bind(balance.balance)
        .bind(balance.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transaction_row_conversion() {
        let row = TransactionRow {
            id: Uuid::new_v4(),
            wallet_id: Uuid::new_v4(),
            reference: "ref-1".to_string(),
            kind: "TRADE".to_string(),
            amount: dec!(5000),
            currency_code: "NGN".to_string(),
            description: None,
            status: "SUCCESS".to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        };

        let transaction = Transaction::try_from(row).unwrap();
        assert_eq!(transaction.kind, TransactionKind::Trade);
        assert_eq!(transaction.status, TransactionStatus::Success);
    }

    #[test]
    fn test_unknown_kind_is_storage_error() {
        let row = WalletRow {
            id: Uuid::new_v4(),
            owner_id: None,
            kind: "ALIEN".to_string(),
            created_at: Utc::now(),
        };

        assert!(matches!(Wallet::try_from(row), Err(LedgerError::Storage(_))));
    }

    #[test]
    fn test_entry_row_conversion() {
        let row = EntryRow {
            id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            wallet_id: Uuid::new_v4(),
            currency_code: "USD".to_string(),
            amount: dec!(10),
            entry_type: "CREDIT".to_string(),
            balance_after: dec!(10),
            created_at: Utc::now(),
        };

        let entry = LedgerEntry::try_from(row).unwrap();
        assert_eq!(entry.signed_amount(), dec!(10));
    }
}

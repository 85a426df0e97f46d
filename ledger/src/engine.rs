//! Core ledger engine implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use fxwallet_common::{normalize_code, Currency, CurrencyRegistry, TransactionId, UserId};
use fxwallet_fx::RateService;

use crate::balance::{BalanceKey, WalletBalance};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{JournalBatch, LedgerEntry, Posting, Transaction, TransactionKind};
use crate::store::{LedgerStore, LedgerTx, Page, TransactionTotals};
use crate::wallet::WalletKind;

/// Outcome of a committed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeResult {
    pub transaction_id: TransactionId,
    pub from_currency: String,
    pub to_currency: String,
    /// Amount taken from the source balance.
    pub debited: Decimal,
    /// Amount added to the target balance, rounded to its precision.
    pub credited: Decimal,
    pub rate: Decimal,
}

/// A conversion priced at the current rate. Nothing is booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub rate: Decimal,
    pub converted: Decimal,
    pub quoted_at: DateTime<Utc>,
}

/// Result of a full ledger audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Balance rows compared against their entries.
    pub balances_checked: usize,
    /// Transactions whose entries were checked.
    pub transactions_checked: usize,
    /// One line per discrepancy.
    pub mismatches: Vec<String>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

enum Funded {
    Created(Transaction),
    Replayed(Transaction),
}

/// The ledger engine owns every balance mutation.
///
/// Each money movement runs as one unit of work: the balance rows it
/// touches are locked in `(wallet_id, currency)` order, entries are
/// posted, and the unit commits or rolls back as a whole.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    registry: Arc<dyn CurrencyRegistry>,
    rates: Arc<RateService>,
    config: LedgerConfig,
}

impl LedgerEngine {
    /// Create a new ledger engine.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        registry: Arc<dyn CurrencyRegistry>,
        rates: Arc<RateService>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            rates,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Create the external and reserve wallets if they do not exist yet.
    #[instrument(skip(self))]
    pub async fn provision_system_wallets(&self) -> LedgerResult<()> {
        let mut tx = self.store.begin().await?;
        if let Err(e) = self.provision_in_tx(tx.as_mut()).await {
            return Err(abort(tx, e).await);
        }
        tx.commit().await?;

        info!(
            external = %self.config.external_wallet_id,
            reserve = %self.config.reserve_wallet_id,
            "System wallets provisioned"
        );
        Ok(())
    }

    async fn provision_in_tx(&self, tx: &mut dyn LedgerTx) -> LedgerResult<()> {
        tx.get_or_create_system_wallet(self.config.external_wallet_id, WalletKind::External)
            .await?;
        tx.get_or_create_system_wallet(self.config.reserve_wallet_id, WalletKind::Reserve)
            .await?;
        Ok(())
    }

    /// Credit a user wallet with value entering from the external provider.
    ///
    /// Idempotent on `reference`: a repeated call returns the transaction
    /// committed by the first one and changes nothing.
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn fund_wallet(
        &self,
        user_id: &UserId,
        amount: Decimal,
        currency_code: &str,
        reference: &str,
    ) -> LedgerResult<Transaction> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LedgerError::InvalidReference(
                "reference cannot be empty".to_string(),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        let currency = self.resolve_currency(currency_code).await?;
        check_precision(&currency, amount)?;

        if let Some(existing) = self.store.find_transaction_by_reference(reference).await? {
            warn!(reference, transaction_id = %existing.id, "Replayed funding reference");
            return Ok(existing);
        }

        let mut tx = self.store.begin().await?;
        match self
            .fund_in_tx(tx.as_mut(), user_id, amount, &currency, reference)
            .await
        {
            Ok(Funded::Created(transaction)) => match tx.commit().await {
                Ok(()) => {
                    info!(
                        reference,
                        transaction_id = %transaction.id,
                        amount = %amount,
                        currency = %currency.code,
                        "Wallet funded"
                    );
                    Ok(transaction)
                }
                Err(LedgerError::DuplicateReference(_)) => self.replay(reference).await,
                Err(e) => Err(e),
            },
            Ok(Funded::Replayed(transaction)) => {
                tx.rollback().await?;
                warn!(reference, transaction_id = %transaction.id, "Replayed funding reference");
                Ok(transaction)
            }
            Err(LedgerError::DuplicateReference(_)) => {
                tx.rollback().await?;
                self.replay(reference).await
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    async fn fund_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        user_id: &UserId,
        amount: Decimal,
        currency: &Currency,
        reference: &str,
    ) -> LedgerResult<Funded> {
        if let Some(existing) = tx.find_transaction_by_reference(reference).await? {
            return Ok(Funded::Replayed(existing));
        }

        let wallet = tx.get_or_create_user_wallet(user_id).await?;
        let external = tx
            .get_or_create_system_wallet(self.config.external_wallet_id, WalletKind::External)
            .await?;

        let transaction = Transaction::funding(wallet.id, reference, amount, &currency.code);
        tx.insert_transaction(&transaction).await?;

        let batch = self
            .post(
                tx,
                transaction.id,
                vec![
                    Posting::debit(&external, &currency.code, amount),
                    Posting::credit(&wallet, &currency.code, amount),
                ],
            )
            .await?;

        if !batch.is_balanced() {
            return Err(LedgerError::Storage(format!(
                "funding {} is not balanced",
                transaction.id
            )));
        }

        Ok(Funded::Created(transaction))
    }

    /// The transaction another caller committed under `reference`.
    async fn replay(&self, reference: &str) -> LedgerResult<Transaction> {
        match self.store.find_transaction_by_reference(reference).await? {
            Some(existing) => {
                warn!(reference, transaction_id = %existing.id, "Concurrent funding reference, returning committed transaction");
                Ok(existing)
            }
            None => Err(LedgerError::DuplicateReference(reference.to_string())),
        }
    }

    /// Swap `amount` of `from` for `to` inside the user's wallet.
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn trade_currency(
        &self,
        user_id: &UserId,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> LedgerResult<TradeResult> {
        let from_code = normalize_code(from);
        let to_code = normalize_code(to);
        if from_code == to_code {
            warn!(currency = %from_code, "Rejected same-currency trade");
            return Err(LedgerError::SameCurrencyTrade(from_code));
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }

        let from_currency = self.resolve_currency(&from_code).await?;
        let to_currency = self.resolve_currency(&to_code).await?;
        check_precision(&from_currency, amount)?;

        let rate = self.rates.get_exchange_rate(&from_code, &to_code).await?;
        let credited = convert_amount(&to_currency, amount, rate)?;
        if credited <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "{} {} converts to nothing in {}",
                amount, from_code, to_code
            )));
        }

        let mut tx = self.store.begin().await?;
        let transaction = match self
            .trade_in_tx(
                tx.as_mut(),
                user_id,
                &from_currency,
                &to_currency,
                amount,
                credited,
                rate,
            )
            .await
        {
            Ok(transaction) => transaction,
            Err(e) => {
                if matches!(e, LedgerError::InsufficientFunds { .. }) {
                    warn!(from = %from_code, to = %to_code, amount = %amount, "Rejected trade: insufficient funds");
                }
                return Err(abort(tx, e).await);
            }
        };
        tx.commit().await?;

        info!(
            transaction_id = %transaction.id,
            from = %from_code,
            to = %to_code,
            debited = %amount,
            credited = %credited,
            rate = %rate,
            "Trade committed"
        );

        Ok(TradeResult {
            transaction_id: transaction.id,
            from_currency: from_code,
            to_currency: to_code,
            debited: amount,
            credited,
            rate,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn trade_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        user_id: &UserId,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
        credited: Decimal,
        rate: Decimal,
    ) -> LedgerResult<Transaction> {
        let wallet = tx.get_or_create_user_wallet(user_id).await?;
        let debit = Posting::debit(&wallet, &from.code, amount);
        let credit = Posting::credit(&wallet, &to.code, credited);

        lock_in_order(tx, vec![debit.key(), credit.key()]).await?;

        let source = tx.lock_balance(wallet.id, &from.code).await?;
        if !source.has_sufficient_funds(amount) {
            return Err(LedgerError::InsufficientFunds {
                wallet: wallet.id,
                currency: from.code.clone(),
                required: amount,
                available: source.balance,
            });
        }

        let transaction = Transaction::trade(
            wallet.id,
            format!("TRD-{}", Uuid::new_v4()),
            amount,
            &from.code,
            &to.code,
            credited,
            rate,
        );
        tx.insert_transaction(&transaction).await?;
        self.post(tx, transaction.id, vec![debit, credit]).await?;

        Ok(transaction)
    }

    /// Price a conversion without booking it.
    #[instrument(skip(self))]
    pub async fn convert_currency(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> LedgerResult<Quote> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }

        let from_currency = self.resolve_currency(from).await?;
        let to_currency = self.resolve_currency(to).await?;

        let rate = if from_currency.code == to_currency.code {
            Decimal::ONE
        } else {
            self.rates
                .get_exchange_rate(&from_currency.code, &to_currency.code)
                .await?
        };

        Ok(Quote {
            converted: convert_amount(&to_currency, amount, rate)?,
            from: from_currency.code,
            to: to_currency.code,
            amount,
            rate,
            quoted_at: Utc::now(),
        })
    }

    /// Lock every row the postings touch, then record them in order.
    async fn post(
        &self,
        tx: &mut dyn LedgerTx,
        transaction_id: TransactionId,
        postings: Vec<Posting>,
    ) -> LedgerResult<JournalBatch> {
        lock_in_order(tx, postings.iter().map(Posting::key).collect()).await?;

        let mut batch = JournalBatch::new(transaction_id);
        for posting in postings {
            let entry = self.record_ledger_entry(tx, transaction_id, posting).await?;
            batch.add_entry(entry);
        }
        Ok(batch)
    }

    /// Write one entry and move the balance it affects.
    ///
    /// This is the only path that changes a balance. Non-exempt wallets
    /// never go below zero.
    pub(crate) async fn record_ledger_entry(
        &self,
        tx: &mut dyn LedgerTx,
        transaction_id: TransactionId,
        posting: Posting,
    ) -> LedgerResult<LedgerEntry> {
        let mut balance = tx.lock_balance(posting.wallet_id, &posting.currency).await?;
        let new_balance = balance
            .balance
            .checked_add(posting.signed_amount())
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!(
                    "{} {} overflows the balance of wallet {}",
                    posting.amount, posting.currency, posting.wallet_id
                ))
            })?;

        if new_balance < Decimal::ZERO && !posting.exempt {
            return Err(LedgerError::InsufficientFunds {
                wallet: posting.wallet_id,
                currency: posting.currency.clone(),
                required: posting.amount,
                available: balance.balance,
            });
        }

        balance.balance = new_balance;
        balance.updated_at = Utc::now();

        let entry = posting.into_entry(transaction_id, new_balance);
        tx.insert_entry(&entry).await?;
        tx.update_balance(&balance).await?;

        Ok(entry)
    }

    /// Balances of the user's wallet, by currency code. Empty if the user
    /// never moved money.
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn get_user_wallets(&self, user_id: &UserId) -> LedgerResult<Vec<WalletBalance>> {
        match self.store.find_user_wallet(user_id).await? {
            Some(wallet) => self.store.balances_for_wallet(wallet.id).await,
            None => Ok(Vec::new()),
        }
    }

    /// The user's transactions, newest first.
    ///
    /// `page` is 1-based. A `limit` of zero selects the default page size;
    /// anything above the maximum is clamped.
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn get_transactions(
        &self,
        user_id: &UserId,
        page: usize,
        limit: usize,
    ) -> LedgerResult<Page<Transaction>> {
        let page = page.max(1);
        let max = self.config.max_page_size.max(1);
        let limit = if limit == 0 {
            self.config.default_page_size
        } else {
            limit
        }
        .clamp(1, max);

        let (items, total) = match self.store.find_user_wallet(user_id).await? {
            Some(wallet) => {
                let offset = (page - 1).saturating_mul(limit);
                self.store
                    .transactions_for_wallet(wallet.id, offset, limit)
                    .await?
            }
            None => (Vec::new(), 0),
        };

        Ok(Page {
            items,
            page,
            limit,
            total,
        })
    }

    /// Entries a transaction wrote, in posting order.
    pub async fn get_entries(&self, transaction_id: TransactionId) -> LedgerResult<Vec<LedgerEntry>> {
        self.store.entries_for_transaction(transaction_id).await
    }

    /// Recompute every balance from its entries and check that every
    /// transaction posted a coherent set of entries.
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self) -> LedgerResult<IntegrityReport> {
        let mut report = IntegrityReport::default();
        let snapshot = self.store.audit_snapshot().await?;

        let mut totals: HashMap<BalanceKey, Decimal> = snapshot
            .entry_totals
            .into_iter()
            .map(|t| (BalanceKey::new(t.wallet_id, t.currency), t.credits - t.debits))
            .collect();

        for balance in snapshot.balances {
            report.balances_checked += 1;
            let expected = totals.remove(&balance.key()).unwrap_or(Decimal::ZERO);
            if expected != balance.balance {
                report.mismatches.push(format!(
                    "wallet {} {}: stored balance {} but entries sum to {}",
                    balance.wallet_id, balance.currency, balance.balance, expected
                ));
            }
        }

        for (key, sum) in totals {
            report.mismatches.push(format!(
                "wallet {} {}: entries sum to {} without a balance row",
                key.wallet_id, key.currency, sum
            ));
        }

        let mut by_transaction: BTreeMap<TransactionId, Vec<TransactionTotals>> = BTreeMap::new();
        for totals in snapshot.transaction_totals {
            by_transaction
                .entry(totals.transaction_id)
                .or_default()
                .push(totals);
        }

        for (transaction_id, legs) in by_transaction {
            report.transactions_checked += 1;
            if let Some(problem) = check_transaction(&legs) {
                report
                    .mismatches
                    .push(format!("transaction {}: {}", transaction_id, problem));
            }
        }

        if report.is_ok() {
            info!(
                balances = report.balances_checked,
                transactions = report.transactions_checked,
                "Ledger integrity verified"
            );
        } else {
            warn!(mismatches = report.mismatches.len(), "Ledger integrity check failed");
        }

        Ok(report)
    }

    async fn resolve_currency(&self, code: &str) -> LedgerResult<Currency> {
        let code = normalize_code(code);
        self.registry
            .resolve_active(&code)
            .await?
            .ok_or(LedgerError::InvalidCurrency(code))
    }
}

/// Lock balance rows sorted by `(wallet_id, currency)`.
async fn lock_in_order(tx: &mut dyn LedgerTx, mut keys: Vec<BalanceKey>) -> LedgerResult<()> {
    keys.sort();
    keys.dedup();
    for key in keys {
        tx.lock_balance(key.wallet_id, &key.currency).await?;
    }
    Ok(())
}

/// Roll back and hand back the error that caused it.
async fn abort(tx: Box<dyn LedgerTx>, err: LedgerError) -> LedgerError {
    if let Err(rollback) = tx.rollback().await {
        warn!(error = %rollback, "Rollback failed");
    }
    err
}

/// `amount * rate` rounded to the target currency.
fn convert_amount(to: &Currency, amount: Decimal, rate: Decimal) -> LedgerResult<Decimal> {
    amount
        .checked_mul(rate)
        .map(|converted| to.round(converted))
        .ok_or_else(|| {
            LedgerError::InvalidAmount(format!(
                "{} at rate {} overflows {}",
                amount, rate, to.code
            ))
        })
}

fn check_precision(currency: &Currency, amount: Decimal) -> LedgerResult<()> {
    if amount.normalize().scale() > currency.decimal_places {
        return Err(LedgerError::InvalidAmount(format!(
            "{} has more than {} decimal places for {}",
            amount, currency.decimal_places, currency.code
        )));
    }
    Ok(())
}

/// Funding moves one currency and must net to zero in it. A trade debits
/// exactly one currency and credits exactly one other.
fn check_transaction(legs: &[TransactionTotals]) -> Option<String> {
    let kind = legs.first()?.kind;
    match kind {
        TransactionKind::Funding => legs
            .iter()
            .find(|leg| leg.credits != leg.debits)
            .map(|leg| {
                format!(
                    "{} credits {} do not match debits {}",
                    leg.currency, leg.credits, leg.debits
                )
            }),
        TransactionKind::Trade => {
            let debit_only = legs
                .iter()
                .filter(|leg| leg.debits > Decimal::ZERO && leg.credits.is_zero())
                .count();
            let credit_only = legs
                .iter()
                .filter(|leg| leg.credits > Decimal::ZERO && leg.debits.is_zero())
                .count();
            if legs.len() == 2 && debit_only == 1 && credit_only == 1 {
                None
            } else {
                Some(format!("trade has malformed legs across {} currencies", legs.len()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use crate::wallet::Wallet;
    use fxwallet_common::InMemoryCurrencyRegistry;
    use fxwallet_fx::{MemoryCacheStore, MockRateProvider, RateCacheConfig};
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: LedgerEngine,
        provider: Arc<MockRateProvider>,
        store: MemoryLedgerStore,
    }

    fn setup() -> Fixture {
        let registry = Arc::new(InMemoryCurrencyRegistry::with_currencies([
            Currency::ngn(),
            Currency::usd(),
            Currency::jpy(),
            Currency::new("XAU", "Gold", 4).inactive(),
        ]));
        let provider = Arc::new(MockRateProvider::new("mock"));
        provider.set_rate("NGN", "USD", dec!(0.002));
        provider.set_rate("USD", "NGN", dec!(1500));
        provider.set_rate("NGN", "JPY", dec!(0.1));

        let rates = Arc::new(RateService::new(
            provider.clone(),
            Arc::new(MemoryCacheStore::new()),
            registry.clone(),
            RateCacheConfig::default(),
        ));
        let store = MemoryLedgerStore::new();
        let engine = LedgerEngine::new(
            Arc::new(store.clone()),
            registry,
            rates,
            LedgerConfig::default(),
        );

        Fixture {
            engine,
            provider,
            store,
        }
    }

    #[tokio::test]
    async fn test_fund_wallet_posts_both_legs() {
        let f = setup();
        let user = UserId::new("alice");

        let transaction = f
            .engine
            .fund_wallet(&user, dec!(5000), "ngn", "ref-1")
            .await
            .unwrap();

        assert_eq!(transaction.kind, TransactionKind::Funding);
        assert_eq!(transaction.currency, "NGN");
        let entries = f.engine.get_entries(transaction.id).await.unwrap();
        assert_eq!(entries.len(), 2);

        let wallets = f.engine.get_user_wallets(&user).await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].balance, dec!(5000));
    }

    #[tokio::test]
    async fn test_external_wallet_goes_negative() {
        let f = setup();
        f.engine
            .fund_wallet(&UserId::new("alice"), dec!(250), "NGN", "ref-1")
            .await
            .unwrap();

        let external = f
            .store
            .balances_for_wallet(f.engine.config().external_wallet_id)
            .await
            .unwrap();
        assert_eq!(external[0].balance, dec!(-250));
    }

    #[tokio::test]
    async fn test_fund_validation() {
        let f = setup();
        let user = UserId::new("alice");

        let zero = f.engine.fund_wallet(&user, dec!(0), "NGN", "ref-1").await;
        assert!(matches!(zero, Err(LedgerError::InvalidAmount(_))));

        let inactive = f.engine.fund_wallet(&user, dec!(1), "XAU", "ref-1").await;
        assert!(matches!(inactive, Err(LedgerError::InvalidCurrency(c)) if c == "XAU"));

        let unknown = f.engine.fund_wallet(&user, dec!(1), "ABC", "ref-1").await;
        assert!(matches!(unknown, Err(LedgerError::InvalidCurrency(_))));

        let precise = f.engine.fund_wallet(&user, dec!(1.005), "NGN", "ref-1").await;
        assert!(matches!(precise, Err(LedgerError::InvalidAmount(_))));

        let blank = f.engine.fund_wallet(&user, dec!(1), "NGN", "  ").await;
        assert!(matches!(blank, Err(LedgerError::InvalidReference(_))));

        assert_eq!(f.store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_record_ledger_entry_rejects_overdraft() {
        let f = setup();
        let wallet = Wallet::for_user(UserId::new("alice"));
        let mut tx = f.store.begin().await.unwrap();

        let result = f
            .engine
            .record_ledger_entry(
                tx.as_mut(),
                TransactionId::new(),
                Posting::debit(&wallet, "NGN", dec!(1)),
            )
            .await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds { available, .. }) if available == Decimal::ZERO
        ));
    }

    #[tokio::test]
    async fn test_trade_converts_at_rate() {
        let f = setup();
        let user = UserId::new("alice");
        f.engine
            .fund_wallet(&user, dec!(10000), "NGN", "ref-1")
            .await
            .unwrap();

        let result = f
            .engine
            .trade_currency(&user, "NGN", "USD", dec!(5000))
            .await
            .unwrap();

        assert_eq!(result.debited, dec!(5000));
        assert_eq!(result.credited, dec!(10));
        assert_eq!(result.rate, dec!(0.002));

        let wallets = f.engine.get_user_wallets(&user).await.unwrap();
        assert_eq!(wallets[0].currency, "NGN");
        assert_eq!(wallets[0].balance, dec!(5000));
        assert_eq!(wallets[1].currency, "USD");
        assert_eq!(wallets[1].balance, dec!(10));
    }

    #[tokio::test]
    async fn test_trade_rounds_half_away_from_zero() {
        let f = setup();
        let user = UserId::new("alice");
        f.provider.set_rate("NGN", "USD", dec!(0.00125));
        f.engine
            .fund_wallet(&user, dec!(100), "NGN", "ref-1")
            .await
            .unwrap();

        // 4 * 0.00125 = 0.005, rounds up to 0.01
        let result = f
            .engine
            .trade_currency(&user, "NGN", "USD", dec!(4))
            .await
            .unwrap();

        assert_eq!(result.credited, dec!(0.01));
    }

    #[tokio::test]
    async fn test_trade_too_small() {
        let f = setup();
        let user = UserId::new("alice");
        f.engine
            .fund_wallet(&user, dec!(100), "NGN", "ref-1")
            .await
            .unwrap();

        let result = f.engine.trade_currency(&user, "NGN", "USD", dec!(1)).await;

        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
        assert_eq!(f.store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_same_currency_checked_first() {
        let f = setup();

        let result = f
            .engine
            .trade_currency(&UserId::new("alice"), "usd", "USD", dec!(0))
            .await;

        assert!(matches!(result, Err(LedgerError::SameCurrencyTrade(c)) if c == "USD"));
        assert_eq!(f.provider.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_failure_books_nothing() {
        let f = setup();
        let user = UserId::new("alice");
        f.engine
            .fund_wallet(&user, dec!(100), "NGN", "ref-1")
            .await
            .unwrap();
        f.provider.set_failing(true);

        let result = f.engine.trade_currency(&user, "NGN", "USD", dec!(50)).await;

        assert!(matches!(result, Err(LedgerError::MarketDataUnavailable(_))));
        assert_eq!(f.store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_convert_currency() {
        let f = setup();

        let quote = f
            .engine
            .convert_currency("ngn", "jpy", dec!(1234))
            .await
            .unwrap();

        assert_eq!(quote.from, "NGN");
        assert_eq!(quote.to, "JPY");
        assert_eq!(quote.rate, dec!(0.1));
        // JPY has no minor unit
        assert_eq!(quote.converted, dec!(123));
        assert_eq!(f.store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_conversion_overflow_is_rejected() {
        let f = setup();
        let huge = Decimal::MAX / dec!(10);

        let quote = f.engine.convert_currency("USD", "NGN", huge).await;
        assert!(matches!(quote, Err(LedgerError::InvalidAmount(_))));

        let trade = f
            .engine
            .trade_currency(&UserId::new("alice"), "USD", "NGN", huge.round_dp(2))
            .await;
        assert!(matches!(trade, Err(LedgerError::InvalidAmount(_))));
        assert_eq!(f.store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_balance_overflow_is_rejected() {
        let f = setup();
        let user = UserId::new("alice");
        let huge = Decimal::MAX - dec!(1);

        f.engine
            .fund_wallet(&user, huge, "NGN", "ref-1")
            .await
            .unwrap();
        let second = f.engine.fund_wallet(&user, huge, "NGN", "ref-2").await;

        assert!(matches!(second, Err(LedgerError::InvalidAmount(_))));
        assert_eq!(f.store.transaction_count(), 1);
        let wallets = f.engine.get_user_wallets(&user).await.unwrap();
        assert_eq!(wallets[0].balance, huge);
    }

    #[tokio::test]
    async fn test_convert_same_currency_is_identity() {
        let f = setup();

        let quote = f
            .engine
            .convert_currency("USD", "USD", dec!(12.5))
            .await
            .unwrap();

        assert_eq!(quote.rate, Decimal::ONE);
        assert_eq!(quote.converted, dec!(12.5));
        assert_eq!(f.provider.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_get_transactions_paging() {
        let f = setup();
        let user = UserId::new("alice");
        for i in 0..5 {
            f.engine
                .fund_wallet(&user, dec!(10), "NGN", &format!("ref-{}", i))
                .await
                .unwrap();
        }

        let first = f.engine.get_transactions(&user, 1, 2).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].reference, "ref-4");
        assert!(first.has_next());

        let last = f.engine.get_transactions(&user, 3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].reference, "ref-0");

        let clamped = f.engine.get_transactions(&user, 0, 1000).await.unwrap();
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.limit, 100);
    }

    #[tokio::test]
    async fn test_unknown_user_has_nothing() {
        let f = setup();
        let user = UserId::new("nobody");

        assert!(f.engine.get_user_wallets(&user).await.unwrap().is_empty());
        let page = f.engine.get_transactions(&user, 1, 20).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_provision_system_wallets() {
        let f = setup();
        f.engine.provision_system_wallets().await.unwrap();
        f.engine.provision_system_wallets().await.unwrap();

        let report = f.engine.verify_integrity().await.unwrap();
        assert!(report.is_ok());
        assert_eq!(report.balances_checked, 0);
    }

    #[test]
    fn test_check_transaction_flags_unbalanced_funding() {
        let legs = vec![TransactionTotals {
            transaction_id: TransactionId::new(),
            kind: TransactionKind::Funding,
            currency: "NGN".to_string(),
            credits: dec!(100),
            debits: dec!(90),
        }];

        assert!(check_transaction(&legs).is_some());
    }

    #[test]
    fn test_check_transaction_accepts_trade() {
        let id = TransactionId::new();
        let legs = vec![
            TransactionTotals {
                transaction_id: id,
                kind: TransactionKind::Trade,
                currency: "NGN".to_string(),
                credits: dec!(0),
                debits: dec!(5000),
            },
            TransactionTotals {
                transaction_id: id,
                kind: TransactionKind::Trade,
                currency: "USD".to_string(),
                credits: dec!(10),
                debits: dec!(0),
            },
        ];

        assert!(check_transaction(&legs).is_none());
    }
}

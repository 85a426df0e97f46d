//! fxwallet Ledger Engine
//!
//! Double-entry wallet ledger: funding from the external provider,
//! cross-currency trades priced by the rate cache, and an audit that
//! recomputes every balance from its entries.

pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod store;
pub mod wallet;

pub use balance::{BalanceKey, WalletBalance};
pub use config::LedgerConfig;
pub use engine::{IntegrityReport, LedgerEngine, Quote, TradeResult};
pub use error::{LedgerError, LedgerResult};
pub use journal::{EntryType, LedgerEntry, Posting, Transaction, TransactionKind, TransactionStatus};
pub use store::{
    AuditSnapshot, EntryTotals, LedgerStore, LedgerTx, MemoryLedgerStore, Page, PgLedgerStore,
    TransactionTotals,
};
pub use wallet::{Wallet, WalletKind};

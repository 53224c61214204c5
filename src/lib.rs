// sqledger - Double-entry accounting ledger over SQLite
// Exposes the ledger engine for the CLI binary and tests

pub mod admin;
pub mod audit;
pub mod currency;
pub mod error;
pub mod store;
pub mod transfer;

// Re-export the public surface
pub use admin::{derive_counterpart, DeletionReport, BANK_NAMESPACE, LIQUIDITY_NAMESPACE};
pub use audit::{IntegrityReport, IntegrityViolation};
pub use error::{LedgerError, Result};
pub use store::{Account, AccountId, Entry, EntryId, Ledger, Transfer, TransferId};
pub use transfer::Leg;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Error types for the ledger engine.
//!
//! Every mutating operation is all-or-nothing: any of these errors means the
//! durable state is exactly as it was before the call. Each failure case gets
//! its own inspectable variant so callers can branch without string matching.

use rust_decimal::Decimal;
use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Account lookup miss, by name or by id.
    #[error("account not found: {account}")]
    NotFound {
        /// Name or stringified id that failed to resolve
        account: String,
    },

    /// Account names are unique; creation with a taken name is rejected.
    #[error("account name already exists: {name}")]
    DuplicateName { name: String },

    /// Currency/unit code is not a recognized unit.
    #[error("unrecognized currency code: '{code}'")]
    InvalidCurrency { code: String },

    /// Transfer and backfill amounts must be strictly positive.
    #[error("amount must be positive, got {amount}")]
    NonPositiveAmount { amount: Decimal },

    /// Amount carries more decimal places than the currency's scale allows.
    #[error("amount {amount} exceeds the {scale}-decimal scale of {currency}")]
    ExcessivePrecision {
        amount: Decimal,
        currency: String,
        scale: u32,
    },

    /// A leg may not move funds from an account to itself.
    #[error("transfer leg moves account {account_id} to itself")]
    SelfTransfer { account_id: i64 },

    /// Both endpoints of a leg must hold the same unit.
    #[error("leg endpoints use different currencies: {from_currency} vs {to_currency}")]
    CurrencyMismatch {
        from_currency: String,
        to_currency: String,
    },

    /// The resulting balance breaches the account's negative/positive flags.
    #[error("balance limit violated on account '{account}': resulting balance {balance}")]
    LimitViolated { account: String, balance: Decimal },

    /// Optimistic concurrency check failed; the caller must retry from scratch.
    #[error("version conflict on account {account_id}: expected {expected}, found {found}")]
    VersionConflict {
        account_id: i64,
        expected: i64,
        found: i64,
    },

    /// A transfer needs at least one leg.
    #[error("transfer has no legs")]
    EmptyTransfer,

    /// Transfer lookup miss by id.
    #[error("transfer not found: {transfer_id}")]
    TransferNotFound { transfer_id: i64 },

    /// A transfer's entries do not pair up debit/credit; the row set was
    /// modified outside the engine.
    #[error("transfer {transfer_id} has an odd entry count ({entries})")]
    CorruptTransfer { transfer_id: i64, entries: usize },

    /// Backfill effective date failed to parse.
    #[error("invalid effective date '{input}': expected YYYY-MM-DD")]
    InvalidDate { input: String },

    /// Counterpart derivation requires the name to sit under a known namespace.
    #[error("account name '{name}' is not under the '{namespace}.' namespace")]
    MalformedName { name: String, namespace: String },

    /// Administrative pair operation where only one side resolved.
    #[error("cannot resolve account pair for '{requested}': '{missing}' not found")]
    PartialResolutionFailure { requested: String, missing: String },

    /// Underlying SQLite failure (transaction already rolled back).
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl From<rusqlite::Error> for LedgerError {
    fn from(error: rusqlite::Error) -> Self {
        LedgerError::Storage {
            message: error.to_string(),
        }
    }
}

impl LedgerError {
    /// Lookup miss by name.
    pub fn not_found(name: &str) -> Self {
        LedgerError::NotFound {
            account: name.to_string(),
        }
    }

    /// Lookup miss by surrogate id.
    pub fn id_not_found(id: i64) -> Self {
        LedgerError::NotFound {
            account: format!("id {}", id),
        }
    }
}

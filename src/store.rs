//! Durable account/transfer/entry store over SQLite.
//!
//! Three tables mirror the logical model: `accounts` hold the current
//! balance and optimistic version counter, `transfers` are the atomic units
//! of movement, and `entries` form the immutable append-only audit trail.
//! Balances and amounts are stored as canonical decimal text so nothing is
//! ever rounded through floating point; timestamps are RFC 3339 text in UTC.
//!
//! The SQLite transaction is the only unit of atomicity. Callers may run as
//! separate processes against the same database file; WAL mode plus a busy
//! timeout let writers queue, and the guarded version update in
//! [`apply_delta`] is the optimistic-concurrency check every mutation path
//! goes through.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::currency;
use crate::error::{LedgerError, Result};

pub type AccountId = i64;
pub type TransferId = i64;
pub type EntryId = i64;

// ============================================================================
// MODEL
// ============================================================================

/// Named balance-holding entity with a currency and a monotonic version.
///
/// Name and currency are fixed at creation; balance, version and
/// `updated_at` mutate together on every entry applied to the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Path-like unique name, e.g. `bank.KRW.woori.8472`
    pub name: String,
    pub currency: String,
    pub balance: Decimal,
    /// Incremented on every balance mutation (optimistic concurrency)
    pub version: i64,
    /// May the balance go below zero (liquidity/suspense accounts)
    pub allow_negative_balance: bool,
    /// May the balance go above zero
    pub allow_positive_balance: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One atomic unit of one or more balance movements.
///
/// `event_at` equals `created_at` for normal transfers; administrative
/// backfills backdate it to the operator-supplied effective time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub created_at: DateTime<Utc>,
    pub event_at: DateTime<Utc>,
}

/// Immutable record of one account's balance delta caused by one transfer.
///
/// Positive amount = credit, negative = debit. `previous_balance + amount`
/// always equals `current_balance`; `account_version` is the account's
/// version right after this entry was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub transfer_id: TransferId,
    pub amount: Decimal,
    pub previous_balance: Decimal,
    pub current_balance: Decimal,
    pub account_version: i64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// LEDGER HANDLE
// ============================================================================

/// Handle over the durable store. One handle per caller; concurrent callers
/// open their own handles on the same database file.
pub struct Ledger {
    pub(crate) conn: Connection,
}

impl Ledger {
    /// Open (creating if needed) a ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL mode for crash recovery and concurrent readers
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        setup_schema(&conn)?;
        Ok(Ledger { conn })
    }

    /// In-memory ledger, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        setup_schema(&conn)?;
        Ok(Ledger { conn })
    }

    // ------------------------------------------------------------------
    // Account Store contract
    // ------------------------------------------------------------------

    /// Create an account with balance 0 and version 0.
    ///
    /// Name and currency are immutable afterwards. The two flags control
    /// whether the balance may cross below/above zero.
    pub fn create_account(
        &mut self,
        name: &str,
        currency: &str,
        allow_negative_balance: bool,
        allow_positive_balance: bool,
    ) -> Result<AccountId> {
        currency::validate_code(currency)?;

        let now = Utc::now().to_rfc3339();
        let result = self.conn.execute(
            "INSERT INTO accounts (
                name, currency, balance, version,
                allow_negative_balance, allow_positive_balance,
                created_at, updated_at
            ) VALUES (?1, ?2, '0', 0, ?3, ?4, ?5, ?5)",
            params![name, currency, allow_negative_balance, allow_positive_balance, now],
        );

        match result {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                debug!("created account '{}' ({}) id={}", name, currency, id);
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(LedgerError::DuplicateName {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up an account by its unique name.
    pub fn get_account(&self, name: &str) -> Result<Account> {
        account_by_name(&self.conn, name)?.ok_or_else(|| LedgerError::not_found(name))
    }

    /// Look up an account by its surrogate id.
    pub fn get_account_by_id(&self, id: AccountId) -> Result<Account> {
        account_by_id(&self.conn, id)
    }

    /// All accounts whose name starts with `prefix`, ordered by name.
    /// An empty prefix lists everything; the prefix is matched literally,
    /// `%` and `_` carry no wildcard meaning.
    pub fn list_accounts(&self, prefix: &str) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE name LIKE ?1 || '%' ESCAPE '\\' ORDER BY name",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map(params![escape_like(prefix)], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    /// The sole public balance-mutation primitive of the store.
    ///
    /// Applies `delta` only if the stored version still equals
    /// `expected_version`; otherwise `VersionConflict`. Returns the new
    /// version. Note this does not write an audit entry; the transfer
    /// coordinator and the administrative paths are responsible for keeping
    /// the entry log in step with every balance they touch.
    pub fn adjust_balance(
        &mut self,
        account_id: AccountId,
        delta: Decimal,
        expected_version: i64,
    ) -> Result<i64> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let applied = apply_delta(&tx, account_id, delta, expected_version, Utc::now())?;
        tx.commit()?;
        debug!(
            "adjusted account {} by {} -> balance {} (v{})",
            account_id, delta, applied.current_balance, applied.version
        );
        Ok(applied.version)
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    /// Full entry history for an account, ordered by creation instant with
    /// the insertion id as tie-breaker, so replaying the amounts always
    /// reproduces the stored balance deterministically.
    pub fn entry_history(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM entries WHERE account_id = ?1 ORDER BY created_at, id",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![account_id], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Look up a transfer record by id.
    pub fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.conn
            .query_row(
                "SELECT id, created_at, event_at FROM transfers WHERE id = ?1",
                params![id],
                transfer_from_row,
            )
            .optional()?
            .ok_or(LedgerError::TransferNotFound { transfer_id: id })
    }

    /// Entries owned by one transfer, in insertion order (debit before
    /// credit, legs in caller order).
    pub fn transfer_entries(&self, transfer_id: TransferId) -> Result<Vec<Entry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM entries WHERE transfer_id = ?1 ORDER BY id",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![transfer_id], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

fn setup_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            currency TEXT NOT NULL,
            balance TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            allow_negative_balance INTEGER NOT NULL,
            allow_positive_balance INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transfers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            event_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            transfer_id INTEGER NOT NULL REFERENCES transfers(id),
            amount TEXT NOT NULL,
            previous_balance TEXT NOT NULL,
            current_balance TEXT NOT NULL,
            account_version INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_account ON entries(account_id, created_at, id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_transfer ON entries(transfer_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// SHARED MUTATION PRIMITIVE
// ============================================================================

/// Outcome of one balance mutation, captured at the moment it happened.
pub(crate) struct Applied {
    pub previous_balance: Decimal,
    pub current_balance: Decimal,
    /// Account version after the increment
    pub version: i64,
}

/// Apply a signed delta to one account inside the caller's transaction.
///
/// Every mutation path (transfer coordinator, public `adjust_balance`,
/// administrative backfill) funnels through here so the version guard and
/// the limit flags are enforced identically everywhere.
pub(crate) fn apply_delta(
    conn: &Connection,
    account_id: AccountId,
    delta: Decimal,
    expected_version: i64,
    at: DateTime<Utc>,
) -> Result<Applied> {
    let account = account_by_id(conn, account_id)?;
    if account.version != expected_version {
        return Err(LedgerError::VersionConflict {
            account_id,
            expected: expected_version,
            found: account.version,
        });
    }
    currency::check_scale(delta.abs(), &account.currency)?;

    let current_balance = account.balance + delta;
    if current_balance < Decimal::ZERO && !account.allow_negative_balance {
        return Err(LedgerError::LimitViolated {
            account: account.name,
            balance: current_balance,
        });
    }
    if current_balance > Decimal::ZERO && !account.allow_positive_balance {
        return Err(LedgerError::LimitViolated {
            account: account.name,
            balance: current_balance,
        });
    }

    // Guarded update: no row changes if another writer got in first.
    let changed = conn.execute(
        "UPDATE accounts
         SET balance = ?1, version = version + 1, updated_at = ?2
         WHERE id = ?3 AND version = ?4",
        params![
            current_balance.to_string(),
            at.to_rfc3339(),
            account_id,
            expected_version
        ],
    )?;
    if changed != 1 {
        let found = account_by_id(conn, account_id)
            .map(|a| a.version)
            .unwrap_or(-1);
        return Err(LedgerError::VersionConflict {
            account_id,
            expected: expected_version,
            found,
        });
    }

    Ok(Applied {
        previous_balance: account.balance,
        current_balance,
        version: expected_version + 1,
    })
}

pub(crate) fn insert_transfer(
    conn: &Connection,
    created_at: DateTime<Utc>,
    event_at: DateTime<Utc>,
) -> Result<TransferId> {
    conn.execute(
        "INSERT INTO transfers (created_at, event_at) VALUES (?1, ?2)",
        params![created_at.to_rfc3339(), event_at.to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_entry(
    conn: &Connection,
    account_id: AccountId,
    transfer_id: TransferId,
    amount: Decimal,
    applied: &Applied,
    created_at: DateTime<Utc>,
) -> Result<EntryId> {
    conn.execute(
        "INSERT INTO entries (
            account_id, transfer_id, amount,
            previous_balance, current_balance, account_version, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            account_id,
            transfer_id,
            amount.to_string(),
            applied.previous_balance.to_string(),
            applied.current_balance.to_string(),
            applied.version,
            created_at.to_rfc3339()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const ACCOUNT_COLUMNS: &str = "id, name, currency, balance, version, \
     allow_negative_balance, allow_positive_balance, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, account_id, transfer_id, amount, \
     previous_balance, current_balance, account_version, created_at";

/// Escape LIKE wildcards so a caller-supplied prefix matches literally.
fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub(crate) fn account_by_id(conn: &Connection, id: AccountId) -> Result<Account> {
    conn.query_row(
        &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
        params![id],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::id_not_found(id))
}

pub(crate) fn account_by_name(conn: &Connection, name: &str) -> Result<Option<Account>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM accounts WHERE name = ?1", ACCOUNT_COLUMNS),
            params![name],
            account_from_row,
        )
        .optional()?)
}

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    let balance: String = row.get(3)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        currency: row.get(2)?,
        balance: parse_decimal(&balance)?,
        version: row.get(4)?,
        allow_negative_balance: row.get(5)?,
        allow_positive_balance: row.get(6)?,
        created_at: parse_utc(&created_at)?,
        updated_at: parse_utc(&updated_at)?,
    })
}

fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
    let amount: String = row.get(3)?;
    let previous: String = row.get(4)?;
    let current: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    Ok(Entry {
        id: row.get(0)?,
        account_id: row.get(1)?,
        transfer_id: row.get(2)?,
        amount: parse_decimal(&amount)?,
        previous_balance: parse_decimal(&previous)?,
        current_balance: parse_decimal(&current)?,
        account_version: row.get(6)?,
        created_at: parse_utc(&created_at)?,
    })
}

fn transfer_from_row(row: &Row) -> rusqlite::Result<Transfer> {
    let created_at: String = row.get(1)?;
    let event_at: String = row.get(2)?;
    Ok(Transfer {
        id: row.get(0)?,
        created_at: parse_utc(&created_at)?,
        event_at: parse_utc(&event_at)?,
    })
}

fn parse_utc(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}

fn parse_decimal(s: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(s).map_err(|_| rusqlite::Error::InvalidQuery)
}

// ============================================================================
// TESTS
// ============================================================================

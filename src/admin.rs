//! Administrative bypass operations: historical backfill and pair deletion.
//!
//! Both operations run outside the normal transfer coordinator but inside
//! the same all-or-nothing SQLite transaction and through the same
//! `apply_delta` primitive, so the invariants binding accounts, transfers
//! and entries hold on this path too.
//!
//! The counterpart convention comes from the operator tooling: a user-facing
//! account `bank.KRW.woori.8472` is balanced by the liquidity account
//! `liquidity.KRW.woori.8472`, the same path suffix under a different
//! leading namespace. The liquidity side is the one allowed to go negative.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use log::{info, warn};
use rusqlite::{params, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency;
use crate::error::{LedgerError, Result};
use crate::store::{self, Ledger, TransferId};

/// Leading namespace of user-facing accounts.
pub const BANK_NAMESPACE: &str = "bank";

/// Leading namespace of the balancing liquidity accounts.
pub const LIQUIDITY_NAMESPACE: &str = "liquidity";

/// Backfilled entries are dated at 02:00:00 KST on the effective date.
const BACKFILL_HOUR: u32 = 2;
const KST_OFFSET_SECONDS: i32 = 9 * 3600;

/// Outcome of a cascading pair deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub deleted_accounts: Vec<String>,
    pub deleted_entries: usize,
    pub deleted_transfers: usize,
}

/// Derive the paired account name by swapping the leading namespace segment.
///
/// `derive_counterpart("bank.KRW.woori.8472", "bank", "liquidity")` yields
/// `liquidity.KRW.woori.8472`. The name must actually sit under `source_ns`;
/// the caller still has to resolve the result against the store before use.
pub fn derive_counterpart(name: &str, source_ns: &str, target_ns: &str) -> Result<String> {
    match name.split_once('.') {
        Some((head, suffix)) if head == source_ns => Ok(format!("{}.{}", target_ns, suffix)),
        _ => Err(LedgerError::MalformedName {
            name: name.to_string(),
            namespace: source_ns.to_string(),
        }),
    }
}

impl Ledger {
    /// Seed a historical opening balance on `account_name`, dated at
    /// `effective_date` (`YYYY-MM-DD`, taken as 02:00:00 +09:00 KST).
    ///
    /// Credits the target, debits its liquidity counterpart, and writes the
    /// transfer plus both entries the normal path would have produced, with
    /// previous/current balances taken from each account's state at the
    /// moment of this operation. The entries carry the effective instant as
    /// their creation time so running-balance reconstruction places them
    /// before later activity; this is only sound while no other activity
    /// exists on the pair yet, which is the operator's contract.
    pub fn backfill_balance(
        &mut self,
        account_name: &str,
        amount: Decimal,
        effective_date: &str,
    ) -> Result<TransferId> {
        let event_at = parse_effective_date(effective_date)?;
        let counterpart_name =
            derive_counterpart(account_name, BANK_NAMESPACE, LIQUIDITY_NAMESPACE)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let target = store::account_by_name(&tx, account_name)?
            .ok_or_else(|| LedgerError::not_found(account_name))?;
        let counterpart = store::account_by_name(&tx, &counterpart_name)?
            .ok_or_else(|| LedgerError::not_found(&counterpart_name))?;
        // Same pairing rule the transfer coordinator enforces per leg:
        // both sides must hold the same unit or the entries cannot cancel.
        if counterpart.currency != target.currency {
            return Err(LedgerError::CurrencyMismatch {
                from_currency: counterpart.currency,
                to_currency: target.currency,
            });
        }
        currency::check_amount(amount, &target.currency)?;

        if !target.balance.is_zero() || !counterpart.balance.is_zero() {
            warn!(
                "backfilling over non-zero balances: {}={}, {}={}",
                target.name, target.balance, counterpart.name, counterpart.balance
            );
        }

        let now = Utc::now();
        let transfer_id = store::insert_transfer(&tx, now, event_at)?;

        // Counterpart -> target direction: debit the liquidity side first,
        // mirroring leg processing on the normal path.
        let debit = store::apply_delta(&tx, counterpart.id, -amount, counterpart.version, event_at)?;
        store::insert_entry(&tx, counterpart.id, transfer_id, -amount, &debit, event_at)?;

        let credit = store::apply_delta(&tx, target.id, amount, target.version, event_at)?;
        store::insert_entry(&tx, target.id, transfer_id, amount, &credit, event_at)?;

        tx.commit()?;
        info!(
            "backfilled {} {} into '{}' effective {} (transfer {})",
            amount, target.currency, account_name, effective_date, transfer_id
        );
        Ok(transfer_id)
    }

    /// Permanently delete a bank/liquidity account pair and its history.
    ///
    /// Collects every transfer referenced by an entry on either account,
    /// deletes those entries, then the transfers, then both accounts, all
    /// in one transaction. Foreign keys stay enforced, so a transfer that
    /// still owns entries on some unrelated account aborts the whole unit
    /// instead of leaving orphans behind.
    pub fn delete_account_pair(&mut self, account_name: &str) -> Result<DeletionReport> {
        let counterpart_name =
            derive_counterpart(account_name, BANK_NAMESPACE, LIQUIDITY_NAMESPACE)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let target = store::account_by_name(&tx, account_name)?.ok_or_else(|| {
            LedgerError::PartialResolutionFailure {
                requested: account_name.to_string(),
                missing: account_name.to_string(),
            }
        })?;
        let counterpart = store::account_by_name(&tx, &counterpart_name)?.ok_or_else(|| {
            LedgerError::PartialResolutionFailure {
                requested: account_name.to_string(),
                missing: counterpart_name.clone(),
            }
        })?;

        // Transfers reachable from either account's entries
        let mut stmt = tx.prepare(
            "SELECT DISTINCT transfer_id FROM entries WHERE account_id IN (?1, ?2)",
        )?;
        let transfer_ids = stmt
            .query_map(params![target.id, counterpart.id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let deleted_entries = tx.execute(
            "DELETE FROM entries WHERE account_id IN (?1, ?2)",
            params![target.id, counterpart.id],
        )?;

        let mut deleted_transfers = 0;
        for transfer_id in &transfer_ids {
            deleted_transfers += tx.execute(
                "DELETE FROM transfers WHERE id = ?1",
                params![transfer_id],
            )?;
        }

        tx.execute(
            "DELETE FROM accounts WHERE id IN (?1, ?2)",
            params![target.id, counterpart.id],
        )?;

        tx.commit()?;
        info!(
            "deleted account pair '{}' / '{}': {} entries, {} transfers",
            target.name, counterpart.name, deleted_entries, deleted_transfers
        );
        Ok(DeletionReport {
            deleted_accounts: vec![target.name, counterpart.name],
            deleted_entries,
            deleted_transfers,
        })
    }
}

/// Parse `YYYY-MM-DD` into the effective instant: that date at 02:00:00 KST.
fn parse_effective_date(input: &str) -> Result<DateTime<Utc>> {
    let invalid = || LedgerError::InvalidDate {
        input: input.to_string(),
    };
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| invalid())?;
    let naive = date
        .and_hms_opt(BACKFILL_HOUR, 0, 0)
        .ok_or_else(invalid)?;
    let kst = FixedOffset::east_opt(KST_OFFSET_SECONDS).ok_or_else(invalid)?;
    let local = kst.from_local_datetime(&naive).single().ok_or_else(invalid)?;
    Ok(local.with_timezone(&Utc))
}

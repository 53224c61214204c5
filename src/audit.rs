//! Integrity verification over committed ledger state.
//!
//! The consistency rules are not a separate process; they are the contract
//! the store, the transfer coordinator and the administrative paths jointly
//! uphold. This module makes them executable: a full sweep that checks, for
//! the whole database,
//!
//!   (a) every account's balance equals the signed sum of its entries,
//!   (b) every transfer's entries sum to zero per currency,
//!   (c) no entry is orphaned and every `previous + amount = current`
//!       running-balance chain is intact.

use chrono::{DateTime, Utc};
use rusqlite::params;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::Result;
use crate::store::{EntryId, Ledger, TransferId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IntegrityViolation {
    /// Account balance diverged from the signed sum of its entries.
    BalanceMismatch {
        account: String,
        stored: Decimal,
        entry_sum: Decimal,
    },

    /// A transfer's entries do not cancel out within one currency.
    UnbalancedTransfer {
        transfer_id: TransferId,
        currency: String,
        net: Decimal,
    },

    /// Entry references a missing account or transfer.
    OrphanedEntry { entry_id: EntryId, reason: String },

    /// `previous_balance + amount != current_balance`, or the chain of
    /// entries for an account does not connect.
    BrokenRunningBalance { account: String, entry_id: EntryId },
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub accounts_checked: usize,
    pub transfers_checked: usize,
    pub entries_checked: usize,
    pub violations: Vec<IntegrityViolation>,
    pub verified_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "checked {} accounts, {} transfers, {} entries: {} violation(s)",
            self.accounts_checked,
            self.transfers_checked,
            self.entries_checked,
            self.violations.len()
        )
    }
}

impl Ledger {
    /// Sweep the whole database and report every invariant violation found.
    /// An empty report means the committed state is consistent.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let mut violations = Vec::new();

        // (a) + (c) running balances, per account
        let accounts = self.list_accounts("")?;
        for account in &accounts {
            let history = self.entry_history(account.id)?;
            let mut running = Decimal::ZERO;
            for entry in &history {
                if entry.previous_balance != running
                    || entry.previous_balance + entry.amount != entry.current_balance
                {
                    violations.push(IntegrityViolation::BrokenRunningBalance {
                        account: account.name.clone(),
                        entry_id: entry.id,
                    });
                }
                running = entry.current_balance;
            }
            let entry_sum: Decimal = history.iter().map(|e| e.amount).sum();
            if entry_sum != account.balance {
                violations.push(IntegrityViolation::BalanceMismatch {
                    account: account.name.clone(),
                    stored: account.balance,
                    entry_sum,
                });
            }
        }

        // (b) zero-sum per transfer and currency
        let transfer_ids = self.all_transfer_ids()?;
        for transfer_id in &transfer_ids {
            let entries = self.transfer_entries(*transfer_id)?;
            let mut per_currency: HashMap<String, Decimal> = HashMap::new();
            for entry in &entries {
                let currency = match self.get_account_by_id(entry.account_id) {
                    Ok(account) => account.currency,
                    // Account gone: reported below by the orphan scan
                    Err(_) => continue,
                };
                *per_currency.entry(currency).or_insert(Decimal::ZERO) += entry.amount;
            }
            for (currency, net) in per_currency {
                if net != Decimal::ZERO {
                    violations.push(IntegrityViolation::UnbalancedTransfer {
                        transfer_id: *transfer_id,
                        currency,
                        net,
                    });
                }
            }
        }

        // (c) orphans: impossible while foreign keys are enforced, but the
        // database may have been touched by other tooling
        let entries_checked = self.count_entries()?;
        for (entry_id, reason) in self.orphaned_entries()? {
            violations.push(IntegrityViolation::OrphanedEntry { entry_id, reason });
        }

        Ok(IntegrityReport {
            accounts_checked: accounts.len(),
            transfers_checked: transfer_ids.len(),
            entries_checked,
            violations,
            verified_at: Utc::now(),
        })
    }

    fn all_transfer_ids(&self) -> Result<Vec<TransferId>> {
        let mut stmt = self.conn.prepare("SELECT id FROM transfers ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn count_entries(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn orphaned_entries(&self) -> Result<Vec<(EntryId, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id,
                    a.id IS NULL AS missing_account,
                    t.id IS NULL AS missing_transfer
             FROM entries e
             LEFT JOIN accounts a ON a.id = e.account_id
             LEFT JOIN transfers t ON t.id = e.transfer_id
             WHERE a.id IS NULL OR t.id IS NULL",
        )?;
        let rows = stmt
            .query_map(params![], |row| {
                let entry_id: i64 = row.get(0)?;
                let missing_account: bool = row.get(1)?;
                let missing_transfer: bool = row.get(2)?;
                let reason = match (missing_account, missing_transfer) {
                    (true, true) => "missing account and transfer",
                    (true, false) => "missing account",
                    _ => "missing transfer",
                };
                Ok((entry_id, reason.to_string()))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::Leg;

    fn seeded_ledger() -> Ledger {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let a = ledger.create_account("bank.KRW.a", "KRW", false, true).unwrap();
        let liq = ledger
            .create_account("liquidity.KRW.a", "KRW", true, true)
            .unwrap();
        ledger.backfill_balance("bank.KRW.a", Decimal::from(5000), "2025-01-01").unwrap();
        ledger
            .execute_transfer(&[Leg::new(a, liq, Decimal::from(1200))], None)
            .unwrap();
        ledger
    }

    #[test]
    fn test_consistent_state_passes() {
        let ledger = seeded_ledger();
        let report = ledger.verify_integrity().unwrap();
        assert!(report.is_consistent(), "unexpected: {:?}", report.violations);
        assert_eq!(report.accounts_checked, 2);
        assert_eq!(report.transfers_checked, 2);
        assert_eq!(report.entries_checked, 4);
    }

    #[test]
    fn test_detects_balance_mismatch() {
        let ledger = seeded_ledger();
        // Corrupt the stored balance behind the ledger's back
        ledger
            .conn
            .execute(
                "UPDATE accounts SET balance = '999999' WHERE name = 'bank.KRW.a'",
                [],
            )
            .unwrap();

        let report = ledger.verify_integrity().unwrap();
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, IntegrityViolation::BalanceMismatch { account, .. }
                if account == "bank.KRW.a")));
    }

    #[test]
    fn test_detects_unbalanced_transfer() {
        let ledger = seeded_ledger();
        ledger
            .conn
            .execute("UPDATE entries SET amount = '9999' WHERE id = 1", [])
            .unwrap();

        let report = ledger.verify_integrity().unwrap();
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, IntegrityViolation::UnbalancedTransfer { .. })));
    }

    #[test]
    fn test_detects_broken_running_balance() {
        let ledger = seeded_ledger();
        ledger
            .conn
            .execute("UPDATE entries SET previous_balance = '123' WHERE id = 2", [])
            .unwrap();

        let report = ledger.verify_integrity().unwrap();
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, IntegrityViolation::BrokenRunningBalance { .. })));
    }

    #[test]
    fn test_report_summary() {
        let ledger = seeded_ledger();
        let report = ledger.verify_integrity().unwrap();
        assert!(report.summary().contains("0 violation(s)"));
    }
}

//! Transfer coordinator: multi-leg atomic movements.
//!
//! A transfer is the unit of atomicity, not the leg. A compound transfer
//! (e.g. a currency conversion expressed as a KRW leg plus a USD leg) either
//! fully commits, writing one transfer row and a debit/credit entry pair per
//! leg, or leaves every account exactly as it was.

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::TransactionBehavior;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency;
use crate::error::{LedgerError, Result};
use crate::store::{self, AccountId, Ledger, TransferId};

/// One (from, to, amount) movement within a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
}

impl Leg {
    pub fn new(from: AccountId, to: AccountId, amount: Decimal) -> Self {
        Leg { from, to, amount }
    }
}

impl Ledger {
    /// Execute a transfer of one or more legs as a single atomic unit.
    ///
    /// Legs are applied in caller order; per leg the `from` account is
    /// debited and its entry appended, then the `to` account credited
    /// symmetrically. Each entry captures the account's balance immediately
    /// before and after the mutation and the post-increment version.
    ///
    /// `event_at` backdates the transfer's event time; it defaults to the
    /// creation instant. Any failure rolls the whole transfer back; nothing
    /// is retried internally.
    pub fn execute_transfer(
        &mut self,
        legs: &[Leg],
        event_at: Option<DateTime<Utc>>,
    ) -> Result<TransferId> {
        if legs.is_empty() {
            return Err(LedgerError::EmptyTransfer);
        }
        for leg in legs {
            if leg.amount <= Decimal::ZERO {
                return Err(LedgerError::NonPositiveAmount { amount: leg.amount });
            }
            if leg.from == leg.to {
                return Err(LedgerError::SelfTransfer {
                    account_id: leg.from,
                });
            }
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let event_at = event_at.unwrap_or(now);

        // Validate every leg before mutating anything: accounts exist, the
        // pair holds the same unit, the amount fits the unit's scale.
        for leg in legs {
            let from = store::account_by_id(&tx, leg.from)?;
            let to = store::account_by_id(&tx, leg.to)?;
            if from.currency != to.currency {
                return Err(LedgerError::CurrencyMismatch {
                    from_currency: from.currency,
                    to_currency: to.currency,
                });
            }
            currency::check_amount(leg.amount, &from.currency)?;
        }

        let transfer_id = store::insert_transfer(&tx, now, event_at)?;

        for leg in legs {
            // Re-read per application: the same account may appear in
            // several legs and its version moves with each one.
            let from = store::account_by_id(&tx, leg.from)?;
            let debit = store::apply_delta(&tx, leg.from, -leg.amount, from.version, now)?;
            store::insert_entry(&tx, leg.from, transfer_id, -leg.amount, &debit, now)?;

            let to = store::account_by_id(&tx, leg.to)?;
            let credit = store::apply_delta(&tx, leg.to, leg.amount, to.version, now)?;
            store::insert_entry(&tx, leg.to, transfer_id, leg.amount, &credit, now)?;
        }

        tx.commit()?;
        info!(
            "committed transfer {} with {} leg(s), event_at {}",
            transfer_id,
            legs.len(),
            event_at.to_rfc3339()
        );
        Ok(transfer_id)
    }

    /// Reconstruct a transfer's legs from its entry pairs.
    ///
    /// Entries are written debit-then-credit per leg in caller order, so
    /// consecutive pairs in insertion order recover the original legs. An
    /// odd entry count means the rows were tampered with outside the engine
    /// and is reported as corruption.
    pub fn transfer_legs(&self, transfer_id: TransferId) -> Result<Vec<Leg>> {
        let entries = self.transfer_entries(transfer_id)?;
        if entries.len() % 2 != 0 {
            return Err(LedgerError::CorruptTransfer {
                transfer_id,
                entries: entries.len(),
            });
        }
        let mut legs = Vec::with_capacity(entries.len() / 2);
        for pair in entries.chunks_exact(2) {
            if let [debit, credit] = pair {
                legs.push(Leg::new(debit.account_id, credit.account_id, credit.amount));
            }
        }
        Ok(legs)
    }
}

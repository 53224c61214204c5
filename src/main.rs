// Interactive operator menu over the ledger engine.
// Thin wrapper: every mutation goes through the library; nothing here
// touches the database directly.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use sqledger::{Ledger, Leg, VERSION};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db_path = args.get(1).map(String::as_str).unwrap_or("ledger.db");

    let mut ledger = Ledger::open(db_path)
        .with_context(|| format!("failed to open ledger database at '{}'", db_path))?;

    println!("sqledger v{} - double-entry ledger ({})", VERSION, db_path);

    loop {
        println!();
        println!("1. List accounts and balances");
        println!("2. Create account");
        println!("3. Execute transfer");
        println!("4. Show entry history");
        println!("5. Backfill opening balance (admin)");
        println!("6. Delete account pair (admin)");
        println!("7. Verify integrity");
        println!("8. Quit");

        match prompt("Select (1-8): ")?.as_str() {
            "1" => list_accounts(&ledger)?,
            "2" => create_account(&mut ledger)?,
            "3" => execute_transfer(&mut ledger)?,
            "4" => show_history(&ledger)?,
            "5" => backfill(&mut ledger)?,
            "6" => delete_pair(&mut ledger)?,
            "7" => verify(&ledger)?,
            "8" => break,
            other => println!("unknown selection: '{}'", other),
        }
    }

    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn list_accounts(ledger: &Ledger) -> Result<()> {
    let prefix = prompt("Name prefix (empty for all): ")?;
    let accounts = ledger.list_accounts(&prefix)?;
    if accounts.is_empty() {
        println!("no accounts");
        return Ok(());
    }
    println!("{:<32} {:>5} {:>18} {:>6}", "name", "unit", "balance", "ver");
    for account in accounts {
        println!(
            "{:<32} {:>5} {:>18} {:>6}",
            account.name, account.currency, account.balance, account.version
        );
    }
    Ok(())
}

fn create_account(ledger: &mut Ledger) -> Result<()> {
    let name = prompt("Account name (e.g. bank.KRW.woori.8472): ")?;
    let currency = prompt("Currency/unit code (e.g. KRW, USD, GOOGL): ")?;
    let allow_negative = prompt("Allow negative balance? (y/n): ")? == "y";

    match ledger.create_account(&name, &currency, allow_negative, true) {
        Ok(id) => println!("created '{}' with id {}", name, id),
        Err(e) => println!("error: {}", e),
    }
    Ok(())
}

fn execute_transfer(ledger: &mut Ledger) -> Result<()> {
    let mut legs = Vec::new();
    loop {
        let from = prompt("From account name: ")?;
        let to = prompt("To account name: ")?;
        let amount = prompt("Amount: ")?;

        let from = match ledger.get_account(&from) {
            Ok(a) => a,
            Err(e) => {
                println!("error: {}", e);
                return Ok(());
            }
        };
        let to = match ledger.get_account(&to) {
            Ok(a) => a,
            Err(e) => {
                println!("error: {}", e);
                return Ok(());
            }
        };
        let amount = match Decimal::from_str(&amount) {
            Ok(d) => d,
            Err(_) => {
                println!("error: '{}' is not a valid amount", amount);
                return Ok(());
            }
        };
        legs.push(Leg::new(from.id, to.id, amount));

        if prompt("Add another leg? (y/n): ")? != "y" {
            break;
        }
    }

    match ledger.execute_transfer(&legs, None) {
        Ok(id) => println!("✓ transfer {} committed ({} leg(s))", id, legs.len()),
        Err(e) => println!("error: {}", e),
    }
    Ok(())
}

fn show_history(ledger: &Ledger) -> Result<()> {
    let name = prompt("Account name: ")?;
    let account = match ledger.get_account(&name) {
        Ok(a) => a,
        Err(e) => {
            println!("error: {}", e);
            return Ok(());
        }
    };

    let history = ledger.entry_history(account.id)?;
    println!(
        "{:<26} {:>15} {:>15} {:>15}",
        "timestamp", "amount", "previous", "current"
    );
    for entry in &history {
        println!(
            "{:<26} {:>15} {:>15} {:>15}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.amount,
            entry.previous_balance,
            entry.current_balance
        );
    }
    println!(
        "{} entries, stored balance {}",
        history.len(),
        account.balance
    );
    Ok(())
}

fn backfill(ledger: &mut Ledger) -> Result<()> {
    println!("⚠ this writes a backdated opening entry against the liquidity counterpart");
    let name = prompt("Target account name: ")?;
    let amount = prompt("Opening amount: ")?;
    let date = prompt("Effective date (YYYY-MM-DD): ")?;

    let amount = match Decimal::from_str(&amount) {
        Ok(d) => d,
        Err(_) => {
            println!("error: '{}' is not a valid amount", amount);
            return Ok(());
        }
    };

    if prompt("Proceed? (y/n): ")? != "y" {
        println!("cancelled");
        return Ok(());
    }

    match ledger.backfill_balance(&name, amount, &date) {
        Ok(id) => println!("✓ backfill committed as transfer {}", id),
        Err(e) => println!("error: {}", e),
    }
    Ok(())
}

fn delete_pair(ledger: &mut Ledger) -> Result<()> {
    println!("⚠ this permanently deletes the account, its liquidity counterpart,");
    println!("  and every transfer and entry on either of them");
    let name = prompt("Target account name: ")?;

    if prompt("Really delete? (y/n): ")? != "y" {
        println!("cancelled");
        return Ok(());
    }

    match ledger.delete_account_pair(&name) {
        Ok(report) => {
            println!(
                "✓ deleted {} ({} entries, {} transfers)",
                report.deleted_accounts.join(", "),
                report.deleted_entries,
                report.deleted_transfers
            );
        }
        Err(e) => println!("error: {}", e),
    }
    Ok(())
}

fn verify(ledger: &Ledger) -> Result<()> {
    let report = ledger.verify_integrity()?;
    println!("{}", report.summary());
    for violation in &report.violations {
        println!("  - {:?}", violation);
    }
    Ok(())
}

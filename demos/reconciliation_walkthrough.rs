//! End-to-end reconciliation walkthrough

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::str::FromStr;

use reconciliation_core::utils::memory_storage::{
    InMemoryTransactionBook, MemoryStorage, RecordingJournalWriter, StaticAccountLookup,
    StaticContextResolver,
};
use reconciliation_core::*;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🏦 Reconciliation Core - Walkthrough\n");

    let storage = MemoryStorage::new();

    // 1. Import a January bank statement
    println!("📄 Importing bank statement...");
    let mut importer = StatementImporter::new(storage.clone());
    let statement = importer
        .import(ImportParams {
            company_id: "acme".into(),
            bank_account_id: "bank-checking".into(),
            format: StatementFormat::Csv,
            file_name: "january.csv".into(),
            content: "Date,Description,Reference,Amount\n\
                      2024-01-03,Customer deposit,INV-100,200.00\n\
                      2024-01-05,Card processor fee,,-49.99\n\
                      2024-01-10,Supplier payment,BILL-42,-156.32\n\
                      2024-01-15,Customer deposit,INV-101,350.00\n\
                      2024-01-20,ATM withdrawal,,-25.00\n"
                .into(),
            period_start: date(2024, 1, 1),
            period_end: date(2024, 1, 31),
            opening_balance: dec("1000.00"),
            closing_balance: dec("1318.69"),
            currency: "USD".into(),
            imported_by: "alice".into(),
        })
        .await?;
    let report = importer.normalize(&statement.id).await?;
    println!(
        "  ✓ Imported {} with {} lines (status: {:?})\n",
        statement.file_name, report.line_count, report.status
    );

    // 2. Start the reconciliation session
    let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
    let reconciliation = lifecycle.start(&statement.id, "alice").await?;
    println!(
        "🔁 Reconciliation started, initial variance {}\n",
        reconciliation.variance
    );

    // 3. Auto-match against the books (which are missing the ATM withdrawal)
    let book = InMemoryTransactionBook::new();
    for (id, on, amount, reference) in [
        ("pay-1", date(2024, 1, 3), "200.00", Some("INV-100")),
        ("pay-2", date(2024, 1, 5), "-49.99", None),
        ("pay-3", date(2024, 1, 10), "-156.32", Some("BILL-42")),
        ("pay-4", date(2024, 1, 15), "350.00", Some("INV-101")),
    ] {
        book.add(SourceRecord {
            source_type: SourceType::Payment,
            source_id: id.into(),
            company_id: "acme".into(),
            date: on,
            amount: dec(amount),
            reference: reference.map(str::to_string),
            description: None,
        });
    }
    let mut matcher = MatchingEngine::new(storage.clone(), book);
    let outcome = matcher.run_auto_match(&reconciliation.id, "alice").await?;
    println!("🔍 Auto-matcher created {} matches:", outcome.created.len());
    for m in &outcome.created {
        println!(
            "  ✓ {} {} for {} (confidence {:.2})",
            m.source_type.display_name(),
            m.source_id,
            m.amount,
            m.confidence.unwrap_or_default()
        );
    }

    let after_match = lifecycle.get(&reconciliation.id).await?;
    println!("  Variance after matching: {}\n", after_match.variance);

    // 4. Explain the leftover with a bank-fee adjustment, posted to the ledger
    println!("🧾 Recording bank-fee adjustment...");
    let accounts = StaticAccountLookup::new();
    accounts.configure("acme", AdjustmentType::BankFee, "expense-bank-fees");
    let journal = RecordingJournalWriter::new();
    let mut adjustments = AdjustmentLedger::new(storage.clone(), accounts, journal.clone());
    let adjustment = adjustments
        .create_adjustment(
            &reconciliation.id,
            AdjustmentParams {
                adjustment_type: AdjustmentType::BankFee,
                amount: dec("-25.00"),
                description: "Unrecorded ATM fee".into(),
                statement_line_id: None,
                post_to_ledger: true,
            },
            "alice",
        )
        .await?;
    let entry = journal
        .entry(adjustment.journal_entry_id.as_deref().unwrap_or_default())
        .expect("journal entry was posted");
    println!("  ✓ Posted journal entry with {} lines\n", entry.lines.len());

    // 5. Complete and lock
    let completed = lifecycle.complete(&reconciliation.id, "alice").await?;
    println!("✅ Completed (variance {})", completed.variance);
    lifecycle.lock(&reconciliation.id, "alice").await?;
    println!("🔒 Locked\n");

    // 6. Print the summary report
    let resolver = StaticContextResolver::new();
    resolver.grant(CompanyContext {
        user_id: "alice".into(),
        company_id: "acme".into(),
        capabilities: HashSet::from([Capability::ViewReports]),
    });
    let reports = ReportingEngine::new(storage, resolver);
    let text = reports
        .export_summary(&reconciliation.id, "alice", ReportFormat::Print)
        .await?;
    println!("{text}");

    Ok(())
}

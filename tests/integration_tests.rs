//! End-to-end reconciliation flows against the in-memory storage

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use rand::Rng;
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

const JANUARY_CSV: &str = "Date,Description,Reference,Amount\n\
    2024-01-03,Customer deposit,INV-100,200.00\n\
    2024-01-05,Card processor fee,,-49.99\n\
    2024-01-10,Supplier payment,BILL-42,-156.32\n\
    2024-01-15,Customer deposit,INV-101,350.00\n\
    2024-01-20,ATM withdrawal,,-25.00\n";

fn january_params() -> ImportParams {
    ImportParams {
        company_id: "co-1".into(),
        bank_account_id: "bank-acct".into(),
        format: StatementFormat::Csv,
        file_name: "jan.csv".into(),
        content: JANUARY_CSV.into(),
        period_start: date(2024, 1, 1),
        period_end: date(2024, 1, 31),
        opening_balance: dec("1000.00"),
        closing_balance: dec("1318.69"),
        currency: "USD".into(),
        imported_by: "alice".into(),
    }
}

fn payment(source_id: &str, on: NaiveDate, amount: &str, reference: Option<&str>) -> SourceRecord {
    SourceRecord {
        source_type: SourceType::Payment,
        source_id: source_id.into(),
        company_id: "co-1".into(),
        date: on,
        amount: dec(amount),
        reference: reference.map(str::to_string),
        description: None,
    }
}

/// Internal records covering every January line
fn full_book() -> InMemoryTransactionBook {
    let book = InMemoryTransactionBook::new();
    book.add(payment("p1", date(2024, 1, 3), "200.00", Some("INV-100")));
    book.add(payment("p2", date(2024, 1, 5), "-49.99", None));
    book.add(payment("p3", date(2024, 1, 10), "-156.32", Some("BILL-42")));
    book.add(payment("p4", date(2024, 1, 15), "350.00", Some("INV-101")));
    book.add(payment("p5", date(2024, 1, 20), "-25.00", None));
    book
}

async fn imported_reconciliation(storage: MemoryStorage) -> BankReconciliation {
    let mut importer = StatementImporter::new(storage.clone());
    let statement = importer.import(january_params()).await.unwrap();
    let report = importer.normalize(&statement.id).await.unwrap();
    assert_eq!(report.status, StatementStatus::Normalized);
    assert_eq!(report.line_count, 5);

    let mut lifecycle = ReconciliationLifecycle::new(storage);
    lifecycle.start(&statement.id, "alice").await.unwrap()
}

#[tokio::test]
async fn full_cycle_import_match_complete() {
    let storage = MemoryStorage::new();
    let reconciliation = imported_reconciliation(storage.clone()).await;
    assert_eq!(reconciliation.variance, dec("318.69"));

    let mut matcher = MatchingEngine::new(storage.clone(), full_book());
    let outcome = matcher
        .run_auto_match(&reconciliation.id, "alice")
        .await
        .unwrap();
    assert_eq!(outcome.created.len(), 5);

    let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
    let completed = lifecycle.complete(&reconciliation.id, "alice").await.unwrap();
    assert_eq!(completed.status, ReconciliationStatus::Completed);
    assert!(completed.is_balanced());

    // All lines matched, variance derived from storage sums
    let lines = storage
        .get_statement_lines(&completed.statement_id)
        .await
        .unwrap();
    assert!(lines.iter().all(|l| l.matched));
    let matched = storage.sum_matched_amount(&reconciliation.id).await.unwrap();
    assert_eq!(matched, dec("318.69"));
}

#[tokio::test]
async fn unexplained_line_needs_an_adjustment_before_completion() {
    let storage = MemoryStorage::new();
    let reconciliation = imported_reconciliation(storage.clone()).await;

    // Books are missing the ATM withdrawal
    let book = InMemoryTransactionBook::new();
    book.add(payment("p1", date(2024, 1, 3), "200.00", Some("INV-100")));
    book.add(payment("p2", date(2024, 1, 5), "-49.99", None));
    book.add(payment("p3", date(2024, 1, 10), "-156.32", Some("BILL-42")));
    book.add(payment("p4", date(2024, 1, 15), "350.00", Some("INV-101")));

    let mut matcher = MatchingEngine::new(storage.clone(), book);
    let outcome = matcher
        .run_auto_match(&reconciliation.id, "alice")
        .await
        .unwrap();
    assert_eq!(outcome.created.len(), 4);

    let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
    let err = lifecycle
        .complete(&reconciliation.id, "alice")
        .await
        .unwrap_err();
    match err {
        ReconcileError::NonZeroVariance(v) => assert_eq!(v, dec("-25.00")),
        other => panic!("unexpected error: {other}"),
    }

    let accounts = StaticAccountLookup::new();
    accounts.configure("co-1", AdjustmentType::BankFee, "expense-fees");
    let journal = RecordingJournalWriter::new();
    let mut adjustments =
        AdjustmentLedger::new(storage.clone(), accounts, journal.clone());
    adjustments
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
        .await
        .unwrap();
    assert_eq!(journal.posted_count(), 1);

    let completed = lifecycle.complete(&reconciliation.id, "alice").await.unwrap();
    assert_eq!(completed.status, ReconciliationStatus::Completed);
}

#[tokio::test]
async fn lock_before_completion_is_refused() {
    let storage = MemoryStorage::new();
    let reconciliation = imported_reconciliation(storage.clone()).await;

    let mut lifecycle = ReconciliationLifecycle::new(storage);
    let err = lifecycle.lock(&reconciliation.id, "alice").await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::NotCompleted(ReconciliationStatus::InProgress)
    ));
}

#[tokio::test]
async fn reopen_demands_a_reason_and_makes_the_session_editable() {
    let storage = MemoryStorage::new();
    let reconciliation = imported_reconciliation(storage.clone()).await;
    let mut matcher = MatchingEngine::new(storage.clone(), full_book());
    matcher
        .run_auto_match(&reconciliation.id, "alice")
        .await
        .unwrap();

    let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
    lifecycle.complete(&reconciliation.id, "alice").await.unwrap();
    lifecycle.lock(&reconciliation.id, "alice").await.unwrap();

    let err = lifecycle
        .reopen(&reconciliation.id, "bob", "")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::ReasonRequired));

    let reopened = lifecycle
        .reopen(&reconciliation.id, "bob", "Bank issued a corrected statement")
        .await
        .unwrap();
    assert_eq!(reopened.status, ReconciliationStatus::Reopened);
    assert!(reopened.can_be_edited());
    assert!(reopened.notes.contains("Bank issued a corrected statement"));

    // Matches can be reworked again
    let matches = storage.get_matches(&reconciliation.id).await.unwrap();
    matcher.remove_match(&matches[0].id, "bob").await.unwrap();
}

#[tokio::test]
async fn concurrent_completion_has_exactly_one_winner() {
    let storage = MemoryStorage::new();
    let reconciliation = imported_reconciliation(storage.clone()).await;
    let mut matcher = MatchingEngine::new(storage.clone(), full_book());
    matcher
        .run_auto_match(&reconciliation.id, "alice")
        .await
        .unwrap();

    let id_a = reconciliation.id.clone();
    let id_b = reconciliation.id.clone();
    let storage_a = storage.clone();
    let storage_b = storage.clone();
    let a = tokio::spawn(async move {
        ReconciliationLifecycle::new(storage_a)
            .complete(&id_a, "alice")
            .await
    });
    let b = tokio::spawn(async move {
        ReconciliationLifecycle::new(storage_b)
            .complete(&id_b, "bob")
            .await
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(
        loser.unwrap_err(),
        ReconcileError::NotInProgress(ReconciliationStatus::Completed)
    ));

    // Exactly one completion landed in the audit trail
    let transitions = storage
        .get_activities(&reconciliation.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|activity| {
            matches!(
                activity.action,
                ActivityAction::StatusChanged {
                    to: ReconciliationStatus::Completed,
                    ..
                }
            )
        })
        .count();
    assert_eq!(transitions, 1);
}

#[tokio::test]
async fn duplicate_statement_import_is_rejected() {
    let storage = MemoryStorage::new();
    let mut importer = StatementImporter::new(storage.clone());
    let first = importer.import(january_params()).await.unwrap();

    let err = importer.import(january_params()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::DuplicateStatement(_)));

    // The first row is intact and still the only match for the period
    let found = storage
        .find_duplicate_statement(
            "co-1",
            "bank-acct",
            "different-uid",
            date(2024, 1, 1),
            date(2024, 1, 31),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, first.id);
}

#[tokio::test]
async fn variance_always_equals_movement_minus_sums() {
    let storage = MemoryStorage::new();
    let reconciliation = imported_reconciliation(storage.clone()).await;
    let mut matcher = MatchingEngine::new(storage.clone(), full_book());
    matcher
        .run_auto_match(&reconciliation.id, "alice")
        .await
        .unwrap();

    let accounts = StaticAccountLookup::new();
    accounts.configure("co-1", AdjustmentType::Timing, "clearing");
    let mut adjustments = AdjustmentLedger::new(
        storage.clone(),
        accounts,
        RecordingJournalWriter::new(),
    );
    let adjustment = adjustments
        .create_adjustment(
            &reconciliation.id,
            AdjustmentParams {
                adjustment_type: AdjustmentType::Timing,
                amount: dec("-12.00"),
                description: "Deposit in transit".into(),
                statement_line_id: None,
                post_to_ledger: false,
            },
            "alice",
        )
        .await
        .unwrap();

    let check = |r: &BankReconciliation, matched: &BigDecimal, adjusted: &BigDecimal| {
        assert_eq!(
            r.variance,
            &r.closing_balance - &r.opening_balance - matched - adjusted
        );
    };
    let r = storage
        .get_reconciliation(&reconciliation.id)
        .await
        .unwrap()
        .unwrap();
    let matched = storage.sum_matched_amount(&reconciliation.id).await.unwrap();
    let adjusted = storage
        .sum_adjustment_amount(&reconciliation.id)
        .await
        .unwrap();
    check(&r, &matched, &adjusted);
    assert_eq!(r.variance, dec("12.00"));

    // Removing the adjustment and a match keeps the invariant
    adjustments
        .delete_adjustment(&adjustment.id, "alice")
        .await
        .unwrap();
    let m = storage.get_matches(&reconciliation.id).await.unwrap()[0].clone();
    matcher.remove_match(&m.id, "alice").await.unwrap();

    let r = storage
        .get_reconciliation(&reconciliation.id)
        .await
        .unwrap()
        .unwrap();
    let matched = storage.sum_matched_amount(&reconciliation.id).await.unwrap();
    let adjusted = storage
        .sum_adjustment_amount(&reconciliation.id)
        .await
        .unwrap();
    check(&r, &matched, &adjusted);
}

#[tokio::test]
async fn completion_never_succeeds_with_leftover_variance() {
    let mut rng = rand::thread_rng();
    for _ in 0..25 {
        let storage = MemoryStorage::new();
        let reconciliation = imported_reconciliation(storage.clone()).await;

        // Match a random strict subset of the five lines
        let keep: usize = rng.gen_range(0..5);
        let book = full_book();
        let mut matcher = MatchingEngine::new(storage.clone(), book);
        let lines = storage
            .get_statement_lines(&reconciliation.statement_id)
            .await
            .unwrap();
        let sources = ["p1", "p2", "p3", "p4", "p5"];
        for (line, source) in lines.iter().zip(sources).take(keep) {
            matcher
                .create_manual_match(
                    &reconciliation.id,
                    &line.id,
                    SourceType::Payment,
                    source,
                    line.amount.clone(),
                    "alice",
                    false,
                )
                .await
                .unwrap();
        }

        let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
        let result = lifecycle.complete(&reconciliation.id, "alice").await;
        assert!(
            matches!(result, Err(ReconcileError::NonZeroVariance(_))),
            "completed with only {keep} of 5 lines matched"
        );
        let r = storage
            .get_reconciliation(&reconciliation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.status, ReconciliationStatus::InProgress);
    }
}

#[tokio::test]
async fn exported_reports_agree_on_totals() {
    let storage = MemoryStorage::new();
    let reconciliation = imported_reconciliation(storage.clone()).await;
    let mut matcher = MatchingEngine::new(storage.clone(), full_book());
    matcher
        .run_auto_match(&reconciliation.id, "alice")
        .await
        .unwrap();

    let resolver = StaticContextResolver::new();
    resolver.grant(CompanyContext {
        user_id: "alice".into(),
        company_id: "co-1".into(),
        capabilities: HashSet::from([Capability::ViewReports, Capability::Reconcile]),
    });
    let reports = ReportingEngine::new(storage, resolver);

    let summary = reports.summary(&reconciliation.id, "alice").await.unwrap();
    assert_eq!(summary.total_matched, dec("318.69"));
    assert_eq!(summary.variance.variance, dec("0.00"));

    let json = export(&summary, ReportFormat::Json).unwrap();
    let decoded: SummaryReport = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.total_matched, summary.total_matched);

    let csv_text = export(&summary, ReportFormat::Csv).unwrap();
    assert!(csv_text.contains(&format!("total_matched,,,{},", summary.total_matched)));

    let print_text = export(&summary, ReportFormat::Print).unwrap();
    assert!(print_text.contains(&format!("total {}", summary.total_matched)));
}

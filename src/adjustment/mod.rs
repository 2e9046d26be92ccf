//! Reconciliation adjustments
//!
//! Adjustments absorb real-world differences the matcher cannot explain:
//! bank fees, interest, write-offs, and timing differences. Each type has a
//! fixed amount polarity, and an adjustment can optionally be posted to the
//! general ledger as a balanced two-line journal entry against a configured
//! offset account.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::info;

use crate::lifecycle::ReconciliationLifecycle;
use crate::traits::{JournalEntryWriter, LedgerAccountLookup, ReconciliationStorage};
use crate::types::*;
use crate::utils::validation;

/// Inputs for creating one adjustment
#[derive(Debug, Clone)]
pub struct AdjustmentParams {
    pub adjustment_type: AdjustmentType,
    pub amount: BigDecimal,
    pub description: String,
    /// Optional link to the statement line the adjustment explains
    pub statement_line_id: Option<String>,
    /// When set, the adjustment is posted to the general ledger
    pub post_to_ledger: bool,
}

/// Records adjustments and their optional journal postings
pub struct AdjustmentLedger<S, L, J>
where
    S: ReconciliationStorage + Clone,
    L: LedgerAccountLookup,
    J: JournalEntryWriter,
{
    storage: S,
    lifecycle: ReconciliationLifecycle<S>,
    accounts: L,
    journal: J,
}

impl<S, L, J> AdjustmentLedger<S, L, J>
where
    S: ReconciliationStorage + Clone,
    L: LedgerAccountLookup,
    J: JournalEntryWriter,
{
    pub fn new(storage: S, accounts: L, journal: J) -> Self {
        let lifecycle = ReconciliationLifecycle::new(storage.clone());
        Self {
            storage,
            lifecycle,
            accounts,
            journal,
        }
    }

    /// Record an adjustment against an editable reconciliation.
    ///
    /// The amount polarity is checked against the adjustment type; a
    /// violating amount is rejected, never silently flipped.
    pub async fn create_adjustment(
        &mut self,
        reconciliation_id: &str,
        params: AdjustmentParams,
        created_by: &str,
    ) -> ReconcileResult<ReconciliationAdjustment> {
        let reconciliation = self.lifecycle.require_editable(reconciliation_id).await?;
        params.adjustment_type.check_sign(&params.amount)?;
        validation::validate_description(&params.description)?;

        if let Some(line_id) = &params.statement_line_id {
            self.storage
                .get_line(line_id)
                .await?
                .filter(|l| l.statement_id == reconciliation.statement_id)
                .ok_or_else(|| {
                    ReconcileError::Validation(format!(
                        "Statement line {line_id} does not belong to this reconciliation"
                    ))
                })?;
        }

        let mut adjustment = ReconciliationAdjustment::new(
            reconciliation_id.to_string(),
            params.adjustment_type,
            params.amount,
            params.description,
            params.statement_line_id,
            created_by.to_string(),
        );

        if params.post_to_ledger {
            adjustment.journal_entry_id = Some(self.post(&reconciliation, &adjustment).await?);
        }

        self.storage.insert_adjustment(&adjustment).await?;
        self.record_activity(
            &adjustment,
            ActivityAction::AdjustmentCreated,
            created_by,
            format!(
                "Recorded {} adjustment of {}",
                adjustment.adjustment_type.display_name(),
                adjustment.amount
            ),
        )
        .await?;
        self.lifecycle.recalculate(reconciliation_id).await?;
        info!(
            reconciliation_id,
            adjustment_id = %adjustment.id,
            amount = %adjustment.amount,
            posted = adjustment.journal_entry_id.is_some(),
            "adjustment created"
        );
        Ok(adjustment)
    }

    /// Change an adjustment's amount or description.
    ///
    /// A posted adjustment has its old journal entry reversed and a fresh
    /// one posted for the new amount.
    pub async fn update_adjustment(
        &mut self,
        adjustment_id: &str,
        amount: BigDecimal,
        description: String,
        updated_by: &str,
    ) -> ReconcileResult<ReconciliationAdjustment> {
        let mut adjustment = self.get(adjustment_id).await?;
        let reconciliation = self
            .lifecycle
            .require_editable(&adjustment.reconciliation_id)
            .await?;
        adjustment.adjustment_type.check_sign(&amount)?;
        validation::validate_description(&description)?;

        let previous_amount = adjustment.amount.clone();
        adjustment.amount = amount;
        adjustment.description = description;

        if let Some(journal_entry_id) = adjustment.journal_entry_id.take() {
            self.journal
                .reverse_journal_entry(&reconciliation.company_id, &journal_entry_id)
                .await?;
            adjustment.journal_entry_id = Some(self.post(&reconciliation, &adjustment).await?);
        }

        self.storage.update_adjustment(&adjustment).await?;
        self.record_activity(
            &adjustment,
            ActivityAction::AdjustmentUpdated,
            updated_by,
            format!(
                "Updated {} adjustment from {} to {}",
                adjustment.adjustment_type.display_name(),
                previous_amount,
                adjustment.amount
            ),
        )
        .await?;
        self.lifecycle
            .recalculate(&adjustment.reconciliation_id)
            .await?;
        Ok(adjustment)
    }

    /// Remove an adjustment, reversing its journal entry if one was posted
    pub async fn delete_adjustment(
        &mut self,
        adjustment_id: &str,
        deleted_by: &str,
    ) -> ReconcileResult<()> {
        let adjustment = self.get(adjustment_id).await?;
        let reconciliation = self
            .lifecycle
            .require_editable(&adjustment.reconciliation_id)
            .await?;

        if let Some(journal_entry_id) = &adjustment.journal_entry_id {
            self.journal
                .reverse_journal_entry(&reconciliation.company_id, journal_entry_id)
                .await?;
        }

        self.storage.delete_adjustment(adjustment_id).await?;
        self.record_activity(
            &adjustment,
            ActivityAction::AdjustmentRemoved,
            deleted_by,
            format!(
                "Removed {} adjustment of {}",
                adjustment.adjustment_type.display_name(),
                adjustment.amount
            ),
        )
        .await?;
        self.lifecycle
            .recalculate(&adjustment.reconciliation_id)
            .await?;
        Ok(())
    }

    pub async fn get(&self, adjustment_id: &str) -> ReconcileResult<ReconciliationAdjustment> {
        self.storage
            .get_adjustment(adjustment_id)
            .await?
            .ok_or_else(|| ReconcileError::AdjustmentNotFound(adjustment_id.to_string()))
    }

    async fn post(
        &mut self,
        reconciliation: &BankReconciliation,
        adjustment: &ReconciliationAdjustment,
    ) -> ReconcileResult<String> {
        let offset = self
            .accounts
            .offset_account(&reconciliation.company_id, adjustment.adjustment_type)
            .await?;
        let lines = journal_lines(
            &reconciliation.ledger_account_id,
            &offset,
            adjustment,
        );
        let date = self.posting_date(reconciliation).await?;
        self.journal
            .post_journal_entry(
                &reconciliation.company_id,
                date,
                &adjustment.description,
                &format!("RECADJ-{}", adjustment.id),
                &lines,
            )
            .await
    }

    /// Postings are dated at the statement period end; if the statement was
    /// deleted since, fall back to today
    async fn posting_date(
        &self,
        reconciliation: &BankReconciliation,
    ) -> ReconcileResult<NaiveDate> {
        Ok(self
            .storage
            .get_statement(&reconciliation.statement_id)
            .await?
            .map(|s| s.period_end)
            .unwrap_or_else(|| chrono::Utc::now().date_naive()))
    }

    async fn record_activity(
        &mut self,
        adjustment: &ReconciliationAdjustment,
        action: ActivityAction,
        actor: &str,
        description: String,
    ) -> ReconcileResult<()> {
        let mut details = HashMap::new();
        details.insert("adjustment_id".to_string(), adjustment.id.clone());
        details.insert("amount".to_string(), adjustment.amount.to_string());
        details.insert(
            "adjustment_type".to_string(),
            adjustment.adjustment_type.display_name().to_string(),
        );
        if let Some(journal_entry_id) = &adjustment.journal_entry_id {
            details.insert("journal_entry_id".to_string(), journal_entry_id.clone());
        }
        self.storage
            .record_activity(&ActivityRecord::new(
                adjustment.reconciliation_id.clone(),
                action,
                actor.to_string(),
                description,
                details,
            ))
            .await
    }
}

/// Build the balanced two-line entry for an adjustment.
///
/// A positive adjustment means money the bank shows that the books do not,
/// so the bank account is debited and the offset account credited; a
/// negative adjustment runs the other way. Line amounts are magnitudes,
/// direction is carried by the debit/credit side.
pub fn journal_lines(
    bank_account_id: &str,
    offset_account_id: &str,
    adjustment: &ReconciliationAdjustment,
) -> Vec<JournalLine> {
    let magnitude = adjustment.amount.abs();
    let description = Some(adjustment.description.clone());
    if adjustment.amount >= BigDecimal::from(0) {
        vec![
            JournalLine::debit(bank_account_id.to_string(), magnitude.clone(), description.clone()),
            JournalLine::credit(offset_account_id.to_string(), magnitude, description),
        ]
    } else {
        vec![
            JournalLine::debit(offset_account_id.to_string(), magnitude.clone(), description.clone()),
            JournalLine::credit(bank_account_id.to_string(), magnitude, description),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{ImportParams, StatementImporter};
    use crate::utils::memory_storage::{
        MemoryStorage, RecordingJournalWriter, StaticAccountLookup,
    };
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn fixture() -> (MemoryStorage, BankReconciliation) {
        let storage = MemoryStorage::new();
        let mut importer = StatementImporter::new(storage.clone());
        let statement = importer
            .import(ImportParams {
                company_id: "co-1".into(),
                bank_account_id: "bank-acct".into(),
                format: StatementFormat::Csv,
                file_name: "jan.csv".into(),
                content: "Date,Description,Amount\n2024-01-20,Service charge,-25.00\n".into(),
                period_start: date(2024, 1, 1),
                period_end: date(2024, 1, 31),
                opening_balance: dec("1000.00"),
                closing_balance: dec("975.00"),
                currency: "USD".into(),
                imported_by: "user-1".into(),
            })
            .await
            .unwrap();
        importer.normalize(&statement.id).await.unwrap();
        let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
        let reconciliation = lifecycle.start(&statement.id, "user-1").await.unwrap();
        (storage, reconciliation)
    }

    fn ledger(storage: MemoryStorage) -> (
        AdjustmentLedger<MemoryStorage, StaticAccountLookup, RecordingJournalWriter>,
        RecordingJournalWriter,
    ) {
        let accounts = StaticAccountLookup::new();
        accounts.configure("co-1", AdjustmentType::BankFee, "expense-fees");
        accounts.configure("co-1", AdjustmentType::Interest, "revenue-interest");
        let journal = RecordingJournalWriter::new();
        (
            AdjustmentLedger::new(storage, accounts, journal.clone()),
            journal,
        )
    }

    #[tokio::test]
    async fn bank_fee_posts_debit_expense_credit_bank_and_zeroes_variance() {
        let (storage, reconciliation) = fixture().await;
        let (mut adjustments, journal) = ledger(storage.clone());

        let adjustment = adjustments
            .create_adjustment(
                &reconciliation.id,
                AdjustmentParams {
                    adjustment_type: AdjustmentType::BankFee,
                    amount: dec("-25.00"),
                    description: "Monthly service charge".into(),
                    statement_line_id: None,
                    post_to_ledger: true,
                },
                "user-1",
            )
            .await
            .unwrap();

        let entry = journal
            .entry(adjustment.journal_entry_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(entry.date, date(2024, 1, 31));
        assert_eq!(entry.lines.len(), 2);
        assert_eq!(entry.lines[0].account_id, "expense-fees");
        assert_eq!(entry.lines[0].side, EntrySide::Debit);
        assert_eq!(entry.lines[1].account_id, "bank-acct");
        assert_eq!(entry.lines[1].side, EntrySide::Credit);
        assert_eq!(entry.lines[0].amount, dec("25.00"));

        let updated = storage
            .get_reconciliation(&reconciliation.id)
            .await
            .unwrap()
            .unwrap();
        // movement -25.00 minus the -25.00 adjustment
        assert!(updated.is_balanced());
    }

    #[tokio::test]
    async fn interest_posts_debit_bank_credit_revenue() {
        let (storage, reconciliation) = fixture().await;
        let (mut adjustments, journal) = ledger(storage);

        let adjustment = adjustments
            .create_adjustment(
                &reconciliation.id,
                AdjustmentParams {
                    adjustment_type: AdjustmentType::Interest,
                    amount: dec("3.17"),
                    description: "Interest earned".into(),
                    statement_line_id: None,
                    post_to_ledger: true,
                },
                "user-1",
            )
            .await
            .unwrap();

        let entry = journal
            .entry(adjustment.journal_entry_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(entry.lines[0].account_id, "bank-acct");
        assert_eq!(entry.lines[0].side, EntrySide::Debit);
        assert_eq!(entry.lines[1].account_id, "revenue-interest");
        assert_eq!(entry.lines[1].side, EntrySide::Credit);
    }

    #[tokio::test]
    async fn wrong_polarity_is_rejected_not_flipped() {
        let (storage, reconciliation) = fixture().await;
        let (mut adjustments, journal) = ledger(storage.clone());

        let err = adjustments
            .create_adjustment(
                &reconciliation.id,
                AdjustmentParams {
                    adjustment_type: AdjustmentType::BankFee,
                    amount: dec("25.00"),
                    description: "Positive fee".into(),
                    statement_line_id: None,
                    post_to_ledger: true,
                },
                "user-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidAdjustmentSign(_)));
        assert_eq!(journal.posted_count(), 0);
        assert!(storage
            .get_adjustments(&reconciliation.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn update_reverses_and_reposts_the_journal_entry() {
        let (storage, reconciliation) = fixture().await;
        let (mut adjustments, journal) = ledger(storage);

        let adjustment = adjustments
            .create_adjustment(
                &reconciliation.id,
                AdjustmentParams {
                    adjustment_type: AdjustmentType::BankFee,
                    amount: dec("-20.00"),
                    description: "Service charge".into(),
                    statement_line_id: None,
                    post_to_ledger: true,
                },
                "user-1",
            )
            .await
            .unwrap();
        let first_entry_id = adjustment.journal_entry_id.clone().unwrap();

        let updated = adjustments
            .update_adjustment(
                &adjustment.id,
                dec("-25.00"),
                "Service charge, corrected".into(),
                "user-1",
            )
            .await
            .unwrap();

        assert!(journal.entry(&first_entry_id).unwrap().reversed);
        let new_entry_id = updated.journal_entry_id.unwrap();
        assert_ne!(new_entry_id, first_entry_id);
        assert_eq!(
            journal.entry(&new_entry_id).unwrap().lines[0].amount,
            dec("25.00")
        );
    }

    #[tokio::test]
    async fn delete_reverses_the_posting_and_restores_variance() {
        let (storage, reconciliation) = fixture().await;
        let (mut adjustments, journal) = ledger(storage.clone());

        let adjustment = adjustments
            .create_adjustment(
                &reconciliation.id,
                AdjustmentParams {
                    adjustment_type: AdjustmentType::BankFee,
                    amount: dec("-25.00"),
                    description: "Service charge".into(),
                    statement_line_id: None,
                    post_to_ledger: true,
                },
                "user-1",
            )
            .await
            .unwrap();

        adjustments
            .delete_adjustment(&adjustment.id, "user-1")
            .await
            .unwrap();
        assert!(journal
            .entry(adjustment.journal_entry_id.as_deref().unwrap())
            .unwrap()
            .reversed);

        let updated = storage
            .get_reconciliation(&reconciliation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.variance, dec("-25.00"));
    }

    #[tokio::test]
    async fn adjustments_are_refused_on_non_editable_sessions() {
        let (mut storage, reconciliation) = fixture().await;
        storage
            .swap_status(
                &reconciliation.id,
                &[ReconciliationStatus::InProgress],
                ReconciliationStatus::Locked,
            )
            .await
            .unwrap();

        let (mut adjustments, _) = ledger(storage);
        let err = adjustments
            .create_adjustment(
                &reconciliation.id,
                AdjustmentParams {
                    adjustment_type: AdjustmentType::BankFee,
                    amount: dec("-25.00"),
                    description: "Too late".into(),
                    statement_line_id: None,
                    post_to_ledger: false,
                },
                "user-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::ReconciliationNotEditable(ReconciliationStatus::Locked)
        ));
    }
}

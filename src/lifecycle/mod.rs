//! Reconciliation session lifecycle
//!
//! Owns every status transition: `InProgress -> Completed -> Locked ->
//! Reopened`, with `Reopened` editable again. Transitions go through the
//! storage compare-and-swap so two users racing the same transition cannot
//! both win, and variance is always re-derived from persisted match and
//! adjustment sums rather than trusting the cached column.

use std::collections::HashMap;
use tracing::info;

use crate::traits::{ReconciliationStorage, StatusSwap};
use crate::types::*;
use crate::utils::validation;

/// Drives reconciliation sessions through their lifecycle
pub struct ReconciliationLifecycle<S: ReconciliationStorage> {
    storage: S,
}

impl<S: ReconciliationStorage> ReconciliationLifecycle<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Start a reconciliation session over a normalized statement.
    ///
    /// Idempotent: if a session already exists for the statement it is
    /// returned as-is instead of creating a second one.
    pub async fn start(
        &mut self,
        statement_id: &str,
        started_by: &str,
    ) -> ReconcileResult<BankReconciliation> {
        let statement = self
            .storage
            .get_statement(statement_id)
            .await?
            .ok_or_else(|| ReconcileError::StatementNotFound(statement_id.to_string()))?;
        if statement.status != StatementStatus::Normalized {
            return Err(ReconcileError::Validation(format!(
                "Statement {statement_id} is not normalized (status: {:?})",
                statement.status
            )));
        }

        if let Some(existing) = self
            .storage
            .get_reconciliation_for_statement(statement_id)
            .await?
        {
            return Ok(existing);
        }

        let reconciliation = BankReconciliation::new(&statement, started_by.to_string());
        self.storage.save_reconciliation(&reconciliation).await?;
        info!(
            reconciliation_id = %reconciliation.id,
            statement_id,
            variance = %reconciliation.variance,
            "reconciliation started"
        );
        Ok(reconciliation)
    }

    /// Re-derive the variance from persisted sums and store it.
    ///
    /// variance = (closing - opening) - sum(matches) - sum(adjustments)
    pub async fn recalculate(
        &mut self,
        reconciliation_id: &str,
    ) -> ReconcileResult<BankReconciliation> {
        let mut reconciliation = self.get(reconciliation_id).await?;
        let matched = self.storage.sum_matched_amount(reconciliation_id).await?;
        let adjusted = self
            .storage
            .sum_adjustment_amount(reconciliation_id)
            .await?;
        reconciliation.variance =
            &reconciliation.closing_balance - &reconciliation.opening_balance - matched - adjusted;
        self.storage.update_reconciliation(&reconciliation).await?;
        Ok(reconciliation)
    }

    /// Complete a balanced reconciliation.
    ///
    /// The variance gate uses a freshly recalculated value, and the status
    /// flip is a compare-and-swap: of any number of concurrent callers
    /// exactly one observes the transition, the rest get `NotInProgress`.
    pub async fn complete(
        &mut self,
        reconciliation_id: &str,
        completed_by: &str,
    ) -> ReconcileResult<BankReconciliation> {
        let reconciliation = self.recalculate(reconciliation_id).await?;
        if !reconciliation.is_balanced() {
            return Err(ReconcileError::NonZeroVariance(reconciliation.variance));
        }

        let swap = self
            .storage
            .swap_status(
                reconciliation_id,
                &[
                    ReconciliationStatus::InProgress,
                    ReconciliationStatus::Reopened,
                ],
                ReconciliationStatus::Completed,
            )
            .await?;
        let (mut updated, from) = match swap {
            StatusSwap::Applied(updated) => {
                let from = reconciliation.status;
                (updated, from)
            }
            StatusSwap::Conflict(status) => return Err(ReconcileError::NotInProgress(status)),
        };

        updated.completed_by = Some(completed_by.to_string());
        updated.completed_at = Some(chrono::Utc::now().naive_utc());
        self.storage.update_reconciliation(&updated).await?;
        self.record_transition(&updated, from, ReconciliationStatus::Completed, completed_by)
            .await?;
        info!(reconciliation_id, completed_by, "reconciliation completed");
        Ok(updated)
    }

    /// Lock a completed reconciliation against further changes
    pub async fn lock(
        &mut self,
        reconciliation_id: &str,
        locked_by: &str,
    ) -> ReconcileResult<BankReconciliation> {
        let swap = self
            .storage
            .swap_status(
                reconciliation_id,
                &[ReconciliationStatus::Completed],
                ReconciliationStatus::Locked,
            )
            .await?;
        let mut updated = match swap {
            StatusSwap::Applied(updated) => updated,
            StatusSwap::Conflict(status) => return Err(ReconcileError::NotCompleted(status)),
        };

        updated.locked_at = Some(chrono::Utc::now().naive_utc());
        self.storage.update_reconciliation(&updated).await?;
        self.record_transition(
            &updated,
            ReconciliationStatus::Completed,
            ReconciliationStatus::Locked,
            locked_by,
        )
        .await?;
        info!(reconciliation_id, locked_by, "reconciliation locked");
        Ok(updated)
    }

    /// Reopen a locked reconciliation for rework. A non-empty reason is
    /// required and gets appended to the session notes.
    pub async fn reopen(
        &mut self,
        reconciliation_id: &str,
        reopened_by: &str,
        reason: &str,
    ) -> ReconcileResult<BankReconciliation> {
        validation::validate_reopen_reason(reason)?;

        let swap = self
            .storage
            .swap_status(
                reconciliation_id,
                &[ReconciliationStatus::Locked],
                ReconciliationStatus::Reopened,
            )
            .await?;
        let mut updated = match swap {
            StatusSwap::Applied(updated) => updated,
            StatusSwap::Conflict(status) => return Err(ReconcileError::NotLocked(status)),
        };

        if !updated.notes.is_empty() {
            updated.notes.push('\n');
        }
        updated
            .notes
            .push_str(&format!("Reopened by {reopened_by}: {}", reason.trim()));
        // Completion history stays on the record; only the lock is undone
        updated.locked_at = None;
        self.storage.update_reconciliation(&updated).await?;

        let mut details = HashMap::new();
        details.insert("reason".to_string(), reason.trim().to_string());
        self.storage
            .record_activity(&ActivityRecord::new(
                reconciliation_id.to_string(),
                ActivityAction::StatusChanged {
                    from: ReconciliationStatus::Locked,
                    to: ReconciliationStatus::Reopened,
                },
                reopened_by.to_string(),
                format!("Reopened: {}", reason.trim()),
                details,
            ))
            .await?;
        info!(reconciliation_id, reopened_by, "reconciliation reopened");
        Ok(updated)
    }

    pub async fn get(&self, reconciliation_id: &str) -> ReconcileResult<BankReconciliation> {
        self.storage
            .get_reconciliation(reconciliation_id)
            .await?
            .ok_or_else(|| ReconcileError::ReconciliationNotFound(reconciliation_id.to_string()))
    }

    /// Guard shared by the match and adjustment engines: the session must
    /// still be editable for its contents to change
    pub async fn require_editable(
        &self,
        reconciliation_id: &str,
    ) -> ReconcileResult<BankReconciliation> {
        let reconciliation = self.get(reconciliation_id).await?;
        if !reconciliation.can_be_edited() {
            return Err(ReconcileError::ReconciliationNotEditable(
                reconciliation.status,
            ));
        }
        Ok(reconciliation)
    }

    async fn record_transition(
        &mut self,
        reconciliation: &BankReconciliation,
        from: ReconciliationStatus,
        to: ReconciliationStatus,
        actor: &str,
    ) -> ReconcileResult<()> {
        let mut details = HashMap::new();
        details.insert("variance".to_string(), reconciliation.variance.to_string());
        self.storage
            .record_activity(&ActivityRecord::new(
                reconciliation.id.clone(),
                ActivityAction::StatusChanged { from, to },
                actor.to_string(),
                format!("Status changed from {from} to {to}"),
                details,
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use crate::statement::{ImportParams, StatementImporter};
    use crate::utils::memory_storage::MemoryStorage;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn normalized_statement(storage: MemoryStorage) -> BankStatement {
        let mut importer = StatementImporter::new(storage);
        let statement = importer
            .import(ImportParams {
                company_id: "co-1".into(),
                bank_account_id: "acct-1".into(),
                format: StatementFormat::Csv,
                file_name: "jan.csv".into(),
                content: "Date,Description,Amount\n\
                          2024-01-03,Customer deposit,200.00\n\
                          2024-01-20,ATM withdrawal,-25.00\n"
                    .into(),
                period_start: date(2024, 1, 1),
                period_end: date(2024, 1, 31),
                opening_balance: dec("1000.00"),
                closing_balance: dec("1175.00"),
                currency: "USD".into(),
                imported_by: "user-1".into(),
            })
            .await
            .unwrap();
        importer.normalize(&statement.id).await.unwrap();
        statement
    }

    async fn insert_match_row(
        storage: &mut MemoryStorage,
        reconciliation_id: &str,
        amount: &str,
    ) {
        let m = ReconciliationMatch::manual(
            reconciliation_id.to_string(),
            uuid::Uuid::new_v4().to_string(),
            SourceType::Payment,
            uuid::Uuid::new_v4().to_string(),
            dec(amount),
            "user-1".into(),
        );
        storage.insert_match(&m).await.unwrap();
    }

    #[tokio::test]
    async fn start_requires_a_normalized_statement() {
        let storage = MemoryStorage::new();
        let mut lifecycle = ReconciliationLifecycle::new(storage.clone());

        let err = lifecycle.start("missing", "user-1").await.unwrap_err();
        assert!(matches!(err, ReconcileError::StatementNotFound(_)));

        let statement = normalized_statement(storage).await;
        let reconciliation = lifecycle.start(&statement.id, "user-1").await.unwrap();
        assert_eq!(reconciliation.status, ReconciliationStatus::InProgress);
        assert_eq!(reconciliation.variance, dec("175.00"));

        // Starting again returns the same session
        let again = lifecycle.start(&statement.id, "user-2").await.unwrap();
        assert_eq!(again.id, reconciliation.id);
    }

    #[tokio::test]
    async fn complete_is_gated_on_zero_variance() {
        let mut storage = MemoryStorage::new();
        let statement = normalized_statement(storage.clone()).await;
        let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
        let reconciliation = lifecycle.start(&statement.id, "user-1").await.unwrap();

        let err = lifecycle
            .complete(&reconciliation.id, "user-1")
            .await
            .unwrap_err();
        match err {
            ReconcileError::NonZeroVariance(v) => assert_eq!(v, dec("175.00")),
            other => panic!("unexpected error: {other}"),
        }

        insert_match_row(&mut storage, &reconciliation.id, "200.00").await;
        insert_match_row(&mut storage, &reconciliation.id, "-25.00").await;

        let completed = lifecycle
            .complete(&reconciliation.id, "user-1")
            .await
            .unwrap();
        assert_eq!(completed.status, ReconciliationStatus::Completed);
        assert_eq!(completed.completed_by.as_deref(), Some("user-1"));
        assert!(completed.completed_at.is_some());
        assert!(completed.is_balanced());
    }

    #[tokio::test]
    async fn second_complete_sees_not_in_progress() {
        let mut storage = MemoryStorage::new();
        let statement = normalized_statement(storage.clone()).await;
        let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
        let reconciliation = lifecycle.start(&statement.id, "user-1").await.unwrap();
        insert_match_row(&mut storage, &reconciliation.id, "175.00").await;

        lifecycle.complete(&reconciliation.id, "user-1").await.unwrap();
        let err = lifecycle
            .complete(&reconciliation.id, "user-2")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::NotInProgress(ReconciliationStatus::Completed)
        ));
    }

    #[tokio::test]
    async fn lock_requires_completed() {
        let mut storage = MemoryStorage::new();
        let statement = normalized_statement(storage.clone()).await;
        let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
        let reconciliation = lifecycle.start(&statement.id, "user-1").await.unwrap();

        let err = lifecycle.lock(&reconciliation.id, "user-1").await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::NotCompleted(ReconciliationStatus::InProgress)
        ));

        insert_match_row(&mut storage, &reconciliation.id, "175.00").await;
        lifecycle.complete(&reconciliation.id, "user-1").await.unwrap();
        let locked = lifecycle.lock(&reconciliation.id, "user-1").await.unwrap();
        assert_eq!(locked.status, ReconciliationStatus::Locked);
        assert!(locked.locked_at.is_some());
    }

    #[tokio::test]
    async fn reopen_requires_a_locked_session() {
        let storage = MemoryStorage::new();
        let statement = normalized_statement(storage.clone()).await;
        let mut lifecycle = ReconciliationLifecycle::new(storage);
        let reconciliation = lifecycle.start(&statement.id, "user-1").await.unwrap();

        let err = lifecycle
            .reopen(&reconciliation.id, "user-2", "Recheck fees")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::NotLocked(ReconciliationStatus::InProgress)
        ));
    }

    #[tokio::test]
    async fn reopen_requires_a_reason_and_appends_it_to_notes() {
        let mut storage = MemoryStorage::new();
        let statement = normalized_statement(storage.clone()).await;
        let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
        let reconciliation = lifecycle.start(&statement.id, "user-1").await.unwrap();
        insert_match_row(&mut storage, &reconciliation.id, "175.00").await;
        lifecycle.complete(&reconciliation.id, "user-1").await.unwrap();
        lifecycle.lock(&reconciliation.id, "user-1").await.unwrap();

        let err = lifecycle
            .reopen(&reconciliation.id, "user-2", "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ReasonRequired));

        let reopened = lifecycle
            .reopen(&reconciliation.id, "user-2", "Bank issued a correction")
            .await
            .unwrap();
        assert_eq!(reopened.status, ReconciliationStatus::Reopened);
        assert!(reopened.can_be_edited());
        assert!(reopened.notes.contains("Bank issued a correction"));
        // Completion history survives the reopen; only the lock is undone
        assert!(reopened.completed_at.is_some());
        assert!(reopened.locked_at.is_none());
    }

    #[tokio::test]
    async fn transitions_land_in_the_audit_trail() {
        let mut storage = MemoryStorage::new();
        let statement = normalized_statement(storage.clone()).await;
        let mut lifecycle = ReconciliationLifecycle::new(storage.clone());
        let reconciliation = lifecycle.start(&statement.id, "user-1").await.unwrap();
        insert_match_row(&mut storage, &reconciliation.id, "175.00").await;
        lifecycle.complete(&reconciliation.id, "user-1").await.unwrap();
        lifecycle.lock(&reconciliation.id, "user-1").await.unwrap();
        lifecycle
            .reopen(&reconciliation.id, "user-2", "Recheck fees")
            .await
            .unwrap();

        let activities = storage.get_activities(&reconciliation.id).await.unwrap();
        let transitions: Vec<_> = activities
            .iter()
            .filter_map(|a| match &a.action {
                ActivityAction::StatusChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (
                    ReconciliationStatus::InProgress,
                    ReconciliationStatus::Completed
                ),
                (
                    ReconciliationStatus::Completed,
                    ReconciliationStatus::Locked
                ),
                (ReconciliationStatus::Locked, ReconciliationStatus::Reopened),
            ]
        );
    }
}

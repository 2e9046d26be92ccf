//! Traits for storage abstraction and external collaborators
//!
//! Every method takes tenant scope as an explicit `company_id` argument
//! where it matters; nothing in this crate relies on ambient state for
//! tenant isolation.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::types::*;

/// Outcome of an atomic status compare-and-swap
#[derive(Debug, Clone, PartialEq)]
pub enum StatusSwap {
    /// The transition was applied; carries the updated reconciliation
    Applied(BankReconciliation),
    /// The row was not in any of the expected statuses; carries what it was
    Conflict(ReconciliationStatus),
}

/// Storage abstraction for the reconciliation system
///
/// This trait allows the reconciliation core to work with any storage
/// backend (PostgreSQL, MySQL, SQLite, in-memory, etc.) by implementing
/// these methods.
///
/// Aggregate sums must be re-derived from current rows on every call;
/// implementations must never return an incrementally-patched cached value,
/// since variance recalculation depends on reading through to persisted
/// state under concurrent mutation.
#[async_trait]
pub trait ReconciliationStorage: Send + Sync {
    // Statements

    /// Save a newly imported statement
    async fn save_statement(&mut self, statement: &BankStatement) -> ReconcileResult<()>;

    /// Get a statement by ID (soft-deleted statements excluded)
    async fn get_statement(&self, statement_id: &str) -> ReconcileResult<Option<BankStatement>>;

    /// Update a statement (status/failure_reason during normalization)
    async fn update_statement(&mut self, statement: &BankStatement) -> ReconcileResult<()>;

    /// Tombstone a statement; it no longer participates in dedup lookups
    async fn soft_delete_statement(&mut self, statement_id: &str) -> ReconcileResult<()>;

    /// Persist the raw uploaded file content alongside the statement row
    async fn save_statement_content(
        &mut self,
        statement_id: &str,
        content: &str,
    ) -> ReconcileResult<()>;

    /// Raw file content, needed for (re-)normalization
    async fn get_statement_content(&self, statement_id: &str) -> ReconcileResult<Option<String>>;

    /// Find a non-deleted statement for the same company and bank account
    /// whose period overlaps the given range, or whose UID matches
    async fn find_duplicate_statement(
        &self,
        company_id: &str,
        bank_account_id: &str,
        statement_uid: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> ReconcileResult<Option<BankStatement>>;

    // Statement lines

    /// Bulk-insert normalized lines
    async fn insert_lines(&mut self, lines: &[BankStatementLine]) -> ReconcileResult<()>;

    /// Remove all lines for a statement (idempotent re-normalization)
    async fn delete_statement_lines(&mut self, statement_id: &str) -> ReconcileResult<()>;

    /// List a statement's lines ordered by line number
    async fn get_statement_lines(
        &self,
        statement_id: &str,
    ) -> ReconcileResult<Vec<BankStatementLine>>;

    /// Get a single statement line by ID
    async fn get_line(&self, line_id: &str) -> ReconcileResult<Option<BankStatementLine>>;

    /// Flip the matched flag on a line
    async fn mark_line_matched(&mut self, line_id: &str, matched: bool) -> ReconcileResult<()>;

    // Reconciliations

    async fn save_reconciliation(
        &mut self,
        reconciliation: &BankReconciliation,
    ) -> ReconcileResult<()>;

    async fn get_reconciliation(
        &self,
        reconciliation_id: &str,
    ) -> ReconcileResult<Option<BankReconciliation>>;

    /// Find the reconciliation session for a statement, if one was started
    async fn get_reconciliation_for_statement(
        &self,
        statement_id: &str,
    ) -> ReconcileResult<Option<BankReconciliation>>;

    /// Update non-status reconciliation fields (variance, notes, actors)
    async fn update_reconciliation(
        &mut self,
        reconciliation: &BankReconciliation,
    ) -> ReconcileResult<()>;

    /// Atomically transition status if the row is currently in one of
    /// `expected` (the `UPDATE ... WHERE status = ?` idiom). Concurrent
    /// callers racing the same transition must observe exactly one
    /// `Applied`; everyone else gets `Conflict` with the current status.
    async fn swap_status(
        &mut self,
        reconciliation_id: &str,
        expected: &[ReconciliationStatus],
        new: ReconciliationStatus,
    ) -> ReconcileResult<StatusSwap>;

    // Matches

    async fn insert_match(&mut self, m: &ReconciliationMatch) -> ReconcileResult<()>;

    async fn get_match(&self, match_id: &str) -> ReconcileResult<Option<ReconciliationMatch>>;

    async fn delete_match(&mut self, match_id: &str) -> ReconcileResult<()>;

    /// List all matches for a reconciliation
    async fn get_matches(
        &self,
        reconciliation_id: &str,
    ) -> ReconcileResult<Vec<ReconciliationMatch>>;

    /// The at-most-one active match referencing a statement line
    async fn get_match_for_line(
        &self,
        statement_line_id: &str,
    ) -> ReconcileResult<Option<ReconciliationMatch>>;

    /// Sum of matched amounts, re-derived from current rows
    async fn sum_matched_amount(&self, reconciliation_id: &str) -> ReconcileResult<BigDecimal>;

    // Adjustments

    async fn insert_adjustment(
        &mut self,
        adjustment: &ReconciliationAdjustment,
    ) -> ReconcileResult<()>;

    async fn get_adjustment(
        &self,
        adjustment_id: &str,
    ) -> ReconcileResult<Option<ReconciliationAdjustment>>;

    async fn update_adjustment(
        &mut self,
        adjustment: &ReconciliationAdjustment,
    ) -> ReconcileResult<()>;

    async fn delete_adjustment(&mut self, adjustment_id: &str) -> ReconcileResult<()>;

    /// List all adjustments for a reconciliation
    async fn get_adjustments(
        &self,
        reconciliation_id: &str,
    ) -> ReconcileResult<Vec<ReconciliationAdjustment>>;

    /// Sum of adjustment amounts, re-derived from current rows
    async fn sum_adjustment_amount(&self, reconciliation_id: &str) -> ReconcileResult<BigDecimal>;

    // Audit trail

    async fn record_activity(&mut self, activity: &ActivityRecord) -> ReconcileResult<()>;

    /// List a reconciliation's activities in chronological order
    async fn get_activities(&self, reconciliation_id: &str)
        -> ReconcileResult<Vec<ActivityRecord>>;
}

/// Company/tenant context resolver
///
/// Provided by the surrounding user-management system: given a user, return
/// their active company and capabilities.
#[async_trait]
pub trait CompanyContextResolver: Send + Sync {
    async fn resolve_context(&self, user_id: &str) -> ReconcileResult<CompanyContext>;
}

/// Ledger-account lookup for adjustment journal postings
///
/// Resolves the configured offset account (expense, revenue, or clearing)
/// for a company and adjustment type; the bank side of the entry is always
/// the reconciliation's own ledger account.
#[async_trait]
pub trait LedgerAccountLookup: Send + Sync {
    async fn offset_account(
        &self,
        company_id: &str,
        adjustment_type: AdjustmentType,
    ) -> ReconcileResult<String>;
}

/// Query interface over internal financial records (payments, invoices,
/// journal entries, bill payments) used as matching candidates
#[async_trait]
pub trait TransactionQuery: Send + Sync {
    /// Candidates for the given company whose amount magnitude equals
    /// `amount` and whose date falls within `[from, to]`
    async fn find_candidates(
        &self,
        company_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        amount: &BigDecimal,
    ) -> ReconcileResult<Vec<SourceRecord>>;

    /// Fetch one source record for manual-match validation
    async fn get_source(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> ReconcileResult<Option<SourceRecord>>;
}

/// Journal-entry writer for adjustment postings
#[async_trait]
pub trait JournalEntryWriter: Send + Sync {
    /// Persist a balanced journal entry and return its id
    async fn post_journal_entry(
        &mut self,
        company_id: &str,
        date: NaiveDate,
        description: &str,
        reference: &str,
        lines: &[JournalLine],
    ) -> ReconcileResult<String>;

    /// Reverse a previously posted entry (adjustment deleted or reduced)
    async fn reverse_journal_entry(
        &mut self,
        company_id: &str,
        journal_entry_id: &str,
    ) -> ReconcileResult<()>;
}

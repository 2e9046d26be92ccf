//! In-memory storage implementation for testing

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct Tables {
    statements: HashMap<String, BankStatement>,
    contents: HashMap<String, String>,
    lines: HashMap<String, BankStatementLine>,
    reconciliations: HashMap<String, BankReconciliation>,
    matches: HashMap<String, ReconciliationMatch>,
    adjustments: HashMap<String, ReconciliationAdjustment>,
    activities: Vec<ActivityRecord>,
}

/// In-memory storage implementation for testing and development
///
/// Cloning shares the underlying tables, so handles given to different
/// engines observe each other's writes. All tables live behind one lock,
/// which is what makes `swap_status` atomic.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        let mut tables = self.tables.write().unwrap();
        *tables = Tables::default();
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReconciliationStorage for MemoryStorage {
    async fn save_statement(&mut self, statement: &BankStatement) -> ReconcileResult<()> {
        self.tables
            .write()
            .unwrap()
            .statements
            .insert(statement.id.clone(), statement.clone());
        Ok(())
    }

    async fn get_statement(&self, statement_id: &str) -> ReconcileResult<Option<BankStatement>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .statements
            .get(statement_id)
            .filter(|s| s.deleted_at.is_none())
            .cloned())
    }

    async fn update_statement(&mut self, statement: &BankStatement) -> ReconcileResult<()> {
        let mut tables = self.tables.write().unwrap();
        if tables.statements.contains_key(&statement.id) {
            tables
                .statements
                .insert(statement.id.clone(), statement.clone());
            Ok(())
        } else {
            Err(ReconcileError::StatementNotFound(statement.id.clone()))
        }
    }

    async fn soft_delete_statement(&mut self, statement_id: &str) -> ReconcileResult<()> {
        let mut tables = self.tables.write().unwrap();
        match tables.statements.get_mut(statement_id) {
            Some(statement) => {
                statement.deleted_at = Some(chrono::Utc::now().naive_utc());
                Ok(())
            }
            None => Err(ReconcileError::StatementNotFound(statement_id.to_string())),
        }
    }

    async fn save_statement_content(
        &mut self,
        statement_id: &str,
        content: &str,
    ) -> ReconcileResult<()> {
        self.tables
            .write()
            .unwrap()
            .contents
            .insert(statement_id.to_string(), content.to_string());
        Ok(())
    }

    async fn get_statement_content(&self, statement_id: &str) -> ReconcileResult<Option<String>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .contents
            .get(statement_id)
            .cloned())
    }

    async fn find_duplicate_statement(
        &self,
        company_id: &str,
        bank_account_id: &str,
        statement_uid: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> ReconcileResult<Option<BankStatement>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .statements
            .values()
            .find(|s| {
                s.deleted_at.is_none()
                    && s.company_id == company_id
                    && s.bank_account_id == bank_account_id
                    && (s.statement_uid == statement_uid
                        || s.period_overlaps(period_start, period_end))
            })
            .cloned())
    }

    async fn insert_lines(&mut self, lines: &[BankStatementLine]) -> ReconcileResult<()> {
        let mut tables = self.tables.write().unwrap();
        for line in lines {
            tables.lines.insert(line.id.clone(), line.clone());
        }
        Ok(())
    }

    async fn delete_statement_lines(&mut self, statement_id: &str) -> ReconcileResult<()> {
        self.tables
            .write()
            .unwrap()
            .lines
            .retain(|_, line| line.statement_id != statement_id);
        Ok(())
    }

    async fn get_statement_lines(
        &self,
        statement_id: &str,
    ) -> ReconcileResult<Vec<BankStatementLine>> {
        let mut lines: Vec<BankStatementLine> = self
            .tables
            .read()
            .unwrap()
            .lines
            .values()
            .filter(|line| line.statement_id == statement_id)
            .cloned()
            .collect();
        lines.sort_by_key(|line| line.line_number);
        Ok(lines)
    }

    async fn get_line(&self, line_id: &str) -> ReconcileResult<Option<BankStatementLine>> {
        Ok(self.tables.read().unwrap().lines.get(line_id).cloned())
    }

    async fn mark_line_matched(&mut self, line_id: &str, matched: bool) -> ReconcileResult<()> {
        let mut tables = self.tables.write().unwrap();
        match tables.lines.get_mut(line_id) {
            Some(line) => {
                line.matched = matched;
                Ok(())
            }
            None => Err(ReconcileError::Storage(format!(
                "Statement line not found: {line_id}"
            ))),
        }
    }

    async fn save_reconciliation(
        &mut self,
        reconciliation: &BankReconciliation,
    ) -> ReconcileResult<()> {
        self.tables
            .write()
            .unwrap()
            .reconciliations
            .insert(reconciliation.id.clone(), reconciliation.clone());
        Ok(())
    }

    async fn get_reconciliation(
        &self,
        reconciliation_id: &str,
    ) -> ReconcileResult<Option<BankReconciliation>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .reconciliations
            .get(reconciliation_id)
            .cloned())
    }

    async fn get_reconciliation_for_statement(
        &self,
        statement_id: &str,
    ) -> ReconcileResult<Option<BankReconciliation>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .reconciliations
            .values()
            .find(|r| r.statement_id == statement_id)
            .cloned())
    }

    async fn update_reconciliation(
        &mut self,
        reconciliation: &BankReconciliation,
    ) -> ReconcileResult<()> {
        let mut tables = self.tables.write().unwrap();
        match tables.reconciliations.get_mut(&reconciliation.id) {
            Some(stored) => {
                // Status is owned by swap_status; keep the stored value so a
                // stale in-memory copy cannot clobber a concurrent transition
                let status = stored.status;
                *stored = reconciliation.clone();
                stored.status = status;
                Ok(())
            }
            None => Err(ReconcileError::ReconciliationNotFound(
                reconciliation.id.clone(),
            )),
        }
    }

    async fn swap_status(
        &mut self,
        reconciliation_id: &str,
        expected: &[ReconciliationStatus],
        new: ReconciliationStatus,
    ) -> ReconcileResult<StatusSwap> {
        let mut tables = self.tables.write().unwrap();
        match tables.reconciliations.get_mut(reconciliation_id) {
            Some(stored) => {
                if expected.contains(&stored.status) {
                    stored.status = new;
                    Ok(StatusSwap::Applied(stored.clone()))
                } else {
                    Ok(StatusSwap::Conflict(stored.status))
                }
            }
            None => Err(ReconcileError::ReconciliationNotFound(
                reconciliation_id.to_string(),
            )),
        }
    }

    async fn insert_match(&mut self, m: &ReconciliationMatch) -> ReconcileResult<()> {
        self.tables
            .write()
            .unwrap()
            .matches
            .insert(m.id.clone(), m.clone());
        Ok(())
    }

    async fn get_match(&self, match_id: &str) -> ReconcileResult<Option<ReconciliationMatch>> {
        Ok(self.tables.read().unwrap().matches.get(match_id).cloned())
    }

    async fn delete_match(&mut self, match_id: &str) -> ReconcileResult<()> {
        match self.tables.write().unwrap().matches.remove(match_id) {
            Some(_) => Ok(()),
            None => Err(ReconcileError::MatchNotFound(match_id.to_string())),
        }
    }

    async fn get_matches(
        &self,
        reconciliation_id: &str,
    ) -> ReconcileResult<Vec<ReconciliationMatch>> {
        let mut matches: Vec<ReconciliationMatch> = self
            .tables
            .read()
            .unwrap()
            .matches
            .values()
            .filter(|m| m.reconciliation_id == reconciliation_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.matched_at.cmp(&b.matched_at).then(a.id.cmp(&b.id)));
        Ok(matches)
    }

    async fn get_match_for_line(
        &self,
        statement_line_id: &str,
    ) -> ReconcileResult<Option<ReconciliationMatch>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .matches
            .values()
            .find(|m| m.statement_line_id == statement_line_id)
            .cloned())
    }

    async fn sum_matched_amount(&self, reconciliation_id: &str) -> ReconcileResult<BigDecimal> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .matches
            .values()
            .filter(|m| m.reconciliation_id == reconciliation_id)
            .fold(BigDecimal::from(0), |acc, m| acc + &m.amount))
    }

    async fn insert_adjustment(
        &mut self,
        adjustment: &ReconciliationAdjustment,
    ) -> ReconcileResult<()> {
        self.tables
            .write()
            .unwrap()
            .adjustments
            .insert(adjustment.id.clone(), adjustment.clone());
        Ok(())
    }

    async fn get_adjustment(
        &self,
        adjustment_id: &str,
    ) -> ReconcileResult<Option<ReconciliationAdjustment>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .adjustments
            .get(adjustment_id)
            .cloned())
    }

    async fn update_adjustment(
        &mut self,
        adjustment: &ReconciliationAdjustment,
    ) -> ReconcileResult<()> {
        let mut tables = self.tables.write().unwrap();
        if tables.adjustments.contains_key(&adjustment.id) {
            tables
                .adjustments
                .insert(adjustment.id.clone(), adjustment.clone());
            Ok(())
        } else {
            Err(ReconcileError::AdjustmentNotFound(adjustment.id.clone()))
        }
    }

    async fn delete_adjustment(&mut self, adjustment_id: &str) -> ReconcileResult<()> {
        match self
            .tables
            .write()
            .unwrap()
            .adjustments
            .remove(adjustment_id)
        {
            Some(_) => Ok(()),
            None => Err(ReconcileError::AdjustmentNotFound(
                adjustment_id.to_string(),
            )),
        }
    }

    async fn get_adjustments(
        &self,
        reconciliation_id: &str,
    ) -> ReconcileResult<Vec<ReconciliationAdjustment>> {
        let mut adjustments: Vec<ReconciliationAdjustment> = self
            .tables
            .read()
            .unwrap()
            .adjustments
            .values()
            .filter(|a| a.reconciliation_id == reconciliation_id)
            .cloned()
            .collect();
        adjustments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(adjustments)
    }

    async fn sum_adjustment_amount(&self, reconciliation_id: &str) -> ReconcileResult<BigDecimal> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .adjustments
            .values()
            .filter(|a| a.reconciliation_id == reconciliation_id)
            .fold(BigDecimal::from(0), |acc, a| acc + &a.amount))
    }

    async fn record_activity(&mut self, activity: &ActivityRecord) -> ReconcileResult<()> {
        self.tables
            .write()
            .unwrap()
            .activities
            .push(activity.clone());
        Ok(())
    }

    async fn get_activities(
        &self,
        reconciliation_id: &str,
    ) -> ReconcileResult<Vec<ActivityRecord>> {
        // Insertion order is chronological; occurred_at timestamps can tie
        // within one millisecond
        Ok(self
            .tables
            .read()
            .unwrap()
            .activities
            .iter()
            .filter(|a| a.reconciliation_id == reconciliation_id)
            .cloned()
            .collect())
    }
}

/// Static tenant-context resolver for tests and examples
#[derive(Debug, Clone)]
pub struct StaticContextResolver {
    contexts: Arc<RwLock<HashMap<String, CompanyContext>>>,
}

impl StaticContextResolver {
    pub fn new() -> Self {
        Self {
            contexts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn grant(&self, context: CompanyContext) {
        self.contexts
            .write()
            .unwrap()
            .insert(context.user_id.clone(), context);
    }
}

impl Default for StaticContextResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompanyContextResolver for StaticContextResolver {
    async fn resolve_context(&self, user_id: &str) -> ReconcileResult<CompanyContext> {
        self.contexts
            .read()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| {
                ReconcileError::PermissionDenied(format!("unknown user: {user_id}"))
            })
    }
}

/// Static offset-account lookup: one configured account per adjustment type
#[derive(Debug, Clone)]
pub struct StaticAccountLookup {
    accounts: Arc<RwLock<HashMap<(String, AdjustmentType), String>>>,
}

impl StaticAccountLookup {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn configure(&self, company_id: &str, adjustment_type: AdjustmentType, account_id: &str) {
        self.accounts.write().unwrap().insert(
            (company_id.to_string(), adjustment_type),
            account_id.to_string(),
        );
    }
}

impl Default for StaticAccountLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerAccountLookup for StaticAccountLookup {
    async fn offset_account(
        &self,
        company_id: &str,
        adjustment_type: AdjustmentType,
    ) -> ReconcileResult<String> {
        self.accounts
            .read()
            .unwrap()
            .get(&(company_id.to_string(), adjustment_type))
            .cloned()
            .ok_or_else(|| {
                ReconcileError::Validation(format!(
                    "No offset account configured for {} in company {company_id}",
                    adjustment_type.display_name()
                ))
            })
    }
}

/// In-memory book of internal financial records, queryable as matching
/// candidates
#[derive(Debug, Clone)]
pub struct InMemoryTransactionBook {
    records: Arc<RwLock<Vec<SourceRecord>>>,
}

impl InMemoryTransactionBook {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add(&self, record: SourceRecord) {
        self.records.write().unwrap().push(record);
    }
}

impl Default for InMemoryTransactionBook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionQuery for InMemoryTransactionBook {
    async fn find_candidates(
        &self,
        company_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        amount: &BigDecimal,
    ) -> ReconcileResult<Vec<SourceRecord>> {
        let magnitude = amount.abs();
        Ok(self
            .records
            .read()
            .unwrap()
            .iter()
            .filter(|r| {
                r.company_id == company_id
                    && r.date >= from
                    && r.date <= to
                    && r.amount.abs() == magnitude
            })
            .cloned()
            .collect())
    }

    async fn get_source(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> ReconcileResult<Option<SourceRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .iter()
            .find(|r| r.source_type == source_type && r.source_id == source_id)
            .cloned())
    }
}

/// Journal-entry writer that records postings instead of hitting a ledger
#[derive(Debug, Clone, Default)]
pub struct RecordingJournalWriter {
    entries: Arc<RwLock<HashMap<String, PostedEntry>>>,
}

/// One entry captured by [`RecordingJournalWriter`]
#[derive(Debug, Clone, PartialEq)]
pub struct PostedEntry {
    pub company_id: String,
    pub date: NaiveDate,
    pub description: String,
    pub reference: String,
    pub lines: Vec<JournalLine>,
    pub reversed: bool,
}

impl RecordingJournalWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, journal_entry_id: &str) -> Option<PostedEntry> {
        self.entries.read().unwrap().get(journal_entry_id).cloned()
    }

    pub fn posted_count(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

#[async_trait]
impl JournalEntryWriter for RecordingJournalWriter {
    async fn post_journal_entry(
        &mut self,
        company_id: &str,
        date: NaiveDate,
        description: &str,
        reference: &str,
        lines: &[JournalLine],
    ) -> ReconcileResult<String> {
        let debits = lines
            .iter()
            .filter(|l| l.side == EntrySide::Debit)
            .fold(BigDecimal::from(0), |acc, l| acc + &l.amount);
        let credits = lines
            .iter()
            .filter(|l| l.side == EntrySide::Credit)
            .fold(BigDecimal::from(0), |acc, l| acc + &l.amount);
        if debits != credits {
            return Err(ReconcileError::Validation(format!(
                "Unbalanced journal entry: debits {debits}, credits {credits}"
            )));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.entries.write().unwrap().insert(
            id.clone(),
            PostedEntry {
                company_id: company_id.to_string(),
                date,
                description: description.to_string(),
                reference: reference.to_string(),
                lines: lines.to_vec(),
                reversed: false,
            },
        );
        Ok(id)
    }

    async fn reverse_journal_entry(
        &mut self,
        _company_id: &str,
        journal_entry_id: &str,
    ) -> ReconcileResult<()> {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(journal_entry_id) {
            Some(entry) => {
                entry.reversed = true;
                Ok(())
            }
            None => Err(ReconcileError::Storage(format!(
                "Journal entry not found: {journal_entry_id}"
            ))),
        }
    }
}

//! Core types and data structures for bank reconciliation

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Supported bank statement file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementFormat {
    Csv,
    Ofx,
    Qif,
}

impl StatementFormat {
    /// Resolve a format from a file extension or format label
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "csv" => Some(StatementFormat::Csv),
            "ofx" | "qfx" => Some(StatementFormat::Ofx),
            "qif" => Some(StatementFormat::Qif),
            _ => None,
        }
    }
}

/// Processing status of an imported statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementStatus {
    /// Uploaded, awaiting normalization
    Pending,
    /// Lines parsed and persisted
    Normalized,
    /// Normalization failed; partial lines retained for inspection
    Failed,
}

/// Lifecycle status of a reconciliation session
///
/// Transitions are owned exclusively by the lifecycle component:
/// `InProgress -> Completed -> Locked -> Reopened`, where `Reopened`
/// behaves like `InProgress` for editing purposes and exists only so the
/// audit history distinguishes a reworked reconciliation from a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    InProgress,
    Completed,
    Locked,
    Reopened,
}

impl ReconciliationStatus {
    /// Whether matches and adjustments may still be mutated in this status
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            ReconciliationStatus::InProgress | ReconciliationStatus::Reopened
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::InProgress => "in_progress",
            ReconciliationStatus::Completed => "completed",
            ReconciliationStatus::Locked => "locked",
            ReconciliationStatus::Reopened => "reopened",
        }
    }
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of internal financial records a statement line can be matched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Payment,
    Invoice,
    JournalEntry,
    BillPayment,
}

impl SourceType {
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceType::Payment => "Payments",
            SourceType::Invoice => "Invoices",
            SourceType::JournalEntry => "Journal Entries",
            SourceType::BillPayment => "Bill Payments",
        }
    }
}

/// Manual correction categories, each with a fixed amount polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    /// Charges levied by the bank; always negative
    BankFee,
    /// Interest earned on the account; always positive
    Interest,
    /// Uncollectable amounts written off; always negative
    WriteOff,
    /// Timing differences between bank and books; either sign
    Timing,
    Other,
}

impl AdjustmentType {
    /// Enforce the sign polarity for this adjustment type.
    ///
    /// A violating amount is rejected, never silently flipped.
    pub fn check_sign(&self, amount: &BigDecimal) -> ReconcileResult<()> {
        let zero = BigDecimal::from(0);
        let ok = match self {
            AdjustmentType::BankFee | AdjustmentType::WriteOff => *amount < zero,
            AdjustmentType::Interest => *amount > zero,
            AdjustmentType::Timing | AdjustmentType::Other => true,
        };
        if ok {
            Ok(())
        } else {
            Err(ReconcileError::InvalidAdjustmentSign(format!(
                "{} adjustments must be {}, got {}",
                self.display_name(),
                match self {
                    AdjustmentType::Interest => "positive",
                    _ => "negative",
                },
                amount
            )))
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AdjustmentType::BankFee => "Bank Fees",
            AdjustmentType::Interest => "Interest Income",
            AdjustmentType::WriteOff => "Write Offs",
            AdjustmentType::Timing => "Timing Adjustments",
            AdjustmentType::Other => "Other Adjustments",
        }
    }
}

/// Direction of a journal line in double-entry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySide {
    Debit,
    Credit,
}

/// One line of a journal entry handed to the journal-entry writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: String,
    pub side: EntrySide,
    pub amount: BigDecimal,
    pub description: Option<String>,
}

impl JournalLine {
    pub fn debit(account_id: String, amount: BigDecimal, description: Option<String>) -> Self {
        Self {
            account_id,
            side: EntrySide::Debit,
            amount,
            description,
        }
    }

    pub fn credit(account_id: String, amount: BigDecimal, description: Option<String>) -> Self {
        Self {
            account_id,
            side: EntrySide::Credit,
            amount,
            description,
        }
    }
}

/// One imported bank statement for one account and period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankStatement {
    pub id: String,
    pub company_id: String,
    /// Ledger account reference for the bank account
    pub bank_account_id: String,
    pub format: StatementFormat,
    /// Deterministic dedup key derived from content + account + period
    pub statement_uid: String,
    pub file_name: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub opening_balance: BigDecimal,
    pub closing_balance: BigDecimal,
    /// ISO 4217 currency code
    pub currency: String,
    pub status: StatementStatus,
    /// Populated when normalization fails
    pub failure_reason: Option<String>,
    pub imported_by: String,
    pub imported_at: NaiveDateTime,
    /// Soft-delete tombstone; all queries must filter it explicitly
    pub deleted_at: Option<NaiveDateTime>,
}

impl BankStatement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        company_id: String,
        bank_account_id: String,
        format: StatementFormat,
        statement_uid: String,
        file_name: String,
        period_start: NaiveDate,
        period_end: NaiveDate,
        opening_balance: BigDecimal,
        closing_balance: BigDecimal,
        currency: String,
        imported_by: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            company_id,
            bank_account_id,
            format,
            statement_uid,
            file_name,
            period_start,
            period_end,
            opening_balance,
            closing_balance,
            currency,
            status: StatementStatus::Pending,
            failure_reason: None,
            imported_by,
            imported_at: chrono::Utc::now().naive_utc(),
            deleted_at: None,
        }
    }

    /// Net movement over the statement period (closing minus opening)
    pub fn net_movement(&self) -> BigDecimal {
        &self.closing_balance - &self.opening_balance
    }

    /// Whether this statement's period overlaps the given date range
    pub fn period_overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.period_start <= end && start <= self.period_end
    }
}

/// One transaction row from a bank statement
///
/// Created in bulk during normalization; immutable afterwards except for
/// the matched flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankStatementLine {
    pub id: String,
    pub statement_id: String,
    /// Position within the source file, for stable ordering
    pub line_number: u32,
    pub transaction_date: NaiveDate,
    pub value_date: Option<NaiveDate>,
    pub description: String,
    pub reference_number: Option<String>,
    /// Signed: positive for credits to the account, negative for debits
    pub amount: BigDecimal,
    /// Running balance after this line; None when the source has no balance column
    pub balance_after: Option<BigDecimal>,
    /// Content hash used for intra-statement duplicate warnings
    pub line_hash: String,
    pub matched: bool,
}

impl BankStatementLine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        statement_id: String,
        line_number: u32,
        transaction_date: NaiveDate,
        value_date: Option<NaiveDate>,
        description: String,
        reference_number: Option<String>,
        amount: BigDecimal,
        balance_after: Option<BigDecimal>,
        line_hash: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            statement_id,
            line_number,
            transaction_date,
            value_date,
            description,
            reference_number,
            amount,
            balance_after,
            line_hash,
            matched: false,
        }
    }
}

/// An active reconciliation session over one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankReconciliation {
    pub id: String,
    pub company_id: String,
    pub statement_id: String,
    pub ledger_account_id: String,
    pub status: ReconciliationStatus,
    /// Balance snapshots taken from the statement at start
    pub opening_balance: BigDecimal,
    pub closing_balance: BigDecimal,
    /// Cached variance; the authoritative value is always re-derived from
    /// persisted match/adjustment sums by the lifecycle component
    pub variance: BigDecimal,
    pub started_by: String,
    pub started_at: NaiveDateTime,
    pub completed_by: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
    pub locked_at: Option<NaiveDateTime>,
    /// Free text; reopen reasons are appended, never overwritten
    pub notes: String,
}

impl BankReconciliation {
    pub fn new(statement: &BankStatement, started_by: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: statement.company_id.clone(),
            statement_id: statement.id.clone(),
            ledger_account_id: statement.bank_account_id.clone(),
            status: ReconciliationStatus::InProgress,
            opening_balance: statement.opening_balance.clone(),
            closing_balance: statement.closing_balance.clone(),
            variance: statement.net_movement(),
            started_by,
            started_at: chrono::Utc::now().naive_utc(),
            completed_by: None,
            completed_at: None,
            locked_at: None,
            notes: String::new(),
        }
    }

    pub fn can_be_edited(&self) -> bool {
        self.status.is_editable()
    }

    /// Completion also requires zero variance, enforced by the lifecycle
    pub fn can_be_completed(&self) -> bool {
        self.status.is_editable() && self.is_balanced()
    }

    pub fn can_be_locked(&self) -> bool {
        self.status == ReconciliationStatus::Completed
    }

    pub fn can_be_reopened(&self) -> bool {
        self.status == ReconciliationStatus::Locked
    }

    pub fn is_balanced(&self) -> bool {
        self.variance == BigDecimal::from(0)
    }

    pub fn variance_status(&self) -> VarianceStatus {
        let zero = BigDecimal::from(0);
        if self.variance == zero {
            VarianceStatus::Balanced
        } else if self.variance > zero {
            VarianceStatus::Positive
        } else {
            VarianceStatus::Negative
        }
    }
}

/// Sign classification of a reconciliation variance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceStatus {
    Balanced,
    Positive,
    Negative,
}

/// A recorded correspondence between one statement line and one internal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationMatch {
    pub id: String,
    pub reconciliation_id: String,
    /// At most one non-deleted match may reference a statement line
    pub statement_line_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub amount: BigDecimal,
    /// Scoring confidence in [0, 1]; None for manual matches
    pub confidence: Option<f64>,
    pub auto_matched: bool,
    /// None when the match was produced by the auto-matcher
    pub matched_by: Option<String>,
    pub matched_at: NaiveDateTime,
}

impl ReconciliationMatch {
    pub fn auto(
        reconciliation_id: String,
        statement_line_id: String,
        source_type: SourceType,
        source_id: String,
        amount: BigDecimal,
        confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reconciliation_id,
            statement_line_id,
            source_type,
            source_id,
            amount,
            confidence: Some(confidence),
            auto_matched: true,
            matched_by: None,
            matched_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn manual(
        reconciliation_id: String,
        statement_line_id: String,
        source_type: SourceType,
        source_id: String,
        amount: BigDecimal,
        matched_by: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reconciliation_id,
            statement_line_id,
            source_type,
            source_id,
            amount,
            confidence: None,
            auto_matched: false,
            matched_by: Some(matched_by),
            matched_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Human-readable confidence band for review screens
    pub fn confidence_level(&self) -> Option<&'static str> {
        self.confidence.map(|c| {
            if c >= 0.9 {
                "high"
            } else if c >= 0.7 {
                "medium"
            } else {
                "low"
            }
        })
    }
}

/// A manual correction entry affecting reconciliation variance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationAdjustment {
    pub id: String,
    pub reconciliation_id: String,
    pub adjustment_type: AdjustmentType,
    /// Signed; polarity constrained by the adjustment type
    pub amount: BigDecimal,
    pub description: String,
    pub statement_line_id: Option<String>,
    /// Set when the adjustment was posted to the general ledger
    pub journal_entry_id: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

impl ReconciliationAdjustment {
    pub fn new(
        reconciliation_id: String,
        adjustment_type: AdjustmentType,
        amount: BigDecimal,
        description: String,
        statement_line_id: Option<String>,
        created_by: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reconciliation_id,
            adjustment_type,
            amount,
            description,
            statement_line_id,
            journal_entry_id: None,
            created_by,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// What happened in one recorded reconciliation activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityAction {
    StatusChanged {
        from: ReconciliationStatus,
        to: ReconciliationStatus,
    },
    MatchCreated,
    MatchRemoved,
    AdjustmentCreated,
    AdjustmentUpdated,
    AdjustmentRemoved,
}

/// One audit-trail entry for a reconciliation
///
/// Every lifecycle transition and every match/adjustment mutation records
/// one of these; the audit-trail report is a chronological read of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub reconciliation_id: String,
    pub action: ActivityAction,
    pub actor: String,
    pub description: String,
    /// Open-ended context (amounts, ids, before/after values)
    pub details: HashMap<String, String>,
    pub occurred_at: NaiveDateTime,
}

impl ActivityRecord {
    pub fn new(
        reconciliation_id: String,
        action: ActivityAction,
        actor: String,
        description: String,
        details: HashMap<String, String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reconciliation_id,
            action,
            actor,
            description,
            details,
            occurred_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// A candidate internal record returned by the transaction query collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_type: SourceType,
    pub source_id: String,
    pub company_id: String,
    pub date: NaiveDate,
    /// Signed, in statement-line convention
    pub amount: BigDecimal,
    pub reference: Option<String>,
    pub description: Option<String>,
}

/// Capabilities a user can hold within their active company
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewReports,
    Reconcile,
    ImportStatements,
}

/// A user's resolved tenant context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyContext {
    pub user_id: String,
    pub company_id: String,
    pub capabilities: HashSet<Capability>,
}

impl CompanyContext {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Errors that can occur in the reconciliation system
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Statement file too large: {0} bytes exceeds the {1} byte ceiling")]
    FileTooLarge(usize, usize),
    #[error("Duplicate statement: {0}")]
    DuplicateStatement(String),
    #[error("Statement not found: {0}")]
    StatementNotFound(String),
    #[error("Reconciliation not found: {0}")]
    ReconciliationNotFound(String),
    #[error("Match not found: {0}")]
    MatchNotFound(String),
    #[error("Adjustment not found: {0}")]
    AdjustmentNotFound(String),
    #[error("Source record not found: {0}")]
    SourceNotFound(String),
    #[error("Cross-company reference: {0}")]
    CrossCompanyReference(String),
    #[error("Statement line already matched: {0}")]
    LineAlreadyMatched(String),
    #[error("Invalid adjustment sign: {0}")]
    InvalidAdjustmentSign(String),
    #[error("Cannot complete: variance is {0}, not zero")]
    NonZeroVariance(BigDecimal),
    #[error("Reconciliation is not in progress (status: {0})")]
    NotInProgress(ReconciliationStatus),
    #[error("Reconciliation is not completed (status: {0})")]
    NotCompleted(ReconciliationStatus),
    #[error("Reconciliation is not locked (status: {0})")]
    NotLocked(ReconciliationStatus),
    #[error("A reason is required to reopen a reconciliation")]
    ReasonRequired,
    #[error("Reopen reason exceeds {0} characters")]
    ReasonTooLong(usize),
    #[error("Reconciliation is not editable (status: {0})")]
    ReconciliationNotEditable(ReconciliationStatus),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type for reconciliation operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;

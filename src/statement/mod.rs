//! Statement import and normalization
//!
//! Importing is a two-phase affair: [`StatementImporter::import`] validates
//! the upload, runs duplicate detection, and persists the statement row plus
//! its raw content; [`StatementImporter::normalize`] parses the content into
//! canonical [`BankStatementLine`] rows. Keeping the phases separate makes
//! normalization re-runnable from storage alone after a parser fix.

pub mod csv;
pub mod ofx;
pub mod qif;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::traits::ReconciliationStorage;
use crate::types::*;
use crate::utils::validation;

/// A statement transaction in canonical form, as produced by any parser
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub transaction_date: NaiveDate,
    pub value_date: Option<NaiveDate>,
    pub description: String,
    pub reference: Option<String>,
    pub amount: BigDecimal,
    pub balance_after: Option<BigDecimal>,
}

/// What a parser produced: lines parsed so far plus an error if it stopped
///
/// Parsers stop at the first bad row rather than skipping it, so `lines`
/// together with `error` always describes a prefix of the file.
#[derive(Debug)]
pub struct ParseOutcome {
    pub lines: Vec<ParsedLine>,
    pub error: Option<String>,
}

impl ParseOutcome {
    pub fn ok(lines: Vec<ParsedLine>) -> Self {
        Self { lines, error: None }
    }

    pub fn partial(lines: Vec<ParsedLine>, error: String) -> Self {
        Self {
            lines,
            error: Some(error),
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            lines: Vec::new(),
            error: Some(error),
        }
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%m/%d/%y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Try the date formats banks commonly export. Month-first is tried before
/// day-first, so an ambiguous `01/05/2024` reads as January 5.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Some(datetime.date());
        }
    }
    None
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic dedup key: same file for the same account and period always
/// hashes to the same UID
pub fn statement_uid(
    content: &str,
    bank_account_id: &str,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> String {
    sha256_hex(&format!(
        "{content}\n{bank_account_id}\n{period_start}\n{period_end}"
    ))
}

fn line_hash(line: &ParsedLine) -> String {
    sha256_hex(&format!(
        "{}|{}|{}|{}",
        line.transaction_date,
        line.amount,
        line.description,
        line.reference.as_deref().unwrap_or("")
    ))
}

/// Everything needed to import one statement file
#[derive(Debug, Clone)]
pub struct ImportParams {
    pub company_id: String,
    pub bank_account_id: String,
    pub format: StatementFormat,
    pub file_name: String,
    pub content: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub opening_balance: BigDecimal,
    pub closing_balance: BigDecimal,
    pub currency: String,
    pub imported_by: String,
}

/// Result of normalizing one statement
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationReport {
    pub statement_id: String,
    pub status: StatementStatus,
    pub line_count: usize,
    /// Sum of all normalized line amounts
    pub total_amount: BigDecimal,
    /// Non-fatal observations (out-of-period dates, duplicate lines,
    /// balance drift against the declared closing balance)
    pub warnings: Vec<String>,
    pub failure_reason: Option<String>,
}

/// Imports statement files and normalizes them into statement lines
pub struct StatementImporter<S: ReconciliationStorage> {
    storage: S,
}

impl<S: ReconciliationStorage> StatementImporter<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Validate and persist an uploaded statement file.
    ///
    /// The statement lands in `Pending` status with its raw content stored
    /// next to it; call [`normalize`](Self::normalize) to parse the lines.
    pub async fn import(&mut self, params: ImportParams) -> ReconcileResult<BankStatement> {
        validation::validate_statement_size(params.content.len())?;
        if params.content.trim().is_empty() {
            return Err(ReconcileError::Validation(
                "Statement file is empty".to_string(),
            ));
        }
        validation::validate_currency_code(&params.currency)?;
        if params.period_start > params.period_end {
            return Err(ReconcileError::Validation(format!(
                "Period start {} is after period end {}",
                params.period_start, params.period_end
            )));
        }

        let uid = statement_uid(
            &params.content,
            &params.bank_account_id,
            params.period_start,
            params.period_end,
        );

        if let Some(existing) = self
            .storage
            .find_duplicate_statement(
                &params.company_id,
                &params.bank_account_id,
                &uid,
                params.period_start,
                params.period_end,
            )
            .await?
        {
            return Err(ReconcileError::DuplicateStatement(format!(
                "statement {} ({}) already covers this account and period",
                existing.id, existing.file_name
            )));
        }

        let statement = BankStatement::new(
            params.company_id,
            params.bank_account_id,
            params.format,
            uid,
            params.file_name,
            params.period_start,
            params.period_end,
            params.opening_balance,
            params.closing_balance,
            params.currency.to_uppercase(),
            params.imported_by,
        );
        self.storage.save_statement(&statement).await?;
        self.storage
            .save_statement_content(&statement.id, &params.content)
            .await?;

        info!(
            statement_id = %statement.id,
            file = %statement.file_name,
            format = ?statement.format,
            "statement imported"
        );
        Ok(statement)
    }

    /// Parse a pending statement's content into statement lines.
    ///
    /// Idempotent: an already-normalized statement returns its current
    /// report without reparsing, and a failed one can be retried because
    /// stale lines are deleted before inserting.
    pub async fn normalize(&mut self, statement_id: &str) -> ReconcileResult<NormalizationReport> {
        let mut statement = self
            .storage
            .get_statement(statement_id)
            .await?
            .ok_or_else(|| ReconcileError::StatementNotFound(statement_id.to_string()))?;

        if statement.status == StatementStatus::Normalized {
            let lines = self.storage.get_statement_lines(statement_id).await?;
            let total = lines
                .iter()
                .fold(BigDecimal::from(0), |acc, l| acc + &l.amount);
            return Ok(NormalizationReport {
                statement_id: statement_id.to_string(),
                status: StatementStatus::Normalized,
                line_count: lines.len(),
                total_amount: total,
                warnings: Vec::new(),
                failure_reason: None,
            });
        }

        let content = self
            .storage
            .get_statement_content(statement_id)
            .await?
            .ok_or_else(|| {
                ReconcileError::Storage(format!(
                    "No stored content for statement {statement_id}"
                ))
            })?;

        let outcome = match statement.format {
            StatementFormat::Csv => csv::parse(&content),
            StatementFormat::Ofx => ofx::parse(&content),
            StatementFormat::Qif => qif::parse(&content),
        };

        self.storage.delete_statement_lines(statement_id).await?;

        let mut warnings = Vec::new();
        let mut seen_hashes = std::collections::HashSet::new();
        let mut total = BigDecimal::from(0);
        let mut rows = Vec::with_capacity(outcome.lines.len());
        for (index, parsed) in outcome.lines.iter().enumerate() {
            let number = (index + 1) as u32;
            if parsed.transaction_date < statement.period_start
                || parsed.transaction_date > statement.period_end
            {
                warnings.push(format!(
                    "Line {number}: date {} is outside the statement period",
                    parsed.transaction_date
                ));
            }
            let hash = line_hash(parsed);
            if !seen_hashes.insert(hash.clone()) {
                warnings.push(format!(
                    "Line {number}: duplicate of an earlier line ({}, {})",
                    parsed.transaction_date, parsed.amount
                ));
            }
            total += &parsed.amount;
            rows.push(BankStatementLine::new(
                statement_id.to_string(),
                number,
                parsed.transaction_date,
                parsed.value_date,
                parsed.description.clone(),
                parsed.reference.clone(),
                parsed.amount.clone(),
                parsed.balance_after.clone(),
                hash,
            ));
        }
        self.storage.insert_lines(&rows).await?;

        let report = if let Some(reason) = outcome.error {
            statement.status = StatementStatus::Failed;
            statement.failure_reason = Some(reason.clone());
            warn!(statement_id, %reason, "statement normalization failed");
            NormalizationReport {
                statement_id: statement_id.to_string(),
                status: StatementStatus::Failed,
                line_count: rows.len(),
                total_amount: total,
                warnings,
                failure_reason: Some(reason),
            }
        } else {
            let declared = statement.net_movement();
            if total != declared {
                warnings.push(format!(
                    "Line amounts sum to {total} but the declared balances move by {declared}"
                ));
            }
            statement.status = StatementStatus::Normalized;
            statement.failure_reason = None;
            info!(
                statement_id,
                lines = rows.len(),
                warnings = warnings.len(),
                "statement normalized"
            );
            NormalizationReport {
                statement_id: statement_id.to_string(),
                status: StatementStatus::Normalized,
                line_count: rows.len(),
                total_amount: total,
                warnings,
                failure_reason: None,
            }
        };
        self.storage.update_statement(&statement).await?;
        Ok(report)
    }

    /// Soft-delete a statement so it stops participating in duplicate
    /// detection. Statements with a reconciliation session stay deletable;
    /// the session keeps its own balance snapshots.
    pub async fn delete_statement(&mut self, statement_id: &str) -> ReconcileResult<()> {
        self.storage
            .get_statement(statement_id)
            .await?
            .ok_or_else(|| ReconcileError::StatementNotFound(statement_id.to_string()))?;
        self.storage.soft_delete_statement(statement_id).await
    }
}

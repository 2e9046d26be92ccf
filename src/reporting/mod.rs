//! Reconciliation reporting
//!
//! Read-only projections over a reconciliation session: summary, variance
//! analysis, audit trail, and a metrics snapshot. JSON is the canonical
//! encoding; the CSV and print renderings are derived from the same
//! [`SummaryReport`] value so the formats cannot drift apart.
//!
//! Every call authorizes the requesting user: the report-view capability is
//! required and the reconciliation must belong to the user's active
//! company. Cross-tenant access fails closed, never as an empty report.

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::debug;

use crate::traits::{CompanyContextResolver, ReconciliationStorage};
use crate::types::*;

/// Output encodings for report export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Json,
    Csv,
    /// Plain-text rendering for printing
    Print,
}

/// Variance breakdown with remediation hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceAnalysis {
    pub variance: BigDecimal,
    pub variance_status: VarianceStatus,
    /// Variance as a percentage of the closing balance; None when the
    /// closing balance is zero
    pub percentage_of_closing: Option<f64>,
    pub unmatched_lines: Vec<BankStatementLine>,
    pub adjustments: Vec<ReconciliationAdjustment>,
    pub recommendations: Vec<String>,
}

/// The full state of one reconciliation, ready for export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub reconciliation_id: String,
    pub company_id: String,
    pub status: ReconciliationStatus,
    pub bank_account_id: String,
    pub statement_file: String,
    pub period_start: chrono::NaiveDate,
    pub period_end: chrono::NaiveDate,
    pub opening_balance: BigDecimal,
    pub closing_balance: BigDecimal,
    pub matches: Vec<ReconciliationMatch>,
    pub adjustments: Vec<ReconciliationAdjustment>,
    pub total_matched: BigDecimal,
    pub total_adjustments: BigDecimal,
    pub match_count: usize,
    pub adjustment_count: usize,
    pub variance: VarianceAnalysis,
}

/// Chronological audit trail of one reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrailReport {
    pub reconciliation_id: String,
    pub entries: Vec<ActivityRecord>,
}

/// Progress snapshot for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub reconciliation_id: String,
    pub status: ReconciliationStatus,
    pub total_lines: usize,
    pub matched_lines: usize,
    /// matched_lines / total_lines, in percent; 100 for an empty statement
    pub progress_percent: f64,
    pub variance: BigDecimal,
    pub variance_status: VarianceStatus,
    pub auto_match_count: usize,
    pub manual_match_count: usize,
    pub adjustment_count: usize,
    pub can_be_edited: bool,
    pub can_be_completed: bool,
    pub can_be_locked: bool,
    pub can_be_reopened: bool,
    pub started_at: chrono::NaiveDateTime,
    pub completed_at: Option<chrono::NaiveDateTime>,
    pub locked_at: Option<chrono::NaiveDateTime>,
}

/// Builds reports over reconciliation state
pub struct ReportingEngine<S, C>
where
    S: ReconciliationStorage,
    C: CompanyContextResolver,
{
    storage: S,
    contexts: C,
}

impl<S, C> ReportingEngine<S, C>
where
    S: ReconciliationStorage,
    C: CompanyContextResolver,
{
    pub fn new(storage: S, contexts: C) -> Self {
        Self { storage, contexts }
    }

    /// Full reconciliation summary: header, match and adjustment listings,
    /// totals, and the variance analysis sub-block
    pub async fn summary(
        &self,
        reconciliation_id: &str,
        user_id: &str,
    ) -> ReconcileResult<SummaryReport> {
        let reconciliation = self.authorize(reconciliation_id, user_id).await?;
        let statement = self.statement_of(&reconciliation).await?;
        let matches = self.storage.get_matches(reconciliation_id).await?;
        let adjustments = self.storage.get_adjustments(reconciliation_id).await?;
        let total_matched = self.storage.sum_matched_amount(reconciliation_id).await?;
        let total_adjustments = self
            .storage
            .sum_adjustment_amount(reconciliation_id)
            .await?;
        let variance = self
            .variance_block(&reconciliation, &statement, &adjustments)
            .await?;

        debug!(reconciliation_id, user_id, "summary report built");
        Ok(SummaryReport {
            reconciliation_id: reconciliation.id,
            company_id: reconciliation.company_id,
            status: reconciliation.status,
            bank_account_id: reconciliation.ledger_account_id,
            statement_file: statement
                .as_ref()
                .map(|s| s.file_name.clone())
                .unwrap_or_default(),
            period_start: statement
                .as_ref()
                .map(|s| s.period_start)
                .unwrap_or_default(),
            period_end: statement.as_ref().map(|s| s.period_end).unwrap_or_default(),
            opening_balance: reconciliation.opening_balance,
            closing_balance: reconciliation.closing_balance,
            match_count: matches.len(),
            adjustment_count: adjustments.len(),
            matches,
            adjustments,
            total_matched,
            total_adjustments,
            variance,
        })
    }

    /// Variance amount, percentage, unmatched lines, and recommendations
    pub async fn variance_analysis(
        &self,
        reconciliation_id: &str,
        user_id: &str,
    ) -> ReconcileResult<VarianceAnalysis> {
        let reconciliation = self.authorize(reconciliation_id, user_id).await?;
        let statement = self.statement_of(&reconciliation).await?;
        let adjustments = self.storage.get_adjustments(reconciliation_id).await?;
        self.variance_block(&reconciliation, &statement, &adjustments)
            .await
    }

    /// Chronological list of recorded activities
    pub async fn audit_trail(
        &self,
        reconciliation_id: &str,
        user_id: &str,
    ) -> ReconcileResult<AuditTrailReport> {
        let reconciliation = self.authorize(reconciliation_id, user_id).await?;
        let entries = self.storage.get_activities(&reconciliation.id).await?;
        Ok(AuditTrailReport {
            reconciliation_id: reconciliation.id,
            entries,
        })
    }

    /// Read-only progress projection for dashboards and status endpoints
    pub async fn metrics(
        &self,
        reconciliation_id: &str,
        user_id: &str,
    ) -> ReconcileResult<MetricsReport> {
        let reconciliation = self.authorize(reconciliation_id, user_id).await?;
        let lines = self
            .storage
            .get_statement_lines(&reconciliation.statement_id)
            .await?;
        let matches = self.storage.get_matches(reconciliation_id).await?;
        let adjustments = self.storage.get_adjustments(reconciliation_id).await?;

        let matched_lines = lines.iter().filter(|l| l.matched).count();
        let progress_percent = if lines.is_empty() {
            100.0
        } else {
            matched_lines as f64 / lines.len() as f64 * 100.0
        };
        let auto_match_count = matches.iter().filter(|m| m.auto_matched).count();

        Ok(MetricsReport {
            reconciliation_id: reconciliation.id.clone(),
            status: reconciliation.status,
            total_lines: lines.len(),
            matched_lines,
            progress_percent,
            variance: reconciliation.variance.clone(),
            variance_status: reconciliation.variance_status(),
            auto_match_count,
            manual_match_count: matches.len() - auto_match_count,
            adjustment_count: adjustments.len(),
            can_be_edited: reconciliation.can_be_edited(),
            can_be_completed: reconciliation.can_be_completed(),
            can_be_locked: reconciliation.can_be_locked(),
            can_be_reopened: reconciliation.can_be_reopened(),
            started_at: reconciliation.started_at,
            completed_at: reconciliation.completed_at,
            locked_at: reconciliation.locked_at,
        })
    }

    /// Build the summary and encode it in the requested format
    pub async fn export_summary(
        &self,
        reconciliation_id: &str,
        user_id: &str,
        format: ReportFormat,
    ) -> ReconcileResult<String> {
        let report = self.summary(reconciliation_id, user_id).await?;
        export(&report, format)
    }

    async fn authorize(
        &self,
        reconciliation_id: &str,
        user_id: &str,
    ) -> ReconcileResult<BankReconciliation> {
        let context = self.contexts.resolve_context(user_id).await?;
        if !context.has_capability(Capability::ViewReports) {
            return Err(ReconcileError::PermissionDenied(format!(
                "user {user_id} lacks the report-view capability"
            )));
        }
        let reconciliation = self
            .storage
            .get_reconciliation(reconciliation_id)
            .await?
            .ok_or_else(|| ReconcileError::ReconciliationNotFound(reconciliation_id.to_string()))?;
        if reconciliation.company_id != context.company_id {
            return Err(ReconcileError::CrossCompanyReference(format!(
                "reconciliation {reconciliation_id} belongs to another company"
            )));
        }
        Ok(reconciliation)
    }

    async fn statement_of(
        &self,
        reconciliation: &BankReconciliation,
    ) -> ReconcileResult<Option<BankStatement>> {
        self.storage.get_statement(&reconciliation.statement_id).await
    }

    async fn variance_block(
        &self,
        reconciliation: &BankReconciliation,
        statement: &Option<BankStatement>,
        adjustments: &[ReconciliationAdjustment],
    ) -> ReconcileResult<VarianceAnalysis> {
        let unmatched_lines: Vec<BankStatementLine> = match statement {
            Some(statement) => self
                .storage
                .get_statement_lines(&statement.id)
                .await?
                .into_iter()
                .filter(|l| !l.matched)
                .collect(),
            None => Vec::new(),
        };

        let zero = BigDecimal::from(0);
        let percentage_of_closing = if reconciliation.closing_balance == zero {
            None
        } else {
            let ratio = &reconciliation.variance / &reconciliation.closing_balance;
            ratio.to_f64().map(|r| r * 100.0)
        };

        let recommendations = recommendations(reconciliation, &unmatched_lines, adjustments);
        Ok(VarianceAnalysis {
            variance: reconciliation.variance.clone(),
            variance_status: reconciliation.variance_status(),
            percentage_of_closing,
            unmatched_lines,
            adjustments: adjustments.to_vec(),
            recommendations,
        })
    }
}

fn recommendations(
    reconciliation: &BankReconciliation,
    unmatched_lines: &[BankStatementLine],
    adjustments: &[ReconciliationAdjustment],
) -> Vec<String> {
    let mut out = Vec::new();
    if !unmatched_lines.is_empty() {
        let total = unmatched_lines
            .iter()
            .fold(BigDecimal::from(0), |acc, l| acc + &l.amount);
        out.push(format!(
            "{} unmatched line(s) totaling {total}; review for missing or unrecorded transactions",
            unmatched_lines.len()
        ));
    }
    match reconciliation.variance_status() {
        VarianceStatus::Balanced => {
            if reconciliation.can_be_edited() {
                out.push("Variance is zero; the reconciliation can be completed".to_string());
            }
        }
        VarianceStatus::Positive => out.push(
            "Bank shows more activity than the books; check for unrecorded deposits or interest"
                .to_string(),
        ),
        VarianceStatus::Negative => out.push(
            "Books show more activity than the bank; check for unrecorded fees or payments"
                .to_string(),
        ),
    }
    if adjustments.is_empty() && reconciliation.variance_status() != VarianceStatus::Balanced {
        out.push(
            "Consider an adjustment for known bank fees, interest, or timing differences"
                .to_string(),
        );
    }
    out
}

/// Encode a summary report. JSON is canonical; CSV and print are derived
/// from the same report value.
pub fn export(report: &SummaryReport, format: ReportFormat) -> ReconcileResult<String> {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| ReconcileError::Parse(format!("JSON encoding failed: {e}"))),
        ReportFormat::Csv => to_csv(report),
        ReportFormat::Print => Ok(to_print(report)),
    }
}

/// Tabular listing of matches and adjustments with a totals row
fn to_csv(report: &SummaryReport) -> ReconcileResult<String> {
    let mut writer = ::csv::Writer::from_writer(Vec::new());
    let encode = |e: ::csv::Error| ReconcileError::Parse(format!("CSV encoding failed: {e}"));

    writer
        .write_record(["kind", "id", "detail", "amount", "confidence"])
        .map_err(encode)?;
    for m in &report.matches {
        writer
            .write_record([
                "match".to_string(),
                m.id.clone(),
                format!("{} {}", m.source_type.display_name(), m.source_id),
                m.amount.to_string(),
                m.confidence.map(|c| format!("{c:.2}")).unwrap_or_default(),
            ])
            .map_err(encode)?;
    }
    for a in &report.adjustments {
        writer
            .write_record([
                "adjustment".to_string(),
                a.id.clone(),
                format!("{}: {}", a.adjustment_type.display_name(), a.description),
                a.amount.to_string(),
                String::new(),
            ])
            .map_err(encode)?;
    }
    writer
        .write_record([
            "total_matched".to_string(),
            String::new(),
            String::new(),
            report.total_matched.to_string(),
            String::new(),
        ])
        .map_err(encode)?;
    writer
        .write_record([
            "total_adjustments".to_string(),
            String::new(),
            String::new(),
            report.total_adjustments.to_string(),
            String::new(),
        ])
        .map_err(encode)?;
    writer
        .write_record([
            "variance".to_string(),
            String::new(),
            String::new(),
            report.variance.variance.to_string(),
            String::new(),
        ])
        .map_err(encode)?;

    let bytes = writer
        .into_inner()
        .map_err(|e| ReconcileError::Parse(format!("CSV encoding failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| ReconcileError::Parse(format!("CSV encoding failed: {e}")))
}

fn to_print(report: &SummaryReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "BANK RECONCILIATION SUMMARY");
    let _ = writeln!(out, "===========================");
    let _ = writeln!(out, "Reconciliation: {}", report.reconciliation_id);
    let _ = writeln!(out, "Account:        {}", report.bank_account_id);
    let _ = writeln!(
        out,
        "Period:         {} to {}",
        report.period_start, report.period_end
    );
    let _ = writeln!(out, "Status:         {}", report.status);
    let _ = writeln!(out, "Opening:        {}", report.opening_balance);
    let _ = writeln!(out, "Closing:        {}", report.closing_balance);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Matches ({}), total {}",
        report.match_count, report.total_matched
    );
    for m in &report.matches {
        let _ = writeln!(
            out,
            "  {} {} {}",
            m.source_type.display_name(),
            m.source_id,
            m.amount
        );
    }
    let _ = writeln!(
        out,
        "Adjustments ({}), total {}",
        report.adjustment_count, report.total_adjustments
    );
    for a in &report.adjustments {
        let _ = writeln!(
            out,
            "  {} {} ({})",
            a.adjustment_type.display_name(),
            a.amount,
            a.description
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Variance: {}", report.variance.variance);
    for r in &report.variance.recommendations {
        let _ = writeln!(out, "  - {r}");
    }
    out
}

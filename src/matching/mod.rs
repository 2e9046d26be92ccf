//! Transaction matching
//!
//! Pairs bank statement lines with internal financial records, either
//! automatically by confidence scoring or manually by a user. Every match
//! mutation re-derives the session variance through the lifecycle.

use bigdecimal::BigDecimal;
use chrono::Duration;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::lifecycle::ReconciliationLifecycle;
use crate::traits::{ReconciliationStorage, TransactionQuery};
use crate::types::*;

/// How far either side of a line's date the candidate search reaches
pub const MATCH_WINDOW_DAYS: i64 = 60;

/// Minimum confidence at which the auto-matcher records a match
pub const AUTO_ACCEPT_THRESHOLD: f64 = 0.7;

/// Result of one auto-match run
#[derive(Debug, Clone, PartialEq)]
pub struct AutoMatchOutcome {
    pub created: Vec<ReconciliationMatch>,
    /// Unmatched lines the run looked at
    pub lines_considered: usize,
    /// Lines skipped because a match already existed
    pub lines_skipped: usize,
}

/// Result of creating a manual match
#[derive(Debug, Clone, PartialEq)]
pub struct ManualMatchOutcome {
    pub created: ReconciliationMatch,
    /// The previous match on this line, when superseding was requested
    pub superseded: Option<ReconciliationMatch>,
    /// Line amount minus the recorded amount; the match keeps the
    /// user-provided amount verbatim and leaves resolving the gap to the
    /// caller
    pub amount_mismatch: Option<BigDecimal>,
}

/// Matches statement lines against internal records
pub struct MatchingEngine<S, Q>
where
    S: ReconciliationStorage + Clone,
    Q: TransactionQuery,
{
    storage: S,
    lifecycle: ReconciliationLifecycle<S>,
    query: Q,
}

impl<S, Q> MatchingEngine<S, Q>
where
    S: ReconciliationStorage + Clone,
    Q: TransactionQuery,
{
    pub fn new(storage: S, query: Q) -> Self {
        let lifecycle = ReconciliationLifecycle::new(storage.clone());
        Self {
            storage,
            lifecycle,
            query,
        }
    }

    /// Auto-match every unmatched line of a reconciliation.
    ///
    /// Idempotent: lines that already carry a match are skipped, so
    /// re-running after an interruption only picks up the remainder. For
    /// each line the best-scoring candidate wins, provided it clears the
    /// acceptance threshold and is not already matched to another line.
    pub async fn run_auto_match(
        &mut self,
        reconciliation_id: &str,
        actor: &str,
    ) -> ReconcileResult<AutoMatchOutcome> {
        let reconciliation = self.lifecycle.require_editable(reconciliation_id).await?;
        let lines = self
            .storage
            .get_statement_lines(&reconciliation.statement_id)
            .await?;

        let mut used_sources: HashSet<(SourceType, String)> = self
            .storage
            .get_matches(reconciliation_id)
            .await?
            .into_iter()
            .map(|m| (m.source_type, m.source_id))
            .collect();

        let mut created = Vec::new();
        let mut considered = 0usize;
        let mut skipped = 0usize;
        for line in &lines {
            if self.storage.get_match_for_line(&line.id).await?.is_some() {
                skipped += 1;
                continue;
            }
            considered += 1;

            let from = line.transaction_date - Duration::days(MATCH_WINDOW_DAYS);
            let to = line.transaction_date + Duration::days(MATCH_WINDOW_DAYS);
            let candidates = self
                .query
                .find_candidates(&reconciliation.company_id, from, to, &line.amount)
                .await?;

            let best = candidates
                .into_iter()
                .filter(|c| !used_sources.contains(&(c.source_type, c.source_id.clone())))
                .map(|c| {
                    let score = score_candidate(line, &c);
                    (c, score)
                })
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let Some((candidate, confidence)) = best else {
                continue;
            };
            if confidence < AUTO_ACCEPT_THRESHOLD {
                debug!(
                    line_id = %line.id,
                    confidence,
                    "best candidate below acceptance threshold"
                );
                continue;
            }

            let m = ReconciliationMatch::auto(
                reconciliation_id.to_string(),
                line.id.clone(),
                candidate.source_type,
                candidate.source_id.clone(),
                line.amount.clone(),
                confidence,
            );
            self.storage.insert_match(&m).await?;
            self.storage.mark_line_matched(&line.id, true).await?;
            used_sources.insert((candidate.source_type, candidate.source_id.clone()));
            self.record_match_activity(&m, actor, "Auto-matched").await?;
            created.push(m);
        }

        self.lifecycle.recalculate(reconciliation_id).await?;
        info!(
            reconciliation_id,
            created = created.len(),
            considered,
            skipped,
            "auto-match run finished"
        );
        Ok(AutoMatchOutcome {
            created,
            lines_considered: considered,
            lines_skipped: skipped,
        })
    }

    /// Record a user-chosen match between one line and one source record.
    ///
    /// The source must exist and belong to the same company as the
    /// reconciliation. The given amount is recorded verbatim; when it
    /// disagrees with the line amount the difference is surfaced in the
    /// outcome rather than rejected. An already-matched line is refused
    /// unless `supersede` is set, in which case the old match is removed
    /// first.
    pub async fn create_manual_match(
        &mut self,
        reconciliation_id: &str,
        statement_line_id: &str,
        source_type: SourceType,
        source_id: &str,
        amount: BigDecimal,
        matched_by: &str,
        supersede: bool,
    ) -> ReconcileResult<ManualMatchOutcome> {
        let reconciliation = self.lifecycle.require_editable(reconciliation_id).await?;

        let line = self
            .storage
            .get_line(statement_line_id)
            .await?
            .filter(|l| l.statement_id == reconciliation.statement_id)
            .ok_or_else(|| {
                ReconcileError::Validation(format!(
                    "Statement line {statement_line_id} does not belong to this reconciliation"
                ))
            })?;

        let source = self
            .query
            .get_source(source_type, source_id)
            .await?
            .ok_or_else(|| ReconcileError::SourceNotFound(source_id.to_string()))?;
        if source.company_id != reconciliation.company_id {
            return Err(ReconcileError::CrossCompanyReference(format!(
                "{} {source_id} belongs to another company",
                source_type.display_name()
            )));
        }

        let superseded = match self.storage.get_match_for_line(statement_line_id).await? {
            Some(existing) if supersede => {
                self.storage.delete_match(&existing.id).await?;
                self.record_removal_activity(&existing, matched_by, "Superseded")
                    .await?;
                Some(existing)
            }
            Some(existing) => {
                return Err(ReconcileError::LineAlreadyMatched(format!(
                    "line {statement_line_id} is matched by {}",
                    existing.id
                )))
            }
            None => None,
        };

        let mismatch = &line.amount - &amount;
        let amount_mismatch = (mismatch != BigDecimal::from(0)).then_some(mismatch);

        let m = ReconciliationMatch::manual(
            reconciliation_id.to_string(),
            statement_line_id.to_string(),
            source_type,
            source_id.to_string(),
            amount,
            matched_by.to_string(),
        );
        self.storage.insert_match(&m).await?;
        self.storage
            .mark_line_matched(statement_line_id, true)
            .await?;
        self.record_match_activity(&m, matched_by, "Manually matched")
            .await?;
        self.lifecycle.recalculate(reconciliation_id).await?;

        Ok(ManualMatchOutcome {
            created: m,
            superseded,
            amount_mismatch,
        })
    }

    /// Remove a match and free its statement line for rematching
    pub async fn remove_match(&mut self, match_id: &str, actor: &str) -> ReconcileResult<()> {
        let m = self
            .storage
            .get_match(match_id)
            .await?
            .ok_or_else(|| ReconcileError::MatchNotFound(match_id.to_string()))?;
        self.lifecycle.require_editable(&m.reconciliation_id).await?;

        self.storage.delete_match(match_id).await?;
        self.storage
            .mark_line_matched(&m.statement_line_id, false)
            .await?;
        self.record_removal_activity(&m, actor, "Unmatched").await?;
        self.lifecycle.recalculate(&m.reconciliation_id).await?;
        Ok(())
    }

    async fn record_match_activity(
        &mut self,
        m: &ReconciliationMatch,
        actor: &str,
        verb: &str,
    ) -> ReconcileResult<()> {
        let mut details = HashMap::new();
        details.insert("match_id".to_string(), m.id.clone());
        details.insert("statement_line_id".to_string(), m.statement_line_id.clone());
        details.insert("source_id".to_string(), m.source_id.clone());
        details.insert("amount".to_string(), m.amount.to_string());
        if let Some(confidence) = m.confidence {
            details.insert("confidence".to_string(), format!("{confidence:.2}"));
        }
        self.storage
            .record_activity(&ActivityRecord::new(
                m.reconciliation_id.clone(),
                ActivityAction::MatchCreated,
                actor.to_string(),
                format!(
                    "{verb} line to {} {} for {}",
                    m.source_type.display_name(),
                    m.source_id,
                    m.amount
                ),
                details,
            ))
            .await
    }

    async fn record_removal_activity(
        &mut self,
        m: &ReconciliationMatch,
        actor: &str,
        verb: &str,
    ) -> ReconcileResult<()> {
        let mut details = HashMap::new();
        details.insert("match_id".to_string(), m.id.clone());
        details.insert("statement_line_id".to_string(), m.statement_line_id.clone());
        self.storage
            .record_activity(&ActivityRecord::new(
                m.reconciliation_id.clone(),
                ActivityAction::MatchRemoved,
                actor.to_string(),
                format!("{verb} {} {}", m.source_type.display_name(), m.source_id),
                details,
            ))
            .await
    }
}

/// Confidence score for one candidate against one line, in [0, 1].
///
/// Amount agreement carries half the weight, date proximity most of the
/// rest, and a matching reference tops it up. A candidate whose signed
/// amount differs from the line's is capped below the auto-accept
/// threshold regardless of the other signals.
pub fn score_candidate(line: &BankStatementLine, candidate: &SourceRecord) -> f64 {
    let exact_amount = line.amount == candidate.amount;
    let mut score: f64 = 0.0;

    if exact_amount {
        score += 0.5;
    } else if line.amount.abs() == candidate.amount.abs() {
        // Same magnitude, opposite sign: possibly the same transaction seen
        // from the other side of the books
        score += 0.25;
    }

    let gap = (line.transaction_date - candidate.date).num_days().abs();
    if gap == 0 {
        score += 0.4;
    } else if gap <= 3 {
        score += 0.3;
    } else if gap <= MATCH_WINDOW_DAYS {
        score += 0.2;
    }

    if let (Some(line_ref), Some(candidate_ref)) =
        (line.reference_number.as_deref(), candidate.reference.as_deref())
    {
        if !line_ref.is_empty() && line_ref.eq_ignore_ascii_case(candidate_ref) {
            score += 0.1;
        }
    }

    if exact_amount {
        score.min(1.0)
    } else {
        // Date and reference agreement can rank a suggestion but never
        // carry a wrong-amount candidate into auto-accept range
        score.min(AUTO_ACCEPT_THRESHOLD - 0.05)
    }
}

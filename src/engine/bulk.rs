use tracing::info;

use crate::limits::MAX_NOTES_LEN;
use crate::model::*;
use crate::observability;

use super::conflict::has_conflict_in_set;
use super::recurrence::{expand, start_of_day, Candidate};
use super::{ScheduleError, Scheduler};

const BULK_TAG: &str = "(bulk)";
const BULK_CREATOR: &str = "Bulk";

/// Validated, conflict-free set of shifts waiting for confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPlan {
    pub employee_id: String,
    pub candidates: usize,
    pub accepted: Vec<Candidate>,
    pub skipped: usize,
}

impl BulkPlan {
    pub fn summary(&self) -> BulkSummary {
        BulkSummary {
            will_create: self.accepted.len(),
            will_skip: self.skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Created(BulkResult),
    /// The confirmation step said no; nothing was written.
    Declined(BulkSummary),
}

/// Keep candidates, in order, that overlap neither `existing` nor a candidate
/// already kept. Returns the kept ones and how many were dropped.
pub fn partition_candidates(candidates: Vec<Candidate>, existing: &[Span]) -> (Vec<Candidate>, usize) {
    let mut accepted: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut accepted_spans: Vec<Span> = Vec::with_capacity(candidates.len());
    let mut skipped = 0;
    for candidate in candidates {
        let span = candidate.span();
        if has_conflict_in_set(&span, existing) || has_conflict_in_set(&span, &accepted_spans) {
            skipped += 1;
            continue;
        }
        accepted_spans.push(span);
        accepted.push(candidate);
    }
    (accepted, skipped)
}

fn tag_notes(notes: Option<&str>) -> String {
    match notes.map(str::trim) {
        Some(n) if !n.is_empty() => format!("{n} {BULK_TAG}"),
        _ => BULK_TAG.to_string(),
    }
}

impl Scheduler {
    /// Expand `request`, drop every candidate that would overlap, and return
    /// what a commit would write. Reads the store once; writes nothing.
    pub async fn plan_bulk(
        &self,
        request: &BulkRequest,
        created_by: Option<String>,
    ) -> Result<BulkPlan, ScheduleError> {
        let candidates = expand(request, self.offset)?;
        let notes = tag_notes(request.notes.as_deref());
        if notes.len() > MAX_NOTES_LEN {
            return Err(ScheduleError::LimitExceeded("notes too long"));
        }
        let (Some(first), Some(last)) = (candidates.first(), candidates.last()) else {
            metrics::counter!(observability::BULK_PLANS_TOTAL, "status" => "no_candidates")
                .increment(1);
            return Err(ScheduleError::NoCandidates);
        };

        // Calendar days of the range plus anything an overnight candidate spills into.
        let day_after = request
            .date_to
            .succ_opt()
            .ok_or_else(|| ScheduleError::Validation("date out of range".into()))?;
        let window = Span::new(
            start_of_day(request.date_from, self.offset)?.min(first.start),
            start_of_day(day_after, self.offset)?.max(last.end),
        );
        let existing: Vec<Span> = self
            .store
            .find_overlapping(&request.employee_id, window)
            .await?
            .iter()
            .map(Shift::span)
            .collect();

        let total = candidates.len();
        let (mut accepted, skipped) = partition_candidates(candidates, &existing);
        metrics::counter!(observability::BULK_CANDIDATES_TOTAL).increment(total as u64);
        metrics::counter!(observability::BULK_SKIPPED_TOTAL).increment(skipped as u64);
        if accepted.is_empty() {
            metrics::counter!(observability::BULK_PLANS_TOTAL, "status" => "all_skipped")
                .increment(1);
            return Err(ScheduleError::AllSkipped { skipped });
        }

        let created_by = created_by
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| BULK_CREATOR.to_string());
        for shift in &mut accepted {
            shift.notes = Some(notes.clone());
            shift.created_by = Some(created_by.clone());
        }
        metrics::counter!(observability::BULK_PLANS_TOTAL, "status" => "planned").increment(1);
        Ok(BulkPlan {
            employee_id: request.employee_id.clone(),
            candidates: total,
            accepted,
            skipped,
        })
    }

    /// Write every accepted shift in one atomic batch.
    ///
    /// A `Conflict` means another session got there first and nothing was
    /// written; plan again. Any other failure is `OutcomeUnknown`.
    pub async fn commit_bulk(&self, plan: BulkPlan) -> Result<BulkResult, ScheduleError> {
        let skipped = plan.skipped;
        let employee_id = plan.employee_id;
        let created = self
            .store
            .insert_batch(plan.accepted)
            .await
            .map_err(ScheduleError::after_commit)?;
        metrics::counter!(observability::SHIFTS_CREATED_TOTAL, "source" => "bulk")
            .increment(created.len() as u64);
        info!(
            "bulk created {} shifts for {employee_id} ({skipped} skipped)",
            created.len()
        );
        Ok(BulkResult {
            created: created.len(),
            skipped,
        })
    }

    /// Plan, ask `confirm` with the summary, then commit only on yes.
    pub async fn generate_bulk<F>(
        &self,
        request: &BulkRequest,
        created_by: Option<String>,
        confirm: F,
    ) -> Result<BulkOutcome, ScheduleError>
    where
        F: FnOnce(&BulkSummary) -> bool,
    {
        let plan = self.plan_bulk(request, created_by).await?;
        let summary = plan.summary();
        if !confirm(&summary) {
            return Ok(BulkOutcome::Declined(summary));
        }
        self.commit_bulk(plan).await.map(BulkOutcome::Created)
    }
}

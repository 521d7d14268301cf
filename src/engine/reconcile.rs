use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::MAX_PENDING_PROPOSALS;
use crate::model::*;
use crate::observability;

use super::calendar::drag_end;
use super::conflict::{validate_new_shift, validate_shift};
use super::{ScheduleError, Scheduler};

const SYSTEM_CREATOR: &str = "System";

/// The client-side calendar a session is editing.
///
/// Edits are shown optimistically; the reconciler calls back when the store
/// disagrees.
pub trait CalendarSurface: Send + Sync {
    /// Move the event for `shift_id` back to `prior`.
    fn revert(&self, shift_id: Ulid, prior: Span);
    /// Re-fetch the visible window from the store.
    fn refresh(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Proposed,
    Validating,
    Committed,
    RejectedRevert,
}

#[derive(Debug, Clone)]
enum Change {
    Create(NewShift),
    Edit {
        shift_id: Ulid,
        prior: Span,
        employee_id: String,
        span: Span,
        patch: ShiftPatch,
    },
}

#[derive(Debug, Clone)]
struct Proposal {
    change: Change,
    state: ProposalState,
}

/// Why an edit was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub reason: &'static str,
    pub conflicting_shift_id: Ulid,
    /// Absent for a rejected create.
    pub shift_id: Option<Ulid>,
    /// Where the surface was told to put the event back.
    pub restore: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Committed(Shift),
    Reverted(Rejection),
}

/// Per-session state machine for interactive edits:
/// `Proposed → Validating → Committed | RejectedRevert`.
///
/// Every proposal is checked against a fresh store read when it is resolved,
/// never against what the surface currently displays.
pub struct Reconciler {
    scheduler: Arc<Scheduler>,
    surface: Arc<dyn CalendarSurface>,
    pending: HashMap<Ulid, Proposal>,
    /// Final states of recently resolved tokens, oldest first.
    settled: VecDeque<(Ulid, ProposalState)>,
}

impl Reconciler {
    pub fn new(scheduler: Arc<Scheduler>, surface: Arc<dyn CalendarSurface>) -> Self {
        Self {
            scheduler,
            surface,
            pending: HashMap::new(),
            settled: VecDeque::new(),
        }
    }

    /// Where `token` is in its lifecycle. Resolved tokens are remembered for
    /// the last `MAX_PENDING_PROPOSALS` resolutions.
    pub fn state(&self, token: &Ulid) -> Option<ProposalState> {
        self.pending.get(token).map(|p| p.state).or_else(|| {
            self.settled
                .iter()
                .find(|(t, _)| t == token)
                .map(|(_, state)| *state)
        })
    }

    fn settle(&mut self, token: Ulid, state: ProposalState) {
        self.pending.remove(&token);
        if self.settled.len() >= MAX_PENDING_PROPOSALS {
            self.settled.pop_front();
        }
        self.settled.push_back((token, state));
    }

    fn check_capacity(&self) -> Result<(), ScheduleError> {
        if self.pending.len() >= MAX_PENDING_PROPOSALS {
            return Err(ScheduleError::LimitExceeded("too many pending proposals"));
        }
        Ok(())
    }

    fn park(&mut self, change: Change) -> Ulid {
        let token = Ulid::new();
        self.pending.insert(
            token,
            Proposal {
                change,
                state: ProposalState::Proposed,
            },
        );
        token
    }

    /// Queue a new shift. Shape errors surface here, before any store access.
    pub fn propose_create(&mut self, mut shift: NewShift) -> Result<Ulid, ScheduleError> {
        validate_new_shift(&shift)?;
        self.check_capacity()?;
        if shift.created_by.as_deref().is_none_or(|c| c.trim().is_empty()) {
            shift.created_by = Some(SYSTEM_CREATOR.to_string());
        }
        Ok(self.park(Change::Create(shift)))
    }

    /// Queue a drag to `[start, end)`. A missing end falls back to one day
    /// for all-day events, one hour otherwise.
    pub async fn propose_move(
        &mut self,
        shift_id: Ulid,
        start: Ms,
        end: Option<Ms>,
        all_day: bool,
    ) -> Result<Ulid, ScheduleError> {
        let end = drag_end(start, end, all_day);
        self.propose_edit(shift_id, ShiftPatch::reschedule(Span { start, end }))
            .await
    }

    /// Queue a resize to `[start, end)`.
    pub async fn propose_resize(
        &mut self,
        shift_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Ulid, ScheduleError> {
        self.propose_edit(shift_id, ShiftPatch::reschedule(Span { start, end }))
            .await
    }

    /// Queue an arbitrary patch. Claims the shift until resolved or dropped.
    pub async fn propose_edit(
        &mut self,
        shift_id: Ulid,
        patch: ShiftPatch,
    ) -> Result<Ulid, ScheduleError> {
        self.check_capacity()?;
        let current = match self.scheduler.store.get(shift_id).await {
            Ok(shift) => shift,
            Err(e @ ScheduleError::NotFound(_)) => {
                self.surface.refresh();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let updated = patch.apply(&current);
        let token = Ulid::new();
        let span = match validate_shift(&updated)
            .and_then(|span| self.scheduler.claim(shift_id, token).map(|()| span))
        {
            Ok(span) => span,
            Err(e) => {
                self.surface.revert(shift_id, current.span());
                return Err(e);
            }
        };
        self.pending.insert(
            token,
            Proposal {
                change: Change::Edit {
                    shift_id,
                    prior: current.span(),
                    employee_id: updated.employee_id,
                    span,
                    patch,
                },
                state: ProposalState::Proposed,
            },
        );
        debug!("proposal {token} claims shift {shift_id}");
        Ok(token)
    }

    /// Validate the proposal against the store and commit or roll it back.
    ///
    /// The proposal stays `Validating` until the store answers; if this future
    /// is dropped before then, the token can be resolved again.
    pub async fn resolve(&mut self, token: Ulid) -> Result<Resolution, ScheduleError> {
        let proposal = self
            .pending
            .get_mut(&token)
            .ok_or(ScheduleError::UnknownProposal(token))?;
        proposal.state = ProposalState::Validating;
        let change = proposal.change.clone();

        let result = match change {
            Change::Create(shift) => self.resolve_create(shift).await,
            Change::Edit {
                shift_id,
                prior,
                employee_id,
                span,
                patch,
            } => {
                let result = self
                    .resolve_edit(shift_id, prior, &employee_id, span, patch)
                    .await;
                self.scheduler.release(shift_id, token);
                result
            }
        };
        let state = match &result {
            Ok(Resolution::Committed(_)) => ProposalState::Committed,
            Ok(Resolution::Reverted(_)) | Err(_) => ProposalState::RejectedRevert,
        };
        debug!("proposal {token} → {state:?}");
        self.settle(token, state);
        result
    }

    async fn resolve_create(&self, shift: NewShift) -> Result<Resolution, ScheduleError> {
        let span = shift.span();
        if let Some(conflicting) = self
            .scheduler
            .store
            .find_conflict(&shift.employee_id, span, None)
            .await?
        {
            return Ok(self.rejected(conflicting, None, None, "create"));
        }
        match self.scheduler.store.insert(shift).await {
            Ok(created) => {
                metrics::counter!(observability::SHIFTS_CREATED_TOTAL, "source" => "single")
                    .increment(1);
                info!("created shift {} for {}", created.id, created.employee_id);
                self.surface.refresh();
                Ok(Resolution::Committed(created))
            }
            Err(ScheduleError::Conflict { shift_id }) => {
                Ok(self.rejected(shift_id, None, None, "create"))
            }
            Err(e) => Err(self.commit_failed(e)),
        }
    }

    async fn resolve_edit(
        &self,
        shift_id: Ulid,
        prior: Span,
        employee_id: &str,
        span: Span,
        patch: ShiftPatch,
    ) -> Result<Resolution, ScheduleError> {
        let conflict = match self
            .scheduler
            .store
            .find_conflict(employee_id, span, Some(shift_id))
            .await
        {
            Ok(conflict) => conflict,
            Err(e) => {
                self.surface.revert(shift_id, prior);
                return Err(e);
            }
        };
        if let Some(conflicting) = conflict {
            self.surface.revert(shift_id, prior);
            return Ok(self.rejected(conflicting, Some(shift_id), Some(prior), "edit"));
        }
        match self.scheduler.store.update(shift_id, patch).await {
            Ok(updated) => {
                info!("updated shift {shift_id}");
                self.surface.refresh();
                Ok(Resolution::Committed(updated))
            }
            Err(ScheduleError::Conflict { shift_id: conflicting }) => {
                self.surface.revert(shift_id, prior);
                Ok(self.rejected(conflicting, Some(shift_id), Some(prior), "edit"))
            }
            Err(e @ ScheduleError::NotFound(_)) => {
                self.surface.refresh();
                Err(e)
            }
            Err(e) => Err(self.commit_failed(e)),
        }
    }

    fn rejected(
        &self,
        conflicting_shift_id: Ulid,
        shift_id: Option<Ulid>,
        restore: Option<Span>,
        op: &'static str,
    ) -> Resolution {
        metrics::counter!(observability::CONFLICTS_TOTAL, "op" => op).increment(1);
        Resolution::Reverted(Rejection {
            reason: "overlap",
            conflicting_shift_id,
            shift_id,
            restore,
        })
    }

    /// The store may or may not hold the write; only a re-fetch can tell.
    fn commit_failed(&self, e: ScheduleError) -> ScheduleError {
        let e = e.after_commit();
        warn!("commit failed: {e}");
        self.surface.refresh();
        e
    }

    /// Remove a shift. `confirmed` is the user's answer to the delete prompt.
    pub async fn delete(&mut self, shift_id: Ulid, confirmed: bool) -> Result<Shift, ScheduleError> {
        if !confirmed {
            return Err(ScheduleError::Validation(
                "deletion must be confirmed".into(),
            ));
        }
        if self.scheduler.is_claimed(&shift_id) {
            return Err(ScheduleError::Busy(shift_id));
        }
        match self.scheduler.store.delete(shift_id).await {
            Ok(deleted) => {
                info!("deleted shift {shift_id}");
                self.surface.refresh();
                Ok(deleted)
            }
            Err(e @ ScheduleError::NotFound(_)) => {
                self.surface.refresh();
                Err(e)
            }
            Err(e) => Err(self.commit_failed(e)),
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        for (token, proposal) in self.pending.drain() {
            if let Change::Edit { shift_id, .. } = proposal.change {
                self.scheduler.release(shift_id, token);
            }
        }
    }
}

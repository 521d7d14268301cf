use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Bad input, rejected before any store access.
    Validation(String),
    LimitExceeded(&'static str),
    /// The interval would overlap this existing shift.
    Conflict { shift_id: Ulid },
    NotFound(Ulid),
    /// The shift already has an unresolved edit.
    Busy(Ulid),
    UnknownProposal(Ulid),
    /// The recurrence matched no dates at all.
    NoCandidates,
    /// Every candidate overlapped an existing or earlier shift.
    AllSkipped { skipped: usize },
    /// A read against the store failed.
    Store(String),
    /// A commit call failed; some or all of it may have been persisted.
    OutcomeUnknown(String),
}

impl ScheduleError {
    /// Stable reason code reported to the calendar surface.
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::Validation(_) => "validation",
            ScheduleError::LimitExceeded(_) => "limit_exceeded",
            ScheduleError::Conflict { .. } => "overlap",
            ScheduleError::NotFound(_) => "not_found",
            ScheduleError::Busy(_) => "busy",
            ScheduleError::UnknownProposal(_) => "unknown_proposal",
            ScheduleError::NoCandidates => "no_candidates",
            ScheduleError::AllSkipped { .. } => "all_skipped",
            ScheduleError::Store(_) => "store_error",
            ScheduleError::OutcomeUnknown(_) => "outcome_unknown",
        }
    }

    /// The user can fix the input or accept the result; the view stays usable as is.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ScheduleError::Store(_) | ScheduleError::OutcomeUnknown(_) | ScheduleError::NotFound(_)
        )
    }

    /// Rewrap a failed commit call. Conflicts and missing rows are definite answers;
    /// anything else leaves the persisted state unknown.
    pub(crate) fn after_commit(self) -> Self {
        match self {
            ScheduleError::Store(msg) => ScheduleError::OutcomeUnknown(msg),
            other => other,
        }
    }
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::Validation(msg) => write!(f, "invalid input: {msg}"),
            ScheduleError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            ScheduleError::Conflict { shift_id } => {
                write!(f, "overlaps existing shift: {shift_id}")
            }
            ScheduleError::NotFound(id) => write!(f, "shift not found: {id}"),
            ScheduleError::Busy(id) => write!(f, "shift {id} has an edit in progress"),
            ScheduleError::UnknownProposal(token) => write!(f, "unknown proposal: {token}"),
            ScheduleError::NoCandidates => {
                write!(f, "nothing to generate: no dates in range match the selected weekdays")
            }
            ScheduleError::AllSkipped { skipped } => write!(
                f,
                "nothing to generate: all {skipped} candidate shifts overlap existing shifts"
            ),
            ScheduleError::Store(e) => write!(f, "store error: {e}"),
            ScheduleError::OutcomeUnknown(e) => {
                write!(f, "commit failed, outcome unknown (re-fetch before retrying): {e}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

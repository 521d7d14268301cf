use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::ScheduleError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// In-memory overlap test against intervals that are not persisted yet.
pub fn has_conflict_in_set(candidate: &Span, existing: &[Span]) -> bool {
    existing.iter().any(|s| s.overlaps(candidate))
}

/// First shift overlapping `candidate`, ignoring `exclude`.
pub fn first_conflict<'a>(
    candidate: &Span,
    shifts: impl IntoIterator<Item = &'a Shift>,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    shifts
        .into_iter()
        .find(|s| Some(s.id) != exclude && s.span().overlaps(candidate))
        .map(|s| s.id)
}

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, ScheduleError> {
    let span = Span::checked(start, end)
        .ok_or_else(|| ScheduleError::Validation("end must be after start".into()))?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(ScheduleError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SHIFT_DURATION_MS {
        return Err(ScheduleError::LimitExceeded("shift too long"));
    }
    Ok(span)
}

pub(crate) fn validate_employee_id(employee_id: &str) -> Result<(), ScheduleError> {
    if employee_id.trim().is_empty() {
        return Err(ScheduleError::Validation("employee is required".into()));
    }
    if employee_id.len() > MAX_EMPLOYEE_ID_LEN {
        return Err(ScheduleError::LimitExceeded("employee id too long"));
    }
    Ok(())
}

fn validate_text(notes: Option<&str>, created_by: Option<&str>) -> Result<(), ScheduleError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(ScheduleError::LimitExceeded("notes too long"));
    }
    if created_by.is_some_and(|c| c.len() > MAX_CREATED_BY_LEN) {
        return Err(ScheduleError::LimitExceeded("created_by too long"));
    }
    Ok(())
}

pub(crate) fn validate_new_shift(shift: &NewShift) -> Result<Span, ScheduleError> {
    validate_employee_id(&shift.employee_id)?;
    validate_text(shift.notes.as_deref(), shift.created_by.as_deref())?;
    validate_span(shift.start, shift.end)
}

pub(crate) fn validate_shift(shift: &Shift) -> Result<Span, ScheduleError> {
    validate_employee_id(&shift.employee_id)?;
    validate_text(shift.notes.as_deref(), shift.created_by.as_deref())?;
    validate_span(shift.start, shift.end)
}

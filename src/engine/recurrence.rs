use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone};

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate_employee_id, validate_span};
use super::ScheduleError;

/// A shift the bulk generator will try to create.
pub type Candidate = NewShift;

/// Parse a wall-clock `HH:MM`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ScheduleError::Validation(format!("time must be HH:MM, got {s:?}")))
}

fn instant(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Result<Ms, ScheduleError> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| ScheduleError::Validation(format!("invalid local time {date} {time}")))
}

/// Expand a recurrence into one candidate per matching date, ascending.
///
/// A window whose end time is earlier than its start time runs overnight and
/// ends on the following date. Dates and times are wall-clock in `offset`.
pub fn expand(request: &BulkRequest, offset: FixedOffset) -> Result<Vec<Candidate>, ScheduleError> {
    validate_employee_id(&request.employee_id)?;
    if request.notes.as_deref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(ScheduleError::LimitExceeded("notes too long"));
    }
    if request.date_from > request.date_to {
        return Err(ScheduleError::Validation(
            "dateFrom must not be after dateTo".into(),
        ));
    }
    let days = (request.date_to - request.date_from).num_days() + 1;
    if days > MAX_BULK_RANGE_DAYS {
        return Err(ScheduleError::LimitExceeded("date range too long"));
    }
    if request.weekdays.is_empty() {
        return Err(ScheduleError::Validation("select at least one weekday".into()));
    }
    if let Some(bad) = request.weekdays.iter().find(|d| **d > 6) {
        return Err(ScheduleError::Validation(format!(
            "weekday {bad} out of range (0 = Sunday .. 6 = Saturday)"
        )));
    }
    let time_start = parse_time_of_day(&request.time_start)?;
    let time_end = parse_time_of_day(&request.time_end)?;
    if time_start == time_end {
        return Err(ScheduleError::Validation(
            "start and end time are equal: zero-length shift".into(),
        ));
    }
    let overnight = time_end < time_start;

    let mut candidates = Vec::new();
    for date in request.date_from.iter_days().take(days as usize) {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        if !request.weekdays.contains(&weekday) {
            continue;
        }
        let end_date = if overnight {
            date.succ_opt()
                .ok_or_else(|| ScheduleError::Validation("date out of range".into()))?
        } else {
            date
        };
        let span = validate_span(
            instant(date, time_start, offset)?,
            instant(end_date, time_end, offset)?,
        )?;
        candidates.push(Candidate {
            employee_id: request.employee_id.clone(),
            shift_type: request.shift_type,
            start: span.start,
            end: span.end,
            notes: request.notes.clone(),
            created_by: None,
        });
    }
    Ok(candidates)
}

/// Midnight starting `date`, in `offset`.
pub(crate) fn start_of_day(date: NaiveDate, offset: FixedOffset) -> Result<Ms, ScheduleError> {
    instant(date, NaiveTime::MIN, offset)
}

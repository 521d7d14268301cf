use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::directory::short_name;
use crate::model::*;

use super::conflict::{validate_employee_id, validate_span};
use super::recurrence::start_of_day;
use super::{ScheduleError, Scheduler};

/// End to use when a drag or drop arrives without one. Saturates, so an
/// out-of-range start is left for span validation to reject.
pub fn drag_end(start: Ms, end: Option<Ms>, all_day: bool) -> Ms {
    match end {
        Some(end) => end,
        None if all_day => start.saturating_add(DAY_MS),
        None => start.saturating_add(HOUR_MS),
    }
}

fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), ScheduleError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ScheduleError::Validation(format!("no such month: {year}-{month:02}")))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| ScheduleError::Validation(format!("no such month: {year}-{month:02}")))?;
    Ok((first, next))
}

impl Scheduler {
    /// Shifts overlapping `[start, end)`, as calendar events titled
    /// `"<short name> - <TYPE>"`.
    pub async fn calendar_window(
        &self,
        start: Ms,
        end: Ms,
        employee_id: Option<&str>,
    ) -> Result<Vec<CalendarEvent>, ScheduleError> {
        let window = Span::checked(start, end)
            .ok_or_else(|| ScheduleError::Validation("window end must be after start".into()))?;
        let shifts = self.store.list_window(window, employee_id).await?;
        let employees: HashMap<String, Employee> = self
            .directory
            .list_employees()
            .await?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        Ok(shifts
            .into_iter()
            .map(|s| {
                let name = short_name(&s.employee_id, employees.get(&s.employee_id));
                CalendarEvent {
                    id: s.id,
                    title: format!("{name} - {}", s.shift_type.label()),
                    start: s.start,
                    end: s.end,
                    all_day: s.shift_type.is_all_day(),
                    employee_id: s.employee_id,
                    shift_type: s.shift_type,
                    notes: s.notes,
                }
            })
            .collect())
    }

    /// Totals for shifts of `employee_id` starting in the given month.
    pub async fn month_stats(
        &self,
        employee_id: &str,
        year: i32,
        month: u32,
    ) -> Result<MonthStats, ScheduleError> {
        validate_employee_id(employee_id)?;
        let (first, next) = month_bounds(year, month)?;
        let month_span = Span::new(
            start_of_day(first, self.offset)?,
            start_of_day(next, self.offset)?,
        );
        let shifts = self
            .store
            .list_window(month_span, Some(employee_id))
            .await?;

        let mut stats = MonthStats::default();
        for s in shifts.iter().filter(|s| month_span.contains_instant(s.start)) {
            let hours = s.span().duration_ms() as f64 / HOUR_MS as f64;
            match s.shift_type {
                ShiftType::Regular => stats.regular_hours += hours,
                ShiftType::Overtime => stats.overtime_hours += hours,
                ShiftType::Vacation => stats.vacation_days += 1,
                ShiftType::StudyLeave => stats.study_days += 1,
            }
        }
        Ok(stats)
    }

    /// Draft for a range the user selected on the calendar.
    pub fn select_range(
        &self,
        start: Ms,
        end: Ms,
        employee_id: Option<&str>,
    ) -> Result<ShiftDraft, ScheduleError> {
        let span = validate_span(start, end)?;
        Ok(ShiftDraft {
            employee_id: employee_id.unwrap_or_default().to_string(),
            shift_type: ShiftType::Regular,
            start: span.start,
            end: span.end,
            notes: String::new(),
        })
    }

    /// Draft starting at the top of the current hour, eight hours long.
    pub fn draft_now(&self, now: Ms, employee_id: Option<&str>) -> ShiftDraft {
        let offset_ms = self.offset.local_minus_utc() as Ms * 1000;
        let local = now + offset_ms;
        let start = local - local.rem_euclid(HOUR_MS) - offset_ms;
        ShiftDraft {
            employee_id: employee_id.unwrap_or_default().to_string(),
            shift_type: ShiftType::Regular,
            start,
            end: start + 8 * HOUR_MS,
            notes: String::new(),
        }
    }

    /// Full record behind a clicked event, for the edit form.
    pub async fn event_click(&self, shift_id: Ulid) -> Result<Shift, ScheduleError> {
        self.store.get(shift_id).await
    }
}

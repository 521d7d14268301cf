use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC), the only timestamp type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShiftType {
    Regular,
    Overtime,
    Vacation,
    StudyLeave,
}

impl ShiftType {
    /// Absence-style shifts occupy whole days on the calendar.
    pub fn is_all_day(&self) -> bool {
        matches!(self, ShiftType::Vacation | ShiftType::StudyLeave)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ShiftType::Regular => "REGULAR",
            ShiftType::Overtime => "OVERTIME",
            ShiftType::Vacation => "VACATION",
            ShiftType::StudyLeave => "STUDY LEAVE",
        }
    }
}

/// A persisted shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: Ulid,
    pub employee_id: String,
    #[serde(rename = "type")]
    pub shift_type: ShiftType,
    pub start: Ms,
    pub end: Ms,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

impl Shift {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// A shift that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShift {
    pub employee_id: String,
    #[serde(rename = "type")]
    pub shift_type: ShiftType,
    pub start: Ms,
    pub end: Ms,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewShift {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub(crate) fn into_shift(self, id: Ulid) -> Shift {
        Shift {
            id,
            employee_id: self.employee_id,
            shift_type: self.shift_type,
            start: self.start,
            end: self.end,
            notes: self.notes,
            created_by: self.created_by,
        }
    }
}

/// Replacement values for an existing shift. `created_by` is not patchable.
/// An empty `notes` string clears the notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShiftPatch {
    pub employee_id: Option<String>,
    #[serde(rename = "type")]
    pub shift_type: Option<ShiftType>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub notes: Option<String>,
}

impl ShiftPatch {
    pub fn reschedule(span: Span) -> Self {
        Self {
            start: Some(span.start),
            end: Some(span.end),
            ..Self::default()
        }
    }

    /// The shift as it would look after this patch.
    pub fn apply(&self, shift: &Shift) -> Shift {
        let notes = match &self.notes {
            Some(n) if n.is_empty() => None,
            Some(n) => Some(n.clone()),
            None => shift.notes.clone(),
        };
        Shift {
            id: shift.id,
            employee_id: self
                .employee_id
                .clone()
                .unwrap_or_else(|| shift.employee_id.clone()),
            shift_type: self.shift_type.unwrap_or(shift.shift_type),
            start: self.start.unwrap_or(shift.start),
            end: self.end.unwrap_or(shift.end),
            notes,
            created_by: shift.created_by.clone(),
        }
    }
}

/// All shifts of one employee, sorted by `start`.
#[derive(Debug, Clone)]
pub struct EmployeeShifts {
    pub employee_id: String,
    pub shifts: Vec<Shift>,
}

impl EmployeeShifts {
    pub fn new(employee_id: String) -> Self {
        Self {
            employee_id,
            shifts: Vec::new(),
        }
    }

    /// Insert shift maintaining sort order by start.
    pub fn insert_shift(&mut self, shift: Shift) {
        let pos = self
            .shifts
            .binary_search_by_key(&shift.start, |s| s.start)
            .unwrap_or_else(|e| e);
        self.shifts.insert(pos, shift);
    }

    pub fn remove_shift(&mut self, id: Ulid) -> Option<Shift> {
        let pos = self.shifts.iter().position(|s| s.id == id)?;
        Some(self.shifts.remove(pos))
    }

    /// Shifts overlapping the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Shift> {
        let right_bound = self.shifts.partition_point(|s| s.start < query.end);
        self.shifts[..right_bound]
            .iter()
            .filter(move |s| s.end > query.start)
    }
}

/// WAL record format. A batch insert is a single record so it replays all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ShiftsInserted {
        shifts: Vec<Shift>,
    },
    ShiftUpdated {
        previous_employee_id: String,
        shift: Shift,
    },
    ShiftDeleted {
        id: Ulid,
        employee_id: String,
    },
}

// ── Directory & calendar types ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub display_name: Option<String>,
    pub role: Option<String>,
}

/// A shift rendered for the calendar surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: Ulid,
    pub title: String,
    pub start: Ms,
    pub end: Ms,
    pub all_day: bool,
    pub employee_id: String,
    #[serde(rename = "type")]
    pub shift_type: ShiftType,
    pub notes: Option<String>,
}

/// Pre-filled values for the create form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftDraft {
    pub employee_id: String,
    #[serde(rename = "type")]
    pub shift_type: ShiftType,
    pub start: Ms,
    pub end: Ms,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthStats {
    pub regular_hours: f64,
    pub overtime_hours: f64,
    pub vacation_days: u32,
    pub study_days: u32,
}

// ── Bulk generation ──────────────────────────────────────────────

/// Recurring-shift request. Weekdays are 0 = Sunday .. 6 = Saturday,
/// times are wall-clock `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub employee_id: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub weekdays: BTreeSet<u8>,
    pub time_start: String,
    pub time_end: String,
    pub shift_type: ShiftType,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub will_create: usize,
    pub will_skip: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub created: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(start: Ms, end: Ms) -> Shift {
        Shift {
            id: Ulid::new(),
            employee_id: "bob@x.com".into(),
            shift_type: ShiftType::Regular,
            start,
            end,
            notes: None,
            created_by: None,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
        assert!(a.contains_instant(100));
        assert!(!a.contains_instant(200));
    }

    #[test]
    fn span_checked_rejects_empty_and_inverted() {
        assert!(Span::checked(100, 100).is_none());
        assert!(Span::checked(200, 100).is_none());
        assert_eq!(Span::checked(100, 101), Some(Span::new(100, 101)));
    }

    #[test]
    fn shift_type_wire_names() {
        let names: Vec<String> = [
            ShiftType::Regular,
            ShiftType::Overtime,
            ShiftType::Vacation,
            ShiftType::StudyLeave,
        ]
        .iter()
        .map(|t| serde_json::to_string(t).unwrap())
        .collect();
        assert_eq!(
            names,
            vec!["\"regular\"", "\"overtime\"", "\"vacation\"", "\"studyLeave\""]
        );
        assert!(ShiftType::Vacation.is_all_day());
        assert!(!ShiftType::Overtime.is_all_day());
    }

    #[test]
    fn shifts_stay_sorted() {
        let mut es = EmployeeShifts::new("bob@x.com".into());
        es.insert_shift(shift(300, 400));
        es.insert_shift(shift(100, 200));
        es.insert_shift(shift(200, 300));
        let starts: Vec<Ms> = es.shifts.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_missing_shift_is_none() {
        let mut es = EmployeeShifts::new("bob@x.com".into());
        es.insert_shift(shift(100, 200));
        assert!(es.remove_shift(Ulid::new()).is_none());
        assert_eq!(es.shifts.len(), 1);
    }

    #[test]
    fn overlapping_window() {
        let mut es = EmployeeShifts::new("bob@x.com".into());
        es.insert_shift(shift(100, 200));
        es.insert_shift(shift(450, 600));
        es.insert_shift(shift(1000, 1100));

        let hits: Vec<_> = es.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start, 450);

        // ending exactly at query.start is not overlapping
        assert_eq!(es.overlapping(&Span::new(200, 450)).count(), 0);
        // one long shift spanning the whole query
        es.insert_shift(shift(0, 10_000));
        assert_eq!(es.overlapping(&Span::new(700, 800)).count(), 1);
    }

    #[test]
    fn patch_keeps_creator_and_clears_notes() {
        let mut original = shift(100, 200);
        original.notes = Some("front desk".into());
        original.created_by = Some("Ana".into());

        let patch = ShiftPatch {
            notes: Some(String::new()),
            shift_type: Some(ShiftType::Overtime),
            ..ShiftPatch::default()
        };
        let patched = patch.apply(&original);
        assert_eq!(patched.notes, None);
        assert_eq!(patched.shift_type, ShiftType::Overtime);
        assert_eq!(patched.created_by.as_deref(), Some("Ana"));
        assert_eq!(patched.span(), original.span());

        let moved = ShiftPatch::reschedule(Span::new(300, 500)).apply(&original);
        assert_eq!((moved.start, moved.end), (300, 500));
        assert_eq!(moved.notes.as_deref(), Some("front desk"));
    }

    #[test]
    fn shift_json_uses_type_key() {
        let json = serde_json::to_value(shift(1, 2)).unwrap();
        assert_eq!(json["type"], "regular");
        assert_eq!(json["employeeId"], "bob@x.com");
        assert!(json.get("createdBy").is_some());
    }

    #[test]
    fn bulk_request_from_json() {
        let req: BulkRequest = serde_json::from_str(
            r#"{"employeeId":"bob@x.com","dateFrom":"2025-03-03","dateTo":"2025-03-07",
                "weekdays":[1,2,3,4,5],"timeStart":"09:00","timeEnd":"17:00",
                "shiftType":"regular"}"#,
        )
        .unwrap();
        assert_eq!(req.weekdays.len(), 5);
        assert_eq!(req.notes, None);
        assert_eq!(req.date_from, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
    }

    #[test]
    fn event_bincode_roundtrip() {
        let event = Event::ShiftsInserted {
            shifts: vec![shift(100, 200), shift(300, 400)],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

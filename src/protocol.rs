//! JSON-lines messages between a calendar client and the server.
//!
//! One request per line, tagged by `op`. The server answers each request with
//! exactly one response line, preceded by any surface notices (`revert`,
//! `refresh`) the request caused.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{Rejection, ScheduleError};
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListEmployees,
    #[serde(rename_all = "camelCase")]
    CalendarWindow {
        start: Ms,
        end: Ms,
        #[serde(default)]
        employee_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SelectRange {
        start: Ms,
        end: Ms,
        #[serde(default)]
        employee_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DraftNow {
        #[serde(default)]
        employee_id: Option<String>,
    },
    EventClick {
        id: Ulid,
    },
    ProposeCreate {
        shift: NewShift,
    },
    #[serde(rename_all = "camelCase")]
    EventDrag {
        id: Ulid,
        start: Ms,
        #[serde(default)]
        end: Option<Ms>,
        #[serde(default)]
        all_day: bool,
    },
    EventResize {
        id: Ulid,
        start: Ms,
        end: Ms,
    },
    ProposeEdit {
        id: Ulid,
        patch: ShiftPatch,
    },
    Resolve {
        token: Ulid,
    },
    Delete {
        id: Ulid,
        #[serde(default)]
        confirmed: bool,
    },
    #[serde(rename_all = "camelCase")]
    PlanBulk {
        request: BulkRequest,
        #[serde(default)]
        created_by: Option<String>,
    },
    ConfirmBulk {
        plan: Ulid,
    },
    CancelBulk {
        plan: Ulid,
    },
    #[serde(rename_all = "camelCase")]
    Stats {
        employee_id: String,
        year: i32,
        month: u32,
    },
}

/// Engine-initiated instruction for the client's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    Revert { id: Ulid, start: Ms, end: Ms },
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok(Payload),
    #[serde(rename_all = "camelCase")]
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conflicting_shift_id: Option<Ulid>,
    },
}

/// Successful result bodies, flattened into the `ok` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Employees {
        employees: Vec<Employee>,
    },
    Events {
        events: Vec<CalendarEvent>,
    },
    Draft {
        draft: ShiftDraft,
    },
    Shift {
        shift: Shift,
    },
    Proposal {
        token: Ulid,
    },
    Committed {
        committed: Shift,
    },
    Rejected {
        rejected: Rejection,
    },
    Deleted {
        deleted: Ulid,
    },
    #[serde(rename_all = "camelCase")]
    BulkPlanned {
        plan: Ulid,
        summary: BulkSummary,
    },
    BulkCreated {
        result: BulkResult,
    },
    Cancelled {
        cancelled: Ulid,
    },
    Stats {
        stats: MonthStats,
    },
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Response::Error {
            code: "bad_request",
            message: message.into(),
            conflicting_shift_id: None,
        }
    }
}

impl From<ScheduleError> for Response {
    fn from(e: ScheduleError) -> Self {
        let conflicting_shift_id = match &e {
            ScheduleError::Conflict { shift_id } => Some(*shift_id),
            _ => None,
        };
        Response::Error {
            code: e.code(),
            message: e.to_string(),
            conflicting_shift_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_requests() {
        let req: Request = serde_json::from_str(r#"{"op":"list_employees"}"#).unwrap();
        assert_eq!(req, Request::ListEmployees);

        let id = Ulid::new();
        let line = format!(r#"{{"op":"event_drag","id":"{id}","start":3600000,"allDay":true}}"#);
        let req: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(
            req,
            Request::EventDrag {
                id,
                start: 3_600_000,
                end: None,
                all_day: true
            }
        );

        let req: Request = serde_json::from_str(
            r#"{"op":"plan_bulk","request":{"employeeId":"bob@x.com","dateFrom":"2025-03-03",
                "dateTo":"2025-03-07","weekdays":[1,2,3,4,5],"timeStart":"09:00",
                "timeEnd":"17:00","shiftType":"regular"}}"#,
        )
        .unwrap();
        let Request::PlanBulk { request, created_by } = req else {
            panic!("expected plan_bulk");
        };
        assert_eq!(request.weekdays.len(), 5);
        assert_eq!(created_by, None);
    }

    #[test]
    fn rejects_unknown_op() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_table"}"#).is_err());
    }

    #[test]
    fn conflict_response_names_blocking_shift() {
        let blocking = Ulid::new();
        let resp = Response::from(ScheduleError::Conflict { shift_id: blocking });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["code"], "overlap");
        assert_eq!(json["conflictingShiftId"], blocking.to_string());
    }

    #[test]
    fn ok_payload_is_flattened() {
        let resp = Response::Ok(Payload::BulkCreated {
            result: BulkResult {
                created: 4,
                skipped: 1,
            },
        });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["result"]["created"], 4);
        assert_eq!(json["result"]["skipped"], 1);

        let notice = serde_json::to_string(&Notice::Refresh).unwrap();
        assert_eq!(notice, r#"{"notice":"refresh"}"#);
    }
}

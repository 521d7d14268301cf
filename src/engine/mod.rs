mod bulk;
mod calendar;
pub mod conflict;
mod error;
mod recurrence;
mod reconcile;

pub use bulk::{partition_candidates, BulkOutcome, BulkPlan};
pub use calendar::drag_end;
pub use conflict::{first_conflict, has_conflict_in_set};
pub use error::ScheduleError;
pub use recurrence::{expand, parse_time_of_day, Candidate};
pub use reconcile::{
    CalendarSurface, ProposalState, Reconciler, Rejection, Resolution,
};

use std::sync::Arc;

use chrono::FixedOffset;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ulid::Ulid;

use crate::directory::EmployeeDirectory;
use crate::model::*;
use crate::store::ShiftStore;

use conflict::{validate_employee_id, validate_span};

/// Shared entry point for every scheduling operation.
///
/// Holds no shift data of its own: every decision is made against a fresh
/// read from the store. The only state is the set of shifts with an
/// unresolved interactive edit, so the same shift can't be edited twice at once.
pub struct Scheduler {
    store: Arc<dyn ShiftStore>,
    directory: Arc<dyn EmployeeDirectory>,
    /// Wall-clock offset used to turn dates and `HH:MM` times into instants.
    offset: FixedOffset,
    /// shift id → token of the proposal editing it
    in_flight: DashMap<Ulid, Ulid>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ShiftStore>,
        directory: Arc<dyn EmployeeDirectory>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            directory,
            offset,
            in_flight: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ShiftStore> {
        &self.store
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub async fn list_employees(&self) -> Result<Vec<Employee>, ScheduleError> {
        self.directory.list_employees().await
    }

    /// Blocking shift for `[start, end)`, if any. `exclude` skips the shift being edited.
    pub async fn find_conflict(
        &self,
        employee_id: &str,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, ScheduleError> {
        validate_employee_id(employee_id)?;
        let span = validate_span(start, end)?;
        self.store.find_conflict(employee_id, span, exclude).await
    }

    pub async fn has_conflict(
        &self,
        employee_id: &str,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, ScheduleError> {
        Ok(self
            .find_conflict(employee_id, start, end, exclude)
            .await?
            .is_some())
    }

    pub(crate) fn claim(&self, shift_id: Ulid, token: Ulid) -> Result<(), ScheduleError> {
        match self.in_flight.entry(shift_id) {
            Entry::Occupied(_) => Err(ScheduleError::Busy(shift_id)),
            Entry::Vacant(v) => {
                v.insert(token);
                Ok(())
            }
        }
    }

    pub(crate) fn release(&self, shift_id: Ulid, token: Ulid) {
        self.in_flight.remove_if(&shift_id, |_, t| *t == token);
    }

    pub(crate) fn is_claimed(&self, shift_id: &Ulid) -> bool {
        self.in_flight.contains_key(shift_id)
    }
}

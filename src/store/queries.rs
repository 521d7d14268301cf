use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::ScheduleError;
use crate::limits::*;
use crate::model::*;

use super::{ShiftStore, WalShiftStore};

fn check_window(window: &Span) -> Result<(), ScheduleError> {
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(ScheduleError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

#[async_trait]
impl ShiftStore for WalShiftStore {
    async fn find_overlapping(
        &self,
        employee_id: &str,
        window: Span,
    ) -> Result<Vec<Shift>, ScheduleError> {
        check_window(&window)?;
        let Some(es) = self.index.employee(employee_id) else {
            return Ok(Vec::new());
        };
        let guard = es.read().await;
        Ok(guard.overlapping(&window).cloned().collect())
    }

    async fn find_conflict(
        &self,
        employee_id: &str,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, ScheduleError> {
        let Some(es) = self.index.employee(employee_id) else {
            return Ok(None);
        };
        let guard = es.read().await;
        Ok(crate::engine::conflict::first_conflict(
            &span,
            guard.overlapping(&span),
            exclude,
        ))
    }

    async fn get(&self, id: Ulid) -> Result<Shift, ScheduleError> {
        let owner = self.index.owner_of(&id).ok_or(ScheduleError::NotFound(id))?;
        let es = self.index.employee(&owner).ok_or(ScheduleError::NotFound(id))?;
        let guard = es.read().await;
        guard
            .shifts
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(ScheduleError::NotFound(id))
    }

    async fn list_window(
        &self,
        window: Span,
        employee_id: Option<&str>,
    ) -> Result<Vec<Shift>, ScheduleError> {
        check_window(&window)?;
        let lists = match employee_id {
            Some(id) => self
                .index
                .employee(id)
                .map(|es| vec![(id.to_string(), es)])
                .unwrap_or_default(),
            None => self.index.all_employees(),
        };
        let mut shifts = Vec::new();
        for (_, es) in lists {
            let guard = es.read().await;
            shifts.extend(guard.overlapping(&window).cloned());
        }
        shifts.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        Ok(shifts)
    }

    async fn insert(&self, shift: NewShift) -> Result<Shift, ScheduleError> {
        self.insert_one(shift).await
    }

    async fn insert_batch(&self, shifts: Vec<NewShift>) -> Result<Vec<Shift>, ScheduleError> {
        self.insert_many(shifts).await
    }

    async fn update(&self, id: Ulid, patch: ShiftPatch) -> Result<Shift, ScheduleError> {
        self.update_one(id, patch).await
    }

    async fn delete(&self, id: Ulid) -> Result<Shift, ScheduleError> {
        self.delete_one(id).await
    }
}

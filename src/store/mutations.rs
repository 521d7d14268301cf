use std::collections::BTreeMap;

use tokio::sync::{oneshot, OwnedRwLockWriteGuard};
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::conflict::{first_conflict, validate_new_shift, validate_shift};
use crate::engine::ScheduleError;
use crate::limits::*;
use crate::model::*;

use super::{WalCommand, WalShiftStore};

fn check_capacity(es: &EmployeeShifts, adding: usize) -> Result<(), ScheduleError> {
    if es.shifts.len() + adding > MAX_SHIFTS_PER_EMPLOYEE {
        return Err(ScheduleError::LimitExceeded("too many shifts for employee"));
    }
    Ok(())
}

fn check_no_overlap(
    es: &EmployeeShifts,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), ScheduleError> {
    match first_conflict(span, es.overlapping(span), exclude) {
        Some(shift_id) => Err(ScheduleError::Conflict { shift_id }),
        None => Ok(()),
    }
}

impl WalShiftStore {
    pub(super) async fn insert_one(&self, new: NewShift) -> Result<Shift, ScheduleError> {
        let span = validate_new_shift(&new)?;
        let _gate = self.gate.read().await;
        let es = self.index.employee_or_insert(&new.employee_id);
        let mut guard = es.write().await;
        check_capacity(&guard, 1)?;
        check_no_overlap(&guard, &span, None)?;

        let shift = new.into_shift(Ulid::new());
        self.wal_append(Event::ShiftsInserted {
            shifts: vec![shift.clone()],
        })
        .await?;
        self.index.record_insert(&mut guard, shift.clone());
        debug!("inserted shift {} for {}", shift.id, shift.employee_id);
        Ok(shift)
    }

    /// Validate every shift against stored state and the rest of the batch, then
    /// write the whole batch as one log record.
    pub(super) async fn insert_many(&self, batch: Vec<NewShift>) -> Result<Vec<Shift>, ScheduleError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(ScheduleError::LimitExceeded("batch too large"));
        }
        let mut by_employee: BTreeMap<String, Vec<(Span, NewShift)>> = BTreeMap::new();
        for new in batch {
            let span = validate_new_shift(&new)?;
            by_employee
                .entry(new.employee_id.clone())
                .or_default()
                .push((span, new));
        }

        let _gate = self.gate.read().await;
        // BTreeMap order = sorted lock order, so concurrent batches can't deadlock.
        let mut guards: Vec<OwnedRwLockWriteGuard<EmployeeShifts>> = Vec::with_capacity(by_employee.len());
        for (employee_id, items) in &by_employee {
            let guard = self.index.employee_or_insert(employee_id).write_owned().await;
            check_capacity(&guard, items.len())?;
            for (i, (span, _)) in items.iter().enumerate() {
                check_no_overlap(&guard, span, None)?;
                if items[..i].iter().any(|(earlier, _)| earlier.overlaps(span)) {
                    return Err(ScheduleError::Validation(format!(
                        "batch contains overlapping shifts for {employee_id}"
                    )));
                }
            }
            guards.push(guard);
        }

        let mut shifts = Vec::new();
        for items in by_employee.into_values() {
            for (_, new) in items {
                shifts.push(new.into_shift(Ulid::new()));
            }
        }
        self.wal_append(Event::ShiftsInserted {
            shifts: shifts.clone(),
        })
        .await?;

        let mut guard_idx = 0;
        for shift in &shifts {
            while guards[guard_idx].employee_id != shift.employee_id {
                guard_idx += 1;
            }
            self.index.record_insert(&mut guards[guard_idx], shift.clone());
        }
        info!("inserted batch of {} shifts", shifts.len());
        Ok(shifts)
    }

    pub(super) async fn update_one(&self, id: Ulid, patch: ShiftPatch) -> Result<Shift, ScheduleError> {
        let _gate = self.gate.read().await;
        // Read before locking: a reassignment landing in between makes the
        // lookup below miss, and the caller sees NotFound rather than a retry.
        let owner = self.index.owner_of(&id).ok_or(ScheduleError::NotFound(id))?;
        let target = patch.employee_id.clone().unwrap_or_else(|| owner.clone());

        if target == owner {
            let es = self.index.employee(&owner).ok_or(ScheduleError::NotFound(id))?;
            let mut guard = es.write().await;
            let current = guard
                .shifts
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or(ScheduleError::NotFound(id))?;
            let updated = patch.apply(&current);
            let span = validate_shift(&updated)?;
            check_no_overlap(&guard, &span, Some(id))?;

            self.wal_append(Event::ShiftUpdated {
                previous_employee_id: owner,
                shift: updated.clone(),
            })
            .await?;
            guard.remove_shift(id);
            guard.insert_shift(updated.clone());
            debug!("updated shift {id}");
            return Ok(updated);
        }

        // Reassignment: lock both employees in sorted order.
        let source = self.index.employee(&owner).ok_or(ScheduleError::NotFound(id))?;
        let dest = self.index.employee_or_insert(&target);
        let (mut src, mut dst) = if owner < target {
            let s = source.write_owned().await;
            (s, dest.write_owned().await)
        } else {
            let d = dest.write_owned().await;
            (source.write_owned().await, d)
        };
        let current = src
            .shifts
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(ScheduleError::NotFound(id))?;
        let updated = patch.apply(&current);
        let span = validate_shift(&updated)?;
        check_capacity(&dst, 1)?;
        check_no_overlap(&dst, &span, Some(id))?;

        self.wal_append(Event::ShiftUpdated {
            previous_employee_id: owner.clone(),
            shift: updated.clone(),
        })
        .await?;
        self.index.record_remove(&mut src, id);
        self.index.record_insert(&mut dst, updated.clone());
        info!("moved shift {id} from {owner} to {target}");
        Ok(updated)
    }

    pub(super) async fn delete_one(&self, id: Ulid) -> Result<Shift, ScheduleError> {
        let _gate = self.gate.read().await;
        // Read before locking: a reassignment landing in between makes the
        // lookup below miss, and the caller sees NotFound rather than a retry.
        let owner = self.index.owner_of(&id).ok_or(ScheduleError::NotFound(id))?;
        let es = self.index.employee(&owner).ok_or(ScheduleError::NotFound(id))?;
        let mut guard = es.write().await;
        if !guard.shifts.iter().any(|s| s.id == id) {
            return Err(ScheduleError::NotFound(id));
        }
        self.wal_append(Event::ShiftDeleted {
            id,
            employee_id: owner,
        })
        .await?;
        let removed = self
            .index
            .record_remove(&mut guard, id)
            .ok_or(ScheduleError::NotFound(id))?;
        debug!("deleted shift {id}");
        Ok(removed)
    }

    /// Rewrite the log as insert records of at most `MAX_BATCH_SIZE` shifts each.
    pub async fn compact_wal(&self) -> Result<(), ScheduleError> {
        let _gate = self.gate.write().await;
        let mut events = Vec::new();
        for (_, es) in self.index.all_employees() {
            let guard = es.read().await;
            for chunk in guard.shifts.chunks(MAX_BATCH_SIZE) {
                events.push(Event::ShiftsInserted {
                    shifts: chunk.to_vec(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| ScheduleError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| ScheduleError::Store("WAL writer dropped response".into()))?
            .map_err(|e| ScheduleError::Store(format!("WAL compaction failed: {e}")))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

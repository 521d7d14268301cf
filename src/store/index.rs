use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedEmployeeShifts = Arc<RwLock<EmployeeShifts>>;

/// Per-employee shift lists plus the shift id → employee lookup.
pub struct ShiftIndex {
    employees: DashMap<String, SharedEmployeeShifts>,
    owners: DashMap<Ulid, String>,
}

impl Default for ShiftIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ShiftIndex {
    pub fn new() -> Self {
        Self {
            employees: DashMap::new(),
            owners: DashMap::new(),
        }
    }

    /// Rebuild from a replayed log. Runs before the index is shared, so no locks are taken.
    pub fn from_events(events: &[Event]) -> Self {
        let mut lists: HashMap<String, EmployeeShifts> = HashMap::new();
        let mut owners: HashMap<Ulid, String> = HashMap::new();
        for event in events {
            match event {
                Event::ShiftsInserted { shifts } => {
                    for shift in shifts {
                        owners.insert(shift.id, shift.employee_id.clone());
                        lists
                            .entry(shift.employee_id.clone())
                            .or_insert_with(|| EmployeeShifts::new(shift.employee_id.clone()))
                            .insert_shift(shift.clone());
                    }
                }
                Event::ShiftUpdated {
                    previous_employee_id,
                    shift,
                } => {
                    if let Some(es) = lists.get_mut(previous_employee_id) {
                        es.remove_shift(shift.id);
                    }
                    owners.insert(shift.id, shift.employee_id.clone());
                    lists
                        .entry(shift.employee_id.clone())
                        .or_insert_with(|| EmployeeShifts::new(shift.employee_id.clone()))
                        .insert_shift(shift.clone());
                }
                Event::ShiftDeleted { id, employee_id } => {
                    if let Some(es) = lists.get_mut(employee_id) {
                        es.remove_shift(*id);
                    }
                    owners.remove(id);
                }
            }
        }

        let index = Self::new();
        for (employee_id, es) in lists {
            index.employees.insert(employee_id, Arc::new(RwLock::new(es)));
        }
        for (id, employee_id) in owners {
            index.owners.insert(id, employee_id);
        }
        index
    }

    pub fn employee(&self, employee_id: &str) -> Option<SharedEmployeeShifts> {
        self.employees.get(employee_id).map(|e| e.value().clone())
    }

    pub fn employee_or_insert(&self, employee_id: &str) -> SharedEmployeeShifts {
        self.employees
            .entry(employee_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(EmployeeShifts::new(employee_id.to_string()))))
            .value()
            .clone()
    }

    /// Snapshot of every employee list, sorted by employee id.
    pub fn all_employees(&self) -> Vec<(String, SharedEmployeeShifts)> {
        let mut all: Vec<_> = self
            .employees
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn owner_of(&self, shift_id: &Ulid) -> Option<String> {
        self.owners.get(shift_id).map(|e| e.value().clone())
    }

    pub fn shift_count(&self) -> usize {
        self.owners.len()
    }

    /// Caller holds the write lock on `es`.
    pub fn record_insert(&self, es: &mut EmployeeShifts, shift: Shift) {
        self.owners.insert(shift.id, es.employee_id.clone());
        es.insert_shift(shift);
    }

    /// Caller holds the write lock on `es`.
    pub fn record_remove(&self, es: &mut EmployeeShifts, id: Ulid) -> Option<Shift> {
        let removed = es.remove_shift(id)?;
        self.owners.remove(&id);
        Some(removed)
    }
}

//! Shift repository: the only code that touches persisted shifts.
//!
//! `WalShiftStore` keeps every employee's shifts in memory, sorted by start, and
//! makes each mutation durable through a group-commit write-ahead log before
//! applying it. It enforces the non-overlap invariant itself: inserts and
//! updates re-check overlap under the employee's write lock, so two sessions
//! racing past the engine's pre-check end up with one `Conflict` instead of two
//! overlapping shifts.

mod index;
mod mutations;
mod queries;

pub use index::{SharedEmployeeShifts, ShiftIndex};

use std::io;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::engine::ScheduleError;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

/// Query shapes and mutations the scheduling engine needs from persistence.
#[async_trait]
pub trait ShiftStore: Send + Sync {
    /// Shifts of `employee_id` with `start < window.end && end > window.start`.
    async fn find_overlapping(
        &self,
        employee_id: &str,
        window: Span,
    ) -> Result<Vec<Shift>, ScheduleError>;

    /// First shift of `employee_id` overlapping `span`, skipping `exclude`.
    async fn find_conflict(
        &self,
        employee_id: &str,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, ScheduleError> {
        let existing = self.find_overlapping(employee_id, span).await?;
        Ok(existing
            .into_iter()
            .find(|s| Some(s.id) != exclude)
            .map(|s| s.id))
    }

    async fn get(&self, id: Ulid) -> Result<Shift, ScheduleError>;

    /// Shifts overlapping `window`, optionally for one employee, ordered by start.
    async fn list_window(
        &self,
        window: Span,
        employee_id: Option<&str>,
    ) -> Result<Vec<Shift>, ScheduleError>;

    async fn insert(&self, shift: NewShift) -> Result<Shift, ScheduleError>;

    /// All-or-nothing: either every shift is stored or none is.
    async fn insert_batch(&self, shifts: Vec<NewShift>) -> Result<Vec<Shift>, ScheduleError>;

    async fn update(&self, id: Ulid, patch: ShiftPatch) -> Result<Shift, ScheduleError>;

    async fn delete(&self, id: Ulid) -> Result<Shift, ScheduleError>;
}

// ── Group-commit WAL writer ──────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while one fsync is running are
/// written together and share the next fsync.
struct WalWriter {
    wal: Wal,
    rx: mpsc::Receiver<WalCommand>,
}

impl WalWriter {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            let mut batch: Vec<PendingAppend> = Vec::new();
            let mut deferred = None;
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => deferred = Some(other),
            }
            while deferred.is_none() {
                match self.rx.try_recv() {
                    Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                    Ok(other) => deferred = Some(other),
                    Err(_) => break,
                }
            }
            if !batch.is_empty() {
                self.commit(batch);
            }
            if let Some(cmd) = deferred {
                self.handle_other(cmd);
            }
        }
    }

    fn commit(&mut self, batch: Vec<PendingAppend>) {
        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = Instant::now();

        let mut result = Ok(());
        for (event, _) in &batch {
            if let Err(e) = self.wal.append_buffered(event) {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            result = self.wal.flush_sync();
        }
        // A failed batch must not leave partial frames in front of the next one.
        if let Err(e) = &result {
            tracing::error!("WAL append failed, rolling back batch: {e}");
            if let Err(rollback) = self.wal.rollback() {
                tracing::error!("WAL rollback failed: {rollback}");
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let reply = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(reply);
        }
    }

    fn handle_other(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Compact { events, response } => {
                let result = Wal::write_compact_file(self.wal.path(), &events)
                    .and_then(|()| self.wal.swap_compact_file());
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(self.wal.appends_since_compact());
            }
            WalCommand::Append { event, response } => self.commit(vec![(event, response)]),
        }
    }
}

pub struct WalShiftStore {
    pub(super) index: ShiftIndex,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss a concurrent append.
    pub(super) gate: RwLock<()>,
}

impl WalShiftStore {
    /// Replay the log at `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, rx) = mpsc::channel(4096);
        tokio::spawn(WalWriter { wal, rx }.run());

        let index = ShiftIndex::from_events(&events);
        tracing::info!(
            "opened shift store {} ({} records, {} shifts)",
            wal_path.display(),
            events.len(),
            index.shift_count()
        );
        Ok(Self {
            index,
            wal_tx,
            gate: RwLock::new(()),
        })
    }

    pub fn shift_count(&self) -> usize {
        self.index.shift_count()
    }

    pub(super) async fn wal_append(&self, event: Event) -> Result<(), ScheduleError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| ScheduleError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| ScheduleError::Store("WAL writer dropped response".into()))?
            .map_err(|e| ScheduleError::Store(format!("WAL write failed: {e}")))
    }
}

//! Newline-delimited JSON sessions over TCP.
//!
//! Each connection is one calendar session: it owns a [`Reconciler`] for its
//! interactive edits and the bulk plans waiting for its confirmation. Both go
//! away with the connection.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use ulid::Ulid;

use crate::engine::conflict::now_ms;
use crate::engine::{BulkPlan, CalendarSurface, Reconciler, Resolution, ScheduleError, Scheduler};
use crate::limits::{MAX_LINE_LEN, MAX_PENDING_BULK_PLANS};
use crate::model::*;
use crate::observability;
use crate::protocol::{Notice, Payload, Request, Response};

/// Calendar surface that queues notices for the connection to write out.
struct ChannelSurface {
    tx: mpsc::UnboundedSender<Notice>,
}

impl CalendarSurface for ChannelSurface {
    fn revert(&self, shift_id: Ulid, prior: Span) {
        let _ = self.tx.send(Notice::Revert {
            id: shift_id,
            start: prior.start,
            end: prior.end,
        });
    }

    fn refresh(&self) {
        let _ = self.tx.send(Notice::Refresh);
    }
}

struct Session {
    scheduler: Arc<Scheduler>,
    surface: Arc<ChannelSurface>,
    reconciler: Reconciler,
    notices: mpsc::UnboundedReceiver<Notice>,
    bulk_plans: HashMap<Ulid, BulkPlan>,
}

impl Session {
    fn new(scheduler: Arc<Scheduler>) -> Self {
        let (tx, notices) = mpsc::unbounded_channel();
        let surface = Arc::new(ChannelSurface { tx });
        Self {
            reconciler: Reconciler::new(scheduler.clone(), surface.clone()),
            scheduler,
            surface,
            notices,
            bulk_plans: HashMap::new(),
        }
    }

    fn drain_notices(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }

    async fn handle(&mut self, req: Request) -> Response {
        match self.execute(req).await {
            Ok(payload) => Response::Ok(payload),
            Err(e) => e.into(),
        }
    }

    async fn execute(&mut self, req: Request) -> Result<Payload, ScheduleError> {
        let s = &self.scheduler;
        match req {
            Request::ListEmployees => Ok(Payload::Employees {
                employees: s.list_employees().await?,
            }),
            Request::CalendarWindow {
                start,
                end,
                employee_id,
            } => Ok(Payload::Events {
                events: s.calendar_window(start, end, employee_id.as_deref()).await?,
            }),
            Request::SelectRange {
                start,
                end,
                employee_id,
            } => Ok(Payload::Draft {
                draft: s.select_range(start, end, employee_id.as_deref())?,
            }),
            Request::DraftNow { employee_id } => Ok(Payload::Draft {
                draft: s.draft_now(now_ms(), employee_id.as_deref()),
            }),
            Request::EventClick { id } => Ok(Payload::Shift {
                shift: s.event_click(id).await?,
            }),
            Request::ProposeCreate { shift } => Ok(Payload::Proposal {
                token: self.reconciler.propose_create(shift)?,
            }),
            Request::EventDrag {
                id,
                start,
                end,
                all_day,
            } => Ok(Payload::Proposal {
                token: self.reconciler.propose_move(id, start, end, all_day).await?,
            }),
            Request::EventResize { id, start, end } => Ok(Payload::Proposal {
                token: self.reconciler.propose_resize(id, start, end).await?,
            }),
            Request::ProposeEdit { id, patch } => Ok(Payload::Proposal {
                token: self.reconciler.propose_edit(id, patch).await?,
            }),
            Request::Resolve { token } => match self.reconciler.resolve(token).await? {
                Resolution::Committed(shift) => Ok(Payload::Committed { committed: shift }),
                Resolution::Reverted(rejection) => Ok(Payload::Rejected {
                    rejected: rejection,
                }),
            },
            Request::Delete { id, confirmed } => Ok(Payload::Deleted {
                deleted: self.reconciler.delete(id, confirmed).await?.id,
            }),
            Request::PlanBulk {
                request,
                created_by,
            } => {
                if self.bulk_plans.len() >= MAX_PENDING_BULK_PLANS {
                    return Err(ScheduleError::LimitExceeded("too many pending bulk plans"));
                }
                let plan = s.plan_bulk(&request, created_by).await?;
                let summary = plan.summary();
                let id = Ulid::new();
                self.bulk_plans.insert(id, plan);
                Ok(Payload::BulkPlanned { plan: id, summary })
            }
            Request::ConfirmBulk { plan } => {
                let pending = self
                    .bulk_plans
                    .remove(&plan)
                    .ok_or(ScheduleError::UnknownProposal(plan))?;
                let result = s.commit_bulk(pending).await;
                if !matches!(result, Err(ScheduleError::Conflict { .. })) {
                    self.surface.refresh();
                }
                Ok(Payload::BulkCreated { result: result? })
            }
            Request::CancelBulk { plan } => {
                self.bulk_plans
                    .remove(&plan)
                    .ok_or(ScheduleError::UnknownProposal(plan))?;
                Ok(Payload::Cancelled { cancelled: plan })
            }
            Request::Stats {
                employee_id,
                year,
                month,
            } => Ok(Payload::Stats {
                stats: s.month_stats(&employee_id, year, month).await?,
            }),
        }
    }
}

fn status_label(resp: &Response) -> &'static str {
    match resp {
        Response::Ok(_) => "ok",
        Response::Error { code, .. } => *code,
    }
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, scheduler: Arc<Scheduler>) -> io::Result<()> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut session = Session::new(scheduler);

    while let Some(line) = lines.next().await {
        let response = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match serde_json::from_str::<Request>(&line) {
                Ok(req) => {
                    let op = observability::op_label(&req);
                    let started = Instant::now();
                    let resp = session.handle(req).await;
                    let status = status_label(&resp);
                    debug!("{op} → {status}");
                    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status)
                        .increment(1);
                    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
                        .record(started.elapsed().as_secs_f64());
                    resp
                }
                Err(e) => Response::bad_request(format!("malformed request: {e}")),
            },
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Response::bad_request(format!("request line longer than {MAX_LINE_LEN} bytes"))
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };

        for notice in session.drain_notices() {
            lines
                .send(serde_json::to_string(&notice)?)
                .await
                .map_err(codec_err)?;
        }
        lines
            .send(serde_json::to_string(&response)?)
            .await
            .map_err(codec_err)?;
    }
    Ok(())
}

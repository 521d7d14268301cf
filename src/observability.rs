use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "shiftd_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "shiftd_request_duration_seconds";

// ── Scheduling outcomes ─────────────────────────────────────────

/// Counter: shifts written. Labels: source (single, bulk).
pub const SHIFTS_CREATED_TOTAL: &str = "shiftd_shifts_created_total";

/// Counter: edits or creates rejected for overlap. Labels: op.
pub const CONFLICTS_TOTAL: &str = "shiftd_conflicts_total";

/// Counter: bulk plans by result. Labels: status.
pub const BULK_PLANS_TOTAL: &str = "shiftd_bulk_plans_total";

/// Counter: candidates produced by recurrence expansion.
pub const BULK_CANDIDATES_TOTAL: &str = "shiftd_bulk_candidates_total";

/// Counter: candidates dropped because they overlapped.
pub const BULK_SKIPPED_TOTAL: &str = "shiftd_bulk_skipped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "shiftd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "shiftd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "shiftd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shiftd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shiftd_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "shiftd_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::ListEmployees => "list_employees",
        Request::CalendarWindow { .. } => "calendar_window",
        Request::SelectRange { .. } => "select_range",
        Request::DraftNow { .. } => "draft_now",
        Request::EventClick { .. } => "event_click",
        Request::ProposeCreate { .. } => "propose_create",
        Request::EventDrag { .. } => "event_drag",
        Request::EventResize { .. } => "event_resize",
        Request::ProposeEdit { .. } => "propose_edit",
        Request::Resolve { .. } => "resolve",
        Request::Delete { .. } => "delete",
        Request::PlanBulk { .. } => "plan_bulk",
        Request::ConfirmBulk { .. } => "confirm_bulk",
        Request::CancelBulk { .. } => "cancel_bulk",
        Request::Stats { .. } => "stats",
    }
}

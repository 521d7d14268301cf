use std::net::SocketAddr;
use std::sync::Arc;

use chrono::FixedOffset;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use shiftd::directory::StaticDirectory;
use shiftd::engine::Scheduler;
use shiftd::model::Employee;
use shiftd::store::WalShiftStore;
use shiftd::wire;

// ── Test infrastructure ──────────────────────────────────────

/// 2025-03-03T00:00:00Z, a Monday.
const MONDAY: i64 = 1_740_960_000_000;
const H: i64 = 3_600_000;

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("shiftd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(WalShiftStore::open(dir.join("shifts.wal")).unwrap());
    let directory = Arc::new(StaticDirectory::new(vec![Employee {
        id: "bob@x.com".into(),
        display_name: Some("Bob Stone".into()),
        role: None,
    }]));
    let scheduler = Arc::new(Scheduler::new(
        store,
        directory,
        FixedOffset::east_opt(0).unwrap(),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, scheduler).await;
            });
        }
    });

    addr
}

struct Client {
    lines: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            lines: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn send_raw(&mut self, line: &str) -> (Vec<Value>, Value) {
        self.lines.send(line.to_string()).await.unwrap();
        let mut notices = Vec::new();
        loop {
            let line = self.lines.next().await.unwrap().unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            if value.get("status").is_some() {
                return (notices, value);
            }
            notices.push(value);
        }
    }

    /// Send a request; returns the notices written before the response, and the response.
    async fn call(&mut self, req: Value) -> (Vec<Value>, Value) {
        self.send_raw(&req.to_string()).await
    }

    async fn create(&mut self, start: i64, end: i64) -> Value {
        let (_, proposed) = self
            .call(json!({
                "op": "propose_create",
                "shift": {"employeeId": "bob@x.com", "type": "regular", "start": start, "end": end}
            }))
            .await;
        assert_eq!(proposed["status"], "ok", "{proposed}");
        let (_, resolved) = self
            .call(json!({"op": "resolve", "token": proposed["token"]}))
            .await;
        assert_eq!(resolved["status"], "ok", "{resolved}");
        resolved["committed"].clone()
    }
}

fn bulk_week() -> Value {
    json!({
        "employeeId": "bob@x.com",
        "dateFrom": "2025-03-03",
        "dateTo": "2025-03-07",
        "weekdays": [1, 2, 3, 4, 5],
        "timeStart": "09:00",
        "timeEnd": "17:00",
        "shiftType": "regular"
    })
}

// ── Sessions ─────────────────────────────────────────────────

#[tokio::test]
async fn bulk_plan_confirm_over_the_wire() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    client.create(MONDAY + 9 * H, MONDAY + 17 * H).await;

    let (_, planned) = client
        .call(json!({"op": "plan_bulk", "request": bulk_week()}))
        .await;
    assert_eq!(planned["status"], "ok", "{planned}");
    assert_eq!(planned["summary"]["willCreate"], 4);
    assert_eq!(planned["summary"]["willSkip"], 1);

    let (notices, created) = client
        .call(json!({"op": "confirm_bulk", "plan": planned["plan"]}))
        .await;
    assert_eq!(created["result"]["created"], 4);
    assert_eq!(created["result"]["skipped"], 1);
    assert_eq!(notices, vec![json!({"notice": "refresh"})]);

    let (_, window) = client
        .call(json!({"op": "calendar_window", "start": MONDAY, "end": MONDAY + 7 * 24 * H}))
        .await;
    let events = window["events"].as_array().unwrap();
    assert_eq!(events.len(), 5);
    assert_eq!(events[0]["title"], "Bob - REGULAR");

    // Plan is consumed by the confirm.
    let (_, again) = client
        .call(json!({"op": "confirm_bulk", "plan": planned["plan"]}))
        .await;
    assert_eq!(again["code"], "unknown_proposal");

    let (_, skipped) = client
        .call(json!({"op": "plan_bulk", "request": bulk_week()}))
        .await;
    assert_eq!(skipped["code"], "all_skipped");
}

#[tokio::test]
async fn rejected_drag_sends_revert_first() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let first = client.create(MONDAY + 9 * H, MONDAY + 17 * H).await;
    let second = client.create(MONDAY + 18 * H, MONDAY + 20 * H).await;

    let (_, proposed) = client
        .call(json!({
            "op": "event_drag",
            "id": second["id"],
            "start": MONDAY + 16 * H,
            "end": MONDAY + 18 * H
        }))
        .await;
    let (notices, resolved) = client
        .call(json!({"op": "resolve", "token": proposed["token"]}))
        .await;

    assert_eq!(
        notices,
        vec![json!({
            "notice": "revert",
            "id": second["id"],
            "start": MONDAY + 18 * H,
            "end": MONDAY + 20 * H
        })]
    );
    assert_eq!(resolved["status"], "ok");
    assert_eq!(resolved["rejected"]["reason"], "overlap");
    assert_eq!(resolved["rejected"]["conflictingShiftId"], first["id"]);

    let (_, clicked) = client
        .call(json!({"op": "event_click", "id": second["id"]}))
        .await;
    assert_eq!(clicked["shift"]["start"], MONDAY + 18 * H);
}

#[tokio::test]
async fn bad_lines_do_not_end_the_session() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let (_, resp) = client.send_raw("{not json").await;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["code"], "bad_request");

    let (_, resp) = client.call(json!({"op": "drop_table"})).await;
    assert_eq!(resp["code"], "bad_request");

    let (_, resp) = client
        .call(json!({"op": "delete", "id": Ulid::new().to_string(), "confirmed": true}))
        .await;
    assert_eq!(resp["code"], "not_found");

    let (_, employees) = client.call(json!({"op": "list_employees"})).await;
    assert_eq!(employees["employees"][0]["displayName"], "Bob Stone");
}

#[tokio::test]
async fn bulk_plans_belong_to_their_connection() {
    let addr = start_test_server().await;
    let mut planner = Client::connect(addr).await;
    let mut other = Client::connect(addr).await;

    let (_, planned) = planner
        .call(json!({"op": "plan_bulk", "request": bulk_week()}))
        .await;
    let (_, stolen) = other
        .call(json!({"op": "confirm_bulk", "plan": planned["plan"]}))
        .await;
    assert_eq!(stolen["code"], "unknown_proposal");

    let (_, cancelled) = planner
        .call(json!({"op": "cancel_bulk", "plan": planned["plan"]}))
        .await;
    assert_eq!(cancelled["cancelled"], planned["plan"]);

    let (_, stats) = planner
        .call(json!({"op": "stats", "employeeId": "bob@x.com", "year": 2025, "month": 3}))
        .await;
    assert_eq!(stats["stats"]["regularHours"], 0.0);
}

#[tokio::test]
async fn second_session_sees_busy_shift() {
    let addr = start_test_server().await;
    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;

    let shift = first.create(MONDAY + 9 * H, MONDAY + 17 * H).await;
    let (_, proposed) = first
        .call(json!({"op": "event_resize", "id": shift["id"], "start": MONDAY + 9 * H, "end": MONDAY + 18 * H}))
        .await;
    assert_eq!(proposed["status"], "ok");

    let (_, busy) = second
        .call(json!({"op": "event_resize", "id": shift["id"], "start": MONDAY + 8 * H, "end": MONDAY + 17 * H}))
        .await;
    assert_eq!(busy["code"], "busy");

    // Closing the first session releases its claim.
    drop(first);
    let mut released = false;
    for _ in 0..50 {
        let (_, resp) = second
            .call(json!({"op": "event_resize", "id": shift["id"], "start": MONDAY + 8 * H, "end": MONDAY + 17 * H}))
            .await;
        if resp["status"] == "ok" {
            released = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(released);
}

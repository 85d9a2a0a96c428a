use laf::broker::DispatchTable;
use laf::error::{busy_reply, worker_died_reply};
use laf::framing::{read_frame, read_json_frame, write_frame, write_json_frame};
use laf::request::{Request, RequestParts};
use laf::worker::{DispatchEnvelope, WorkerReply};
use serde_json::json;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;

fn envelope(verb: &str) -> DispatchEnvelope {
    DispatchEnvelope {
        request: Request::new(RequestParts {
            lone: "foo".to_string(),
            verb: verb.to_string(),
            obj: Some(json!({"val": 1})),
            ..RequestParts::default()
        }),
        auth: None,
        version: Some("v3".to_string()),
    }
}

#[test]
fn frames_cross_a_socket_pair() {
    let (mut a, mut b) = UnixStream::pair().unwrap();
    write_frame(&mut a, b"Worker-123").unwrap();
    write_frame(&mut a, b"READY").unwrap();
    write_json_frame(&mut a, &envelope("get_foo")).unwrap();
    drop(a);

    assert_eq!(read_frame(&mut b).unwrap().unwrap(), b"Worker-123");
    assert_eq!(read_frame(&mut b).unwrap().unwrap(), b"READY");
    let received: DispatchEnvelope = read_json_frame(&mut b).unwrap().unwrap();
    assert_eq!(received.request.lone, "foo");
    assert_eq!(received.request.verb, "get_foo");
    // Clean EOF at a frame boundary.
    assert!(read_frame(&mut b).unwrap().is_none());
}

#[test]
fn worker_reply_roundtrip() {
    let (mut a, mut b) = UnixStream::pair().unwrap();
    let reply = WorkerReply {
        resp: json!({"ok": true}),
        code: 200,
    };
    write_json_frame(&mut a, &reply).unwrap();
    let received: WorkerReply = read_json_frame(&mut b).unwrap().unwrap();
    assert_eq!(received.code, 200);
    assert_eq!(received.resp, json!({"ok": true}));
}

/// Two workers, three concurrent clients: the third is told the server is
/// busy, never queued.
#[test]
fn third_client_is_rejected_busy() {
    let mut table: DispatchTable<mpsc::Sender<Vec<u8>>> = DispatchTable::new();
    table.ready("Worker-1");
    table.ready("Worker-2");

    let (tx1, _rx1) = mpsc::channel();
    let (tx2, _rx2) = mpsc::channel();
    let (tx3, _rx3) = mpsc::channel();
    assert_eq!(table.assign(tx1).as_deref(), Some("Worker-1"));
    assert_eq!(table.assign(tx2).as_deref(), Some("Worker-2"));
    assert!(table.assign(tx3).is_none());
    assert_eq!(busy_reply(), json!({"status": "Try again server busy"}));
}

/// A worker dying mid-request owes its client exactly one synthesized 500;
/// a replacement restores the pool.
#[test]
fn dead_worker_settles_its_client() {
    let mut table: DispatchTable<mpsc::Sender<Vec<u8>>> = DispatchTable::new();
    table.ready("Worker-1");

    let (tx, rx) = mpsc::channel();
    assert_eq!(table.assign(tx).as_deref(), Some("Worker-1"));

    // SIGCHLD path: remove the worker, settle the client.
    let slot = table.remove("Worker-1").expect("client was assigned");
    let reply = json!({ "resp": worker_died_reply(), "code": 500 });
    slot.send(serde_json::to_vec(&reply).unwrap()).unwrap();

    let received: serde_json::Value = serde_json::from_slice(&rx.recv().unwrap()).unwrap();
    assert_eq!(received["code"], 500);
    assert_eq!(received["resp"]["status"], "internal server error");
    // Exactly one reply.
    assert!(rx.try_recv().is_err());

    // The respawned worker registers and serves the next request.
    table.ready("Worker-7");
    let (tx2, _rx2) = mpsc::channel();
    assert_eq!(table.assign(tx2).as_deref(), Some("Worker-7"));
}

/// Full request/reply cycle over the table: assign, reply, READY, reuse.
#[test]
fn reply_then_ready_cycle() {
    let mut table: DispatchTable<mpsc::Sender<Vec<u8>>> = DispatchTable::new();
    table.ready("Worker-1");

    let (tx, rx) = mpsc::channel();
    table.assign(tx).unwrap();

    let reply = WorkerReply {
        resp: json!({"done": true}),
        code: 200,
    };
    let slot = table.take_client("Worker-1").unwrap();
    slot.send(serde_json::to_vec(&reply).unwrap()).unwrap();
    let received: WorkerReply = serde_json::from_slice(&rx.recv().unwrap()).unwrap();
    assert_eq!(received.code, 200);

    // Unassignable until the worker re-announces READY.
    let (tx2, _rx2) = mpsc::channel();
    assert!(table.assign(tx2).is_none());
    table.ready("Worker-1");
    let (tx3, _rx3) = mpsc::channel();
    assert_eq!(table.assign(tx3).as_deref(), Some("Worker-1"));
}

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Sink;
use serde_json::json;

use super::*;
use crate::session::SessionState;
use crate::transport::{self, MemoryPeer, TransportError};
use crate::types::EventFilter;

/// A sink that never accepts a frame, like a socket stuck on backpressure.
struct StalledSink;

impl Sink<String> for StalledSink {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: String) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}

fn connect_stalled(config: ConnectionConfig) -> Connection {
    Connection::from_transport(Box::pin(StalledSink), Box::pin(futures::stream::pending::<Result<String, TransportError>>()), config)
}

fn connect(config: ConnectionConfig) -> (Connection, MemoryPeer) {
    let (sink, stream, peer) = transport::in_memory();
    (Connection::from_transport(sink, stream, config), peer)
}

async fn wait_for_pending(conn: &Connection, count: usize) {
    for _ in 0..200 {
        if conn.pending_requests().len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} pending requests, have {:?}", conn.pending_requests());
}

#[tokio::test]
async fn test_root_command_roundtrip() {
    let (conn, mut peer) = connect(ConnectionConfig::default());

    let call = conn.send_command("Browser.getVersion", None);
    let respond = async {
        let request = peer.next_request().await.unwrap();
        assert_eq!(request["method"], "Browser.getVersion");
        assert_eq!(request["params"], json!({}));
        assert!(request.get("sessionId").is_none());
        peer.send(json!({"id": request["id"], "result": {"product": "HeadlessChrome/120"}}));
    };

    let (result, ()) = tokio::join!(call, respond);
    assert_eq!(result.unwrap()["product"], "HeadlessChrome/120");
    assert!(conn.pending_requests().is_empty());
}

#[tokio::test]
async fn test_malformed_frame_is_dropped_and_counted() {
    let (conn, mut peer) = connect(ConnectionConfig::default());

    let call = conn.send_command("Browser.getVersion", None);
    let respond = async {
        let request = peer.next_request().await.unwrap();
        peer.send_raw("{not json");
        peer.send_raw("[]");
        peer.send(json!({"id": request["id"], "result": {}}));
    };

    let (result, ()) = tokio::join!(call, respond);
    assert!(result.is_ok());
    assert!(!conn.is_closed());

    let stats = conn.stats();
    assert_eq!(stats.decode_errors, 2);
    assert_eq!(stats.frames_received, 3);
}

#[tokio::test]
async fn test_protocol_error_keeps_connection() {
    let (conn, mut peer) = connect(ConnectionConfig::default());

    let call = conn.send_command("Foo.bar", None);
    let respond = async {
        let request = peer.next_request().await.unwrap();
        peer.send(json!({
            "id": request["id"],
            "error": {"code": -32601, "message": "'Foo.bar' wasn't found"}
        }));
    };

    let (result, ()) = tokio::join!(call, respond);
    match result {
        Err(CdpError::Protocol { code, message, data }) => {
            assert_eq!(code, -32601);
            assert_eq!(message, "'Foo.bar' wasn't found");
            assert!(data.is_none());
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_timeout_removes_pending_entry() {
    let config = ConnectionConfig::default().with_request_timeout(Some(Duration::from_millis(50)));
    let (conn, mut peer) = connect(config);

    let result = conn.send_command("Page.navigate", None).await;
    match result {
        Err(CdpError::Timeout { method, id }) => {
            assert_eq!(method, "Page.navigate");
            assert_eq!(id, 1);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(conn.pending_requests().is_empty());

    // The late response finds nobody waiting.
    let request = peer.next_request().await.unwrap();
    peer.send(json!({"id": request["id"], "result": {}}));
    for _ in 0..200 {
        if conn.stats().unmatched_responses == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(conn.stats().unmatched_responses, 1);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_cancelled_request_is_cleaned_up() {
    let config = ConnectionConfig::default().with_request_timeout(None);
    let (conn, mut peer) = connect(config);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.send_command("Runtime.evaluate", None).await })
    };
    let request = peer.next_request().await.unwrap();
    wait_for_pending(&conn, 1).await;

    task.abort();
    let _ = task.await;
    assert!(conn.pending_requests().is_empty());

    peer.send(json!({"id": request["id"], "result": {}}));
    let follow_up = conn.send_command("Browser.getVersion", None);
    let respond = async {
        let request = peer.next_request().await.unwrap();
        peer.send(json!({"id": request["id"], "result": {"ok": true}}));
    };
    let (result, ()) = tokio::join!(follow_up, respond);
    assert_eq!(result.unwrap()["ok"], true);
    assert_eq!(conn.stats().unmatched_responses, 1);
}

#[tokio::test]
async fn test_pending_requests_report_method() {
    let config = ConnectionConfig::default().with_request_timeout(None);
    let (conn, mut peer) = connect(config);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.send_command("Page.captureScreenshot", None).await })
    };
    let _request = peer.next_request().await.unwrap();
    wait_for_pending(&conn, 1).await;

    let pending = conn.pending_requests();
    assert_eq!(pending[0].method, "Page.captureScreenshot");
    task.abort();
}

#[tokio::test]
async fn test_write_failure_terminates_connection() {
    let (conn, peer) = connect(ConnectionConfig::default());
    drop(peer);

    let result = conn.send_command("Browser.getVersion", None).await;
    assert!(matches!(result, Err(CdpError::ConnectionClosed)));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_send_after_close_fails_immediately() {
    let (conn, _peer) = connect(ConnectionConfig::default().with_request_timeout(None));
    conn.close().await;

    let result = tokio::time::timeout(
        Duration::from_millis(100),
        conn.send_command("Browser.getVersion", None),
    )
    .await
    .expect("send on a closed connection must not hang");
    assert!(matches!(result, Err(CdpError::ConnectionClosed)));
}

#[tokio::test]
async fn test_peer_hang_up_resolves_closed() {
    let (conn, mut peer) = connect(ConnectionConfig::default());
    peer.hang_up();

    tokio::time::timeout(Duration::from_secs(1), conn.closed())
        .await
        .expect("connection should terminate when the peer goes away");
    assert!(conn.is_closed());
    assert!(conn.root().subscribe(EventFilter::All).is_err());
}

#[tokio::test]
async fn test_remote_detach_event_unregisters_session() {
    let (conn, peer) = connect(ConnectionConfig::default());
    conn.inner
        .shared
        .registry
        .register(Some(SessionId::new("S1")), Some(TargetId::new("T1")));
    let session = conn.session(&SessionId::new("S1")).unwrap();
    let mut root_events = conn.root().events().unwrap();

    peer.send(json!({
        "method": "Target.detachedFromTarget",
        "params": {"sessionId": "S1", "targetId": "T1"}
    }));

    let event = root_events.recv().await.unwrap();
    assert_eq!(event.method, "Target.detachedFromTarget");
    assert_eq!(session.state(), SessionState::Detached);
    assert!(conn.session(&SessionId::new("S1")).is_none());
}

#[tokio::test]
async fn test_dropping_connection_fails_session_sends() {
    let (conn, _peer) = connect(ConnectionConfig::default());
    let root = conn.root();
    drop(conn);

    let result = root.send_command("Browser.getVersion", None).await;
    assert!(matches!(result, Err(CdpError::ConnectionClosed)));
    assert!(root.connection().is_none());
}

#[tokio::test]
async fn test_debug_output() {
    let (conn, _peer) = connect(ConnectionConfig::default());
    let debug = format!("{:?}", conn);
    assert!(debug.contains("Connection"));
    assert!(debug.contains("closed: false"));
}

#[tokio::test]
async fn test_timeout_covers_stalled_write() {
    let config = ConnectionConfig::default().with_request_timeout(Some(Duration::from_millis(100)));
    let conn = connect_stalled(config);

    let first = tokio::spawn({
        let conn = conn.clone();
        async move { conn.send_command("Page.navigate", None).await }
    });
    // Queued behind the first one on the writer lock.
    let second = tokio::spawn({
        let conn = conn.clone();
        async move { conn.send_command("Page.reload", None).await }
    });

    let first = tokio::time::timeout(Duration::from_secs(1), first)
        .await
        .expect("stalled write must respect the request timeout")
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), second)
        .await
        .expect("queued write must respect the request timeout")
        .unwrap();

    assert!(matches!(first, Err(CdpError::Timeout { .. })));
    assert!(matches!(second, Err(CdpError::Timeout { .. })));
    assert!(conn.pending_requests().is_empty());
}

#[tokio::test]
async fn test_close_releases_caller_stuck_in_write() {
    let conn = connect_stalled(ConnectionConfig::default().with_request_timeout(None));

    let call = tokio::spawn({
        let conn = conn.clone();
        async move { conn.send_command("Page.navigate", None).await }
    });
    wait_for_pending(&conn, 1).await;

    tokio::time::timeout(Duration::from_secs(2), conn.close())
        .await
        .expect("close must not wait on a stalled writer forever");
    assert!(conn.is_closed());

    let result = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("caller must be released by close")
        .unwrap();
    assert!(matches!(result, Err(CdpError::ConnectionClosed)));
}

#[test]
fn test_attach_hook_after_termination_leaves_no_session() {
    let shared = Arc::new(Shared::new());
    shared.terminate("closed locally");

    let reissued = Arc::new(AtomicBool::new(false));
    let hook = attach_hook(Arc::downgrade(&shared), TargetId::new("T1"), Arc::clone(&reissued));
    hook(&json!({"sessionId": "S1"}));

    assert!(!shared.registry.contains(&Some(SessionId::new("S1"))));
    assert!(!reissued.load(Ordering::SeqCst));
}

#[test]
fn test_attach_hook_flags_reissued_session_id() {
    let shared = Arc::new(Shared::new());
    shared
        .registry
        .register(Some(SessionId::new("S1")), Some(TargetId::new("T1")));

    let reissued = Arc::new(AtomicBool::new(false));
    let hook = attach_hook(Arc::downgrade(&shared), TargetId::new("T2"), Arc::clone(&reissued));
    hook(&json!({"sessionId": "S1"}));

    assert!(reissued.load(Ordering::SeqCst));
    assert_eq!(
        shared.registry.target_of(&Some(SessionId::new("S1"))),
        Some(TargetId::new("T1"))
    );
}

#[tokio::test]
async fn test_closed_connection_reports_sessions_detached() {
    let (conn, _peer) = connect(ConnectionConfig::default());
    conn.inner
        .shared
        .registry
        .register(Some(SessionId::new("S1")), Some(TargetId::new("T1")));
    let session = conn.session(&SessionId::new("S1")).unwrap();
    conn.inner.shared.closed.store(true, Ordering::SeqCst);

    assert_eq!(session.state(), SessionState::Detached);
    assert!(!conn.root().is_attached());
}

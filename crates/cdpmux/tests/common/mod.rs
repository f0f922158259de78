//! Shared helpers: a scripted in-memory browser.

#![allow(dead_code)]

use std::time::Duration;

use cdpmux::transport::{self, MemoryPeer};
use cdpmux::{Connection, ConnectionConfig, Session};
use serde_json::{Value, json};

pub fn connect() -> (Connection, MemoryPeer) {
    connect_with(ConnectionConfig::default())
}

pub fn connect_with(config: ConnectionConfig) -> (Connection, MemoryPeer) {
    let (sink, stream, peer) = transport::in_memory();
    (Connection::from_transport(sink, stream, config), peer)
}

/// Next request from the client, failing the test if none arrives quickly.
pub async fn expect_request(peer: &mut MemoryPeer) -> Value {
    tokio::time::timeout(Duration::from_secs(2), peer.next_request())
        .await
        .expect("timed out waiting for a request")
        .expect("client closed the channel")
}

pub fn reply(peer: &MemoryPeer, request: &Value, result: Value) {
    assert!(peer.send(json!({"id": request["id"], "result": result})));
}

pub fn event(peer: &MemoryPeer, method: &str, session: Option<&str>, params: Value) {
    let mut frame = json!({"method": method, "params": params});
    if let Some(session) = session {
        frame["sessionId"] = json!(session);
    }
    assert!(peer.send(frame));
}

/// Attach to `target`, with the fake browser assigning `session`.
pub async fn attach(conn: &Connection, peer: &mut MemoryPeer, target: &str, session: &str) -> Session {
    let attach = conn.attach(target);
    let respond = async {
        let request = expect_request(peer).await;
        assert_eq!(request["method"], "Target.attachToTarget");
        assert_eq!(request["params"]["targetId"], target);
        assert_eq!(request["params"]["flatten"], true);
        assert!(request.get("sessionId").is_none());
        reply(peer, &request, json!({"sessionId": session}));
    };
    let (session, ()) = tokio::join!(attach, respond);
    session.expect("attach should succeed")
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

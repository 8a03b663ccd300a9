//! End-to-end tests using real WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use handoff_server::config::ServerConfig;
use handoff_server::metrics::detached_handle;
use handoff_server::server::HandoffServer;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot_server_with(config: ServerConfig) -> (SocketAddr, Arc<HandoffServer>) {
    let server = Arc::new(HandoffServer::new(config, detached_handle()));
    let (addr, _handle) = server.listen().await.unwrap();
    (addr, server)
}

/// Boot a test server on an auto-assigned port.
async fn boot_server() -> (SocketAddr, Arc<HandoffServer>) {
    boot_server_with(ServerConfig::default()).await
}

async fn connect(addr: SocketAddr, role: &str) -> WsStream {
    let url = format!("ws://{addr}/api/agent/ws/{role}");
    let (ws, _) = connect_async(&url).await.expect("failed to connect");
    ws
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read frames until one of type `kind` arrives.
async fn read_until(ws: &mut WsStream, kind: &str) -> Value {
    loop {
        let frame = read_json(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Connect an agent and consume its `initial-state`.
async fn agent(addr: SocketAddr) -> (WsStream, Value) {
    let mut ws = connect(addr, "agent").await;
    let initial = read_json(&mut ws).await;
    assert_eq!(initial["type"], "initial-state");
    (ws, initial)
}

/// Connect a customer, escalate, and return its session ID.
async fn waiting_customer(addr: SocketAddr, name: &str) -> (WsStream, String) {
    let mut ws = connect(addr, "customer").await;
    let connected = read_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    send(&mut ws, json!({"type": "request-human", "displayName": name})).await;
    let queued = read_json(&mut ws).await;
    assert_eq!(queued["type"], "queued");
    let session_id = queued["sessionId"].as_str().unwrap().to_string();
    (ws, session_id)
}

async fn wait_for<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn e2e_customer_is_greeted() {
    let (addr, _server) = boot_server().await;
    let mut ws = connect(addr, "customer").await;
    let connected = read_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    assert!(connected["connectionId"].as_str().unwrap().starts_with("conn_"));
}

#[tokio::test]
async fn e2e_alice_is_handed_to_an_agent() {
    let (addr, server) = boot_server().await;
    let (mut agent_ws, initial) = agent(addr).await;
    assert!(initial["waitingEntries"].as_array().unwrap().is_empty());

    let (mut customer_ws, session_id) = waiting_customer(addr, "Alice").await;

    let arrived = read_json(&mut agent_ws).await;
    assert_eq!(arrived["type"], "customer-arrived");
    assert_eq!(arrived["sessionId"], session_id.as_str());
    assert_eq!(arrived["displayName"], "Alice");
    assert!(arrived["arrivalTime"].is_string());

    send(&mut agent_ws, json!({"type": "accept", "sessionId": session_id})).await;
    let joined = read_json(&mut customer_ws).await;
    assert_eq!(joined["type"], "agent-joined");
    assert_eq!(joined["agentId"], initial["agentId"]);

    let accepted = read_json(&mut agent_ws).await;
    assert_eq!(accepted["type"], "accepted");
    assert_eq!(accepted["displayName"], "Alice");
    let broadcast = read_json(&mut agent_ws).await;
    assert_eq!(broadcast["type"], "customer-accepted");
    assert!(server.broker().waiting_snapshot().is_empty());

    send(&mut customer_ws, json!({"type": "message", "text": "Hi"})).await;
    let message = read_json(&mut agent_ws).await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["sessionId"], session_id.as_str());
    assert_eq!(message["text"], "Hi");

    send(
        &mut agent_ws,
        json!({"type": "message", "sessionId": session_id, "text": "Hello Alice"}),
    )
    .await;
    let reply = read_json(&mut customer_ws).await;
    assert_eq!(reply["type"], "message");
    assert_eq!(reply["text"], "Hello Alice");
}

#[tokio::test]
async fn e2e_racing_accepts_have_one_winner() {
    let (addr, _server) = boot_server().await;
    let (mut x, _) = agent(addr).await;
    let (mut y, _) = agent(addr).await;
    let (_customer, session_id) = waiting_customer(addr, "Alice").await;
    let _ = read_until(&mut x, "customer-arrived").await;
    let _ = read_until(&mut y, "customer-arrived").await;

    let accept = json!({"type": "accept", "sessionId": session_id});
    send(&mut x, accept.clone()).await;
    send(&mut y, accept).await;

    let mut outcomes = Vec::new();
    for ws in [&mut x, &mut y] {
        loop {
            let frame = read_json(ws).await;
            if frame["type"] == "accepted" || frame["type"] == "error" {
                outcomes.push(frame);
                break;
            }
        }
    }
    let winners = outcomes.iter().filter(|f| f["type"] == "accepted").count();
    assert_eq!(winners, 1);
    let loser = outcomes.iter().find(|f| f["type"] == "error").unwrap();
    assert_eq!(loser["code"], "INVALID_TRANSITION");
    assert_eq!(loser["state"], "active");
    assert_eq!(loser["sessionId"], session_id.as_str());
}

#[tokio::test]
async fn e2e_agent_drop_leaves_session_unassigned() {
    let (addr, server) = boot_server().await;
    let (mut x, _) = agent(addr).await;
    let (mut y, _) = agent(addr).await;
    let (mut customer, session_id) = waiting_customer(addr, "Alice").await;

    send(&mut x, json!({"type": "accept", "sessionId": session_id})).await;
    let _ = read_until(&mut customer, "agent-joined").await;
    let _ = read_until(&mut y, "customer-accepted").await;

    x.close(None).await.unwrap();
    let left = read_until(&mut customer, "agent-left").await;
    assert_eq!(left, json!({"type": "agent-left"}));
    let unassigned = read_until(&mut y, "session-unassigned").await;
    assert_eq!(unassigned["sessionId"], session_id.as_str());
    assert!(server.broker().waiting_snapshot().is_empty());

    send(&mut y, json!({"type": "accept", "sessionId": session_id})).await;
    let _ = read_until(&mut customer, "agent-joined").await;
    let accepted = read_until(&mut y, "accepted").await;
    assert_eq!(accepted["sessionId"], session_id.as_str());
}

#[tokio::test]
async fn e2e_waiting_customer_disconnect_updates_dashboards() {
    let (addr, server) = boot_server().await;
    let (mut x, _) = agent(addr).await;
    let (mut customer, session_id) = waiting_customer(addr, "Alice").await;
    let _ = read_until(&mut x, "customer-arrived").await;

    customer.close(None).await.unwrap();
    let left = read_until(&mut x, "customer-left-queue").await;
    assert_eq!(left["sessionId"], session_id.as_str());
    assert_eq!(left["queueSize"], 0);
    wait_for(|| server.broker().stats().customers.is_empty()).await;
}

#[tokio::test]
async fn e2e_active_customer_disconnect_notifies_agent() {
    let (addr, _server) = boot_server().await;
    let (mut x, _) = agent(addr).await;
    let (mut customer, session_id) = waiting_customer(addr, "Alice").await;
    send(&mut x, json!({"type": "accept", "sessionId": session_id})).await;
    let _ = read_until(&mut customer, "agent-joined").await;

    drop(customer);
    let closed = read_until(&mut x, "customer-closed").await;
    assert_eq!(closed["sessionId"], session_id.as_str());
}

#[tokio::test]
async fn e2e_invalid_frames_keep_connection_open() {
    let (addr, _server) = boot_server().await;
    let mut ws = connect(addr, "customer").await;
    let _ = read_json(&mut ws).await;

    ws.send(Message::text("not json")).await.unwrap();
    let err = read_json(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "INVALID_MESSAGE");

    send(&mut ws, json!({"type": "message", "text": "hello?"})).await;
    let err = read_json(&mut ws).await;
    assert_eq!(err["code"], "NOT_ESCALATED");

    send(&mut ws, json!({"type": "request-human"})).await;
    let queued = read_json(&mut ws).await;
    assert_eq!(queued["type"], "queued");
    assert_eq!(queued["position"], 1);
}

#[tokio::test]
async fn e2e_unknown_session_accept_is_not_found() {
    let (addr, server) = boot_server().await;
    let (mut x, _) = agent(addr).await;
    send(&mut x, json!({"type": "accept", "sessionId": "sess_nope"})).await;
    let err = read_json(&mut x).await;
    assert_eq!(err["code"], "SESSION_NOT_FOUND");
    assert!(server.broker().stats().customers.is_empty());
}

#[tokio::test]
async fn e2e_hello_timeout_closes_idle_customer() {
    let config = ServerConfig {
        hello_timeout_ms: 200,
        ..ServerConfig::default()
    };
    let (addr, _server) = boot_server_with(config).await;
    let mut ws = connect(addr, "customer").await;
    let _ = read_json(&mut ws).await;

    let closed = read_json(&mut ws).await;
    assert_eq!(closed["type"], "closed");
    assert_eq!(closed["reason"], "hello-timeout");

    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timeout waiting for close") {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn e2e_resume_moves_session_to_new_socket() {
    let (addr, server) = boot_server().await;
    let (mut first, session_id) = waiting_customer(addr, "Alice").await;
    send(&mut first, json!({"type": "message", "text": "still there?"})).await;
    wait_for(|| {
        server
            .broker()
            .registry()
            .get(&session_id.as_str().into())
            .is_ok_and(|s| s.messages.len() == 1)
    })
    .await;

    let mut second = connect(addr, "customer").await;
    let _ = read_json(&mut second).await;
    send(&mut second, json!({"type": "resume", "sessionId": session_id})).await;
    let resumed = read_json(&mut second).await;
    assert_eq!(resumed["type"], "resumed");
    assert_eq!(resumed["state"], "waiting");
    assert_eq!(resumed["messages"][0]["text"], "still there?");

    let replaced = read_until(&mut first, "closed").await;
    assert_eq!(replaced["reason"], "replaced");

    // The replaced socket closing must not end the session.
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.broker().waiting_snapshot().len(), 1);
}

#[tokio::test]
async fn e2e_shutdown_closes_customers() {
    let (addr, server) = boot_server().await;
    let (mut customer, _) = waiting_customer(addr, "Alice").await;
    server.stop().await;
    let closed = read_until(&mut customer, "closed").await;
    assert_eq!(closed["reason"], "shutdown");
}

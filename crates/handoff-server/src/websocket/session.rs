//! WebSocket session lifecycle: handles one connected client from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use handoff_broker::{ClientConnection, SessionBroker};
use handoff_core::ConnectionId;
use handoff_core::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::endpoint::SessionEndpoint;
use super::outbound::{Heartbeat, run_writer};
use crate::config::ServerConfig;

/// How long the writer may take to flush after the reader stops.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the broker through `E::open`
/// 2. Spawns the outbound writer (send queue + Ping frames)
/// 3. Dispatches inbound text frames to the endpoint
/// 4. Enforces the hello timeout for endpoints that require one
/// 5. Reports the disconnect and lets the writer flush
#[instrument(skip_all, fields(role = %E::ROLE, conn_id = %conn_id))]
pub async fn run_ws_session<E: SessionEndpoint>(
    ws: WebSocket,
    conn_id: ConnectionId,
    broker: Arc<SessionBroker>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let role = E::ROLE.as_str();
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel(config.send_queue_capacity.max(1));
    let conn = Arc::new(ClientConnection::new(conn_id, E::ROLE, send_tx));

    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL, "role" => role).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE, "role" => role).increment(1.0);

    let mut writer = tokio::spawn(run_writer(
        ws_tx,
        send_rx,
        Arc::clone(&conn),
        Heartbeat {
            interval: config.heartbeat_interval(),
            timeout: config.heartbeat_timeout(),
        },
    ));

    let mut endpoint = E::open(broker, Arc::clone(&conn));
    let close = conn.close_token();
    let hello = tokio::time::sleep(config.hello_timeout());
    tokio::pin!(hello);

    loop {
        tokio::select! {
            () = close.cancelled() => {
                debug!("close requested");
                break;
            }
            () = shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            () = &mut hello, if endpoint.awaiting_hello() => {
                info!(timeout = ?config.hello_timeout(), "no escalation before hello timeout");
                endpoint.on_hello_timeout();
                break;
            }
            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { break };
                match msg {
                    Message::Text(text) => {
                        conn.mark_alive();
                        endpoint.on_text(text.as_str());
                    }
                    Message::Binary(data) => {
                        conn.mark_alive();
                        match std::str::from_utf8(&data) {
                            Ok(text) => endpoint.on_text(text),
                            Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                        }
                    }
                    Message::Ping(_) | Message::Pong(_) => conn.mark_alive(),
                    Message::Close(_) => {
                        debug!("client sent close frame");
                        break;
                    }
                }
            }
        }
    }

    endpoint.on_disconnect();
    conn.request_close();
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        dropped = conn.drop_count(),
        age_ms = u64::try_from(conn.age().as_millis()).unwrap_or(u64::MAX),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "role" => role).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE, "role" => role).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS, "role" => role)
        .record(started.elapsed().as_secs_f64());
}

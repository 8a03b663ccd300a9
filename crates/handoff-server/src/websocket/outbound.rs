//! Outbound writer: drains a connection's send queue into the socket and
//! keeps it alive with Ping frames.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use handoff_broker::ClientConnection;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Why the writer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterExit {
    /// A close was requested; queued frames were flushed first.
    CloseRequested,
    /// Every sender was dropped.
    QueueClosed,
    /// The peer did not answer pings within the timeout.
    PongTimeout,
    /// The socket rejected a write.
    SendFailed,
}

/// Ping cadence for one writer.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    /// Interval between Ping frames.
    pub interval: Duration,
    /// Give up after this long without a Pong.
    pub timeout: Duration,
}

/// Run the writer until the connection closes.
///
/// On exit the connection is marked for close so the reader loop stops too.
pub async fn run_writer<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Arc<String>>,
    conn: Arc<ClientConnection>,
    heartbeat: Heartbeat,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
{
    let close = conn.close_token();
    let mut ping = tokio::time::interval(heartbeat.interval);
    let _ = ping.tick().await;

    let exit = loop {
        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(text) => {
                    if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                        break WriterExit::SendFailed;
                    }
                }
                None => break WriterExit::QueueClosed,
            },
            () = close.cancelled() => {
                while let Ok(text) = rx.try_recv() {
                    if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                break WriterExit::CloseRequested;
            }
            _ = ping.tick() => {
                if !conn.check_alive() && conn.last_pong_elapsed() > heartbeat.timeout {
                    warn!(conn_id = %conn.id, timeout = ?heartbeat.timeout, "client unresponsive, disconnecting");
                    break WriterExit::PongTimeout;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break WriterExit::SendFailed;
                }
            }
        }
    };

    if exit != WriterExit::SendFailed {
        let _ = sink.send(Message::Close(None)).await;
    }
    conn.request_close();
    debug!(conn_id = %conn.id, ?exit, "writer stopped");
    exit
}

//! Session broker: the hand-off state machine.
//!
//! Each operation commits its transition in the registry first, then
//! delivers the resulting events through the multiplexer. Delivery failures
//! are reported but never roll a transition back.
//!
//! Transitions are serialized by a commit-order lock held across the commit
//! and the enqueueing of its events. Enqueueing is a non-blocking
//! `try_send`, so no socket I/O happens under the lock, and every connection
//! receives events in the order their transitions committed.

use std::sync::Arc;

use handoff_core::metrics::{
    ACCEPTS_TOTAL, MESSAGES_TOTAL, QUEUE_DEPTH, SESSIONS_CLOSED_TOTAL, SESSIONS_CREATED_TOTAL,
};
use handoff_core::{AgentId, ConnectionId, SessionId};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ClientConnection;
use crate::errors::{BrokerError, Result};
use crate::events::{AgentEvent, CloseReason, CustomerEvent};
use crate::multiplexer::{ConnectionMultiplexer, TransportEvent};
use crate::notifier::QueueNotifier;
use crate::registry::{
    AcceptedSession, ClosedSession, CreatedSession, DashboardChange, NewSession, RegistryLimits,
    SessionRegistry,
};
use crate::session::{CustomerSession, Message, QueueEntry, SenderRole};

/// Broker limits.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Maximum number of live sessions.
    pub max_sessions: usize,
    /// Maximum characters per chat message.
    pub max_message_chars: usize,
    /// Display names are truncated to this many characters.
    pub max_display_name_chars: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1_000,
            max_message_chars: 4_000,
            max_display_name_chars: 64,
        }
    }
}

/// Broker-wide statistics.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    /// Connected agent IDs.
    pub agents: Vec<AgentId>,
    /// Live customer session IDs.
    pub customers: Vec<SessionId>,
    /// Sessions in the waiting queue.
    pub queue_size: usize,
    /// Sessions bound to an agent.
    pub active_sessions: usize,
    /// Sessions whose agent dropped.
    pub unassigned_sessions: usize,
    /// Sessions closed since startup.
    pub closed_sessions: u64,
    /// Customer connections attached to a session.
    pub customer_connections: usize,
    /// Agent connections.
    pub agent_connections: usize,
}

/// Owns the registry and the multiplexer and drives every transition.
pub struct SessionBroker {
    registry: SessionRegistry,
    mux: Arc<ConnectionMultiplexer>,
    notifier: QueueNotifier,
    config: BrokerConfig,
    commit_order: Mutex<()>,
    transport_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl SessionBroker {
    /// Create a broker with an empty registry.
    pub fn new(config: BrokerConfig) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let mux = Arc::new(ConnectionMultiplexer::new(transport_tx));
        Self {
            registry: SessionRegistry::new(RegistryLimits {
                max_sessions: config.max_sessions,
                max_display_name_chars: config.max_display_name_chars,
            }),
            notifier: QueueNotifier::new(Arc::clone(&mux)),
            mux,
            config,
            commit_order: Mutex::new(()),
            transport_rx: Mutex::new(Some(transport_rx)),
        }
    }

    /// The session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The connection multiplexer.
    pub fn multiplexer(&self) -> &Arc<ConnectionMultiplexer> {
        &self.mux
    }

    /// Register an agent connection and send it `initial-state`.
    ///
    /// The snapshot is taken, sent, and the connection attached while the
    /// registry lock is held, so `initial-state` is the first frame the agent
    /// sees and no later notification is missed.
    pub fn connect_agent(&self, conn: Arc<ClientConnection>) -> AgentId {
        let agent_id = AgentId::new();
        let _order = self.commit_order.lock();
        let _ = self.registry.register_agent(agent_id.clone(), |snapshot| {
            let event = AgentEvent::InitialState {
                agent_id: agent_id.clone(),
                waiting_entries: snapshot.waiting.clone(),
                active_sessions: snapshot.active.clone(),
                unassigned_sessions: snapshot.unassigned.clone(),
            };
            if let Err(e) = conn.send_event(&event) {
                warn!(agent_id = %agent_id, error = %e, "failed to send initial state");
            }
            let _ = self.mux.attach_agent(agent_id.clone(), Arc::clone(&conn));
        });
        info!(agent_id = %agent_id, conn_id = %conn.id, "agent connected");
        agent_id
    }

    /// Escalate a customer connection: create a session and queue it.
    pub fn request_human(
        &self,
        conn: &Arc<ClientConnection>,
        display_name: Option<String>,
        context: Option<String>,
    ) -> Result<CreatedSession> {
        let session_id = SessionId::new();
        let _order = self.commit_order.lock();
        // Attached before the session is visible, so an accept can always
        // reach the customer.
        let _ = self.mux.attach_customer(session_id.clone(), Arc::clone(conn));
        let created = match self.registry.create_session(NewSession {
            session_id: session_id.clone(),
            display_name,
            connection_id: conn.id.clone(),
            context,
        }) {
            Ok(created) => created,
            Err(e) => {
                let _ = self.mux.detach_customer(&session_id);
                return Err(e);
            }
        };

        counter!(SESSIONS_CREATED_TOTAL).increment(1);
        self.record_queue_depth();
        info!(
            session_id = %session_id,
            display_name = %created.entry.display_name,
            position = created.position,
            "customer requested a human"
        );

        if let Err(e) = conn.send_event(&CustomerEvent::Queued {
            session_id: session_id.clone(),
            position: created.position,
        }) {
            warn!(session_id = %session_id, error = %e, "failed to confirm queueing");
        }
        let _ = self.notifier.publish(created.change.clone());
        Ok(created)
    }

    /// Attach a new customer connection to a live session.
    ///
    /// The previously attached connection, if still open, is told it was
    /// replaced and closed. The registry and the multiplexer are updated
    /// under one commit, so concurrent resumes agree on the winner.
    pub fn resume_customer(
        &self,
        conn: &Arc<ClientConnection>,
        session_id: &SessionId,
    ) -> Result<CustomerSession> {
        let _order = self.commit_order.lock();
        let (previous, session) = self.registry.rebind_customer(session_id, conn.id.clone())?;
        if let Some(old) = self.mux.attach_customer(session_id.clone(), Arc::clone(conn)) {
            if old.id != conn.id {
                let _ = old.send_event(&CustomerEvent::Closed {
                    reason: CloseReason::Replaced,
                });
                old.request_close();
            }
        }
        info!(session_id = %session_id, conn_id = %conn.id, previous_conn = %previous, "customer resumed");

        if let Err(e) = conn.send_event(&CustomerEvent::Resumed {
            session_id: session_id.clone(),
            state: session.state(),
            messages: session.messages.clone(),
        }) {
            warn!(session_id = %session_id, error = %e, "failed to confirm resume");
        }
        Ok(session)
    }

    /// Customer chat message. Forwarded only while an agent is bound.
    pub fn customer_message(&self, session_id: &SessionId, text: String) -> Result<Message> {
        let text = self.validate_text(text)?;
        let _order = self.commit_order.lock();
        let posted = self.registry.append_customer_message(session_id, text)?;
        counter!(MESSAGES_TOTAL, "sender" => SenderRole::Customer.as_str()).increment(1);

        let Some(agent_id) = posted.forward_to else {
            debug!(session_id = %session_id, "customer message held until an agent accepts");
            return Ok(posted.message);
        };
        self.mux
            .send_to_agent(
                &agent_id,
                &AgentEvent::Message {
                    session_id: session_id.clone(),
                    text: posted.message.text.clone(),
                    timestamp: posted.message.timestamp,
                },
            )
            .map_err(|_| BrokerError::Unreachable {
                target: format!("agent {agent_id}"),
            })?;
        Ok(posted.message)
    }

    /// Bind an agent to a waiting or unassigned session.
    pub fn accept(&self, agent_id: &AgentId, session_id: &SessionId) -> Result<AcceptedSession> {
        let _order = self.commit_order.lock();
        let accepted = self.registry.accept(agent_id, session_id)?;
        counter!(ACCEPTS_TOTAL).increment(1);
        self.record_queue_depth();
        info!(
            session_id = %session_id,
            agent_id = %agent_id,
            from = %accepted.previous,
            "session accepted"
        );

        if let Err(e) = self.mux.send_to_agent(
            agent_id,
            &AgentEvent::Accepted {
                session_id: session_id.clone(),
                display_name: accepted.display_name.clone(),
                messages: accepted.messages.clone(),
            },
        ) {
            warn!(agent_id = %agent_id, error = %e, "failed to acknowledge accept");
        }
        if let Err(e) = self.mux.send_to_customer(
            session_id,
            &CustomerEvent::AgentJoined {
                agent_id: agent_id.clone(),
            },
        ) {
            warn!(session_id = %session_id, error = %e, "customer unreachable after accept");
        }
        let _ = self.notifier.publish(accepted.change.clone());
        Ok(accepted)
    }

    /// Agent chat message to a session bound to that agent.
    pub fn agent_message(
        &self,
        agent_id: &AgentId,
        session_id: &SessionId,
        text: String,
    ) -> Result<Message> {
        let text = self.validate_text(text)?;
        let _order = self.commit_order.lock();
        let message = self.registry.append_agent_message(agent_id, session_id, text)?;
        counter!(MESSAGES_TOTAL, "sender" => SenderRole::Agent.as_str()).increment(1);

        self.mux
            .send_to_customer(
                session_id,
                &CustomerEvent::Message {
                    text: message.text.clone(),
                    timestamp: message.timestamp,
                },
            )
            .map_err(|_| BrokerError::Unreachable {
                target: format!("customer of session {session_id}"),
            })?;
        Ok(message)
    }

    /// Explicitly close a session in any state.
    ///
    /// The customer is told why and its connection closed; agents see the
    /// session leave the queue or close.
    pub fn close_session(&self, session_id: &SessionId, reason: CloseReason) -> Result<ClosedSession> {
        let _order = self.commit_order.lock();
        let closed = self
            .registry
            .remove(session_id)
            .ok_or_else(|| BrokerError::not_found(session_id))?;

        if let Some(conn) = self.mux.detach_customer(session_id) {
            let _ = conn.send_event(&CustomerEvent::Closed { reason });
            conn.request_close();
        }
        self.finish_close(&closed, close_label(reason));
        Ok(closed)
    }

    /// The customer connection of a session went away.
    ///
    /// Ignored when `connection_id` is not the attached connection.
    pub fn customer_disconnected(&self, session_id: &SessionId, connection_id: &ConnectionId) {
        let _order = self.commit_order.lock();
        let Some(closed) = self.registry.customer_disconnected(session_id, connection_id) else {
            debug!(session_id = %session_id, conn_id = %connection_id, "stale customer disconnect ignored");
            return;
        };
        self.finish_close(&closed, "customer_disconnect");
    }

    /// An agent connection went away. Its sessions become unassigned and
    /// their customers are told the agent left.
    pub fn agent_disconnected(&self, agent_id: &AgentId) {
        let _order = self.commit_order.lock();
        let changes = self.registry.unregister_agent(agent_id);
        info!(agent_id = %agent_id, orphaned = changes.len(), "agent disconnected");
        for change in &changes {
            let DashboardChange::Unassigned { session_id, .. } = change else {
                continue;
            };
            if let Err(e) = self.mux.send_to_customer(session_id, &CustomerEvent::AgentLeft) {
                debug!(session_id = %session_id, error = %e, "customer unreachable for agent-left");
            }
        }
        self.notifier.publish_all(changes);
    }

    /// Apply one transport event.
    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::CustomerDisconnected {
                session_id,
                connection_id,
            } => self.customer_disconnected(&session_id, &connection_id),
            TransportEvent::AgentDisconnected { agent_id, .. } => self.agent_disconnected(&agent_id),
        }
    }

    /// Apply every transport event already queued, unless a worker owns the
    /// receiver. Returns how many were applied.
    pub fn process_pending(&self) -> usize {
        let mut guard = self.transport_rx.lock();
        let Some(rx) = guard.as_mut() else {
            return 0;
        };
        let mut applied = 0;
        while let Ok(event) = rx.try_recv() {
            self.handle_transport_event(event);
            applied += 1;
        }
        applied
    }

    /// Spawn the task that applies transport events until `cancel` fires.
    ///
    /// Returns `None` if a worker was already spawned.
    pub fn spawn_transport_worker(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let mut rx = self.transport_rx.lock().take()?;
        let broker = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => broker.handle_transport_event(event),
                        None => break,
                    },
                }
            }
            debug!("transport worker stopped");
        }))
    }

    /// Waiting queue in arrival order.
    pub fn waiting_snapshot(&self) -> Vec<QueueEntry> {
        self.registry.list_waiting()
    }

    /// Broker statistics.
    pub fn stats(&self) -> BrokerStats {
        let registry = self.registry.stats();
        BrokerStats {
            agents: registry.agents,
            customers: registry.sessions,
            queue_size: registry.queue_size,
            active_sessions: registry.active_sessions,
            unassigned_sessions: registry.unassigned_sessions,
            closed_sessions: registry.closed_total,
            customer_connections: self.mux.customer_count(),
            agent_connections: self.mux.agent_count(),
        }
    }

    /// Tell customers the server is going away and close every connection.
    pub fn shutdown(&self) {
        let _order = self.commit_order.lock();
        for session in self.registry.stats().sessions {
            let _ = self.mux.send_to_customer(
                &session,
                &CustomerEvent::Closed {
                    reason: CloseReason::Shutdown,
                },
            );
        }
        self.mux.close_all();
    }

    /// Configured limits.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn finish_close(&self, closed: &ClosedSession, from: &'static str) {
        counter!(SESSIONS_CLOSED_TOTAL, "from" => from).increment(1);
        self.record_queue_depth();
        info!(
            session_id = %closed.session_id,
            state = %closed.previous,
            agent_id = closed.agent_id.as_ref().map(AgentId::as_str),
            from,
            "session closed"
        );
        let _ = self.notifier.publish(closed.change.clone());
    }

    fn validate_text(&self, text: String) -> Result<String> {
        if text.trim().is_empty() {
            return Err(BrokerError::invalid("message text is empty"));
        }
        let chars = text.chars().count();
        if chars > self.config.max_message_chars {
            return Err(BrokerError::invalid(format!(
                "message is {chars} characters, limit is {}",
                self.config.max_message_chars
            )));
        }
        Ok(text)
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_queue_depth(&self) {
        gauge!(QUEUE_DEPTH).set(self.registry.queue_len() as f64);
    }
}

impl Default for SessionBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

fn close_label(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::ClosedByAgent => "agent",
        CloseReason::ClosedByOperator => "operator",
        CloseReason::Replaced => "replaced",
        CloseReason::HelloTimeout => "hello_timeout",
        CloseReason::Shutdown => "shutdown",
    }
}

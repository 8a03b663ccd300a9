//! Connection multiplexer: routes events to live customer and agent
//! connections.
//!
//! The multiplexer owns no policy. Disconnects are forwarded to the broker as
//! [`TransportEvent`]s, and delivery failures are reported to the caller
//! without touching session state.

use std::collections::HashMap;
use std::sync::Arc;

use handoff_core::{AgentId, ConnectionId, SessionId};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{ClientConnection, DeliveryError};
use crate::events::encode;

/// A transport-level disconnect, forwarded into the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A customer connection closed.
    CustomerDisconnected {
        /// Session the connection was attached to.
        session_id: SessionId,
        /// The connection that closed.
        connection_id: ConnectionId,
    },
    /// An agent connection closed.
    AgentDisconnected {
        /// The agent.
        agent_id: AgentId,
        /// The connection that closed.
        connection_id: ConnectionId,
    },
}

/// Outcome of a fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the frame.
    pub delivered: usize,
    /// Recipients that could not be reached.
    pub failed: Vec<AgentId>,
}

/// Maps sessions and agents to their live connections.
pub struct ConnectionMultiplexer {
    customers: RwLock<HashMap<SessionId, Arc<ClientConnection>>>,
    agents: RwLock<HashMap<AgentId, Arc<ClientConnection>>>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ConnectionMultiplexer {
    /// Create a multiplexer that forwards disconnects into `transport_tx`.
    pub fn new(transport_tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            customers: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            transport_tx,
        }
    }

    /// Attach a customer connection, returning the one it replaced.
    pub fn attach_customer(
        &self,
        session_id: SessionId,
        conn: Arc<ClientConnection>,
    ) -> Option<Arc<ClientConnection>> {
        self.customers.write().insert(session_id, conn)
    }

    /// Attach an agent connection, returning the one it replaced.
    pub fn attach_agent(
        &self,
        agent_id: AgentId,
        conn: Arc<ClientConnection>,
    ) -> Option<Arc<ClientConnection>> {
        self.agents.write().insert(agent_id, conn)
    }

    /// Detach a customer connection unconditionally.
    pub fn detach_customer(&self, session_id: &SessionId) -> Option<Arc<ClientConnection>> {
        self.customers.write().remove(session_id)
    }

    /// Detach an agent connection unconditionally.
    pub fn detach_agent(&self, agent_id: &AgentId) -> Option<Arc<ClientConnection>> {
        self.agents.write().remove(agent_id)
    }

    /// Live connection of a customer session.
    pub fn customer(&self, session_id: &SessionId) -> Option<Arc<ClientConnection>> {
        self.customers.read().get(session_id).cloned()
    }

    /// Live connection of an agent.
    pub fn agent(&self, agent_id: &AgentId) -> Option<Arc<ClientConnection>> {
        self.agents.read().get(agent_id).cloned()
    }

    /// Deliver an event to a session's customer.
    pub fn send_to_customer<T: Serialize>(
        &self,
        session_id: &SessionId,
        event: &T,
    ) -> Result<(), DeliveryError> {
        let conn = self.customer(session_id).ok_or(DeliveryError::NotConnected)?;
        conn.send_event(event).inspect_err(|e| {
            warn!(session_id = %session_id, conn_id = %conn.id, error = %e, "customer delivery failed");
        })
    }

    /// Deliver an event to an agent.
    pub fn send_to_agent<T: Serialize>(
        &self,
        agent_id: &AgentId,
        event: &T,
    ) -> Result<(), DeliveryError> {
        let conn = self.agent(agent_id).ok_or(DeliveryError::NotConnected)?;
        conn.send_event(event).inspect_err(|e| {
            warn!(agent_id = %agent_id, conn_id = %conn.id, error = %e, "agent delivery failed");
        })
    }

    /// Deliver an event to every agent. A failing recipient does not affect
    /// the others.
    pub fn broadcast_to_agents<T: Serialize>(&self, event: &T) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let agents = self.agents.read();
        let Some(json) = encode(event) else {
            report.failed = agents.keys().cloned().collect();
            return report;
        };
        let frame = Arc::new(json);
        for (agent_id, conn) in agents.iter() {
            match conn.send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(agent_id = %agent_id, conn_id = %conn.id, error = %e, "broadcast to agent failed");
                    report.failed.push(agent_id.clone());
                }
            }
        }
        debug!(
            recipients = agents.len(),
            delivered = report.delivered,
            "broadcast to agents"
        );
        report
    }

    /// A customer connection closed.
    ///
    /// Detaches it if it is still the attached connection and forwards the
    /// disconnect to the broker. A connection that was already replaced is
    /// forwarded too; the broker ignores it by connection ID.
    pub fn on_customer_disconnect(&self, session_id: &SessionId, connection_id: &ConnectionId) {
        {
            let mut customers = self.customers.write();
            if customers.get(session_id).is_some_and(|c| c.id == *connection_id) {
                let _ = customers.remove(session_id);
            }
        }
        self.forward(TransportEvent::CustomerDisconnected {
            session_id: session_id.clone(),
            connection_id: connection_id.clone(),
        });
    }

    /// An agent connection closed.
    pub fn on_agent_disconnect(&self, agent_id: &AgentId, connection_id: &ConnectionId) {
        {
            let mut agents = self.agents.write();
            if agents.get(agent_id).is_some_and(|c| c.id == *connection_id) {
                let _ = agents.remove(agent_id);
            }
        }
        self.forward(TransportEvent::AgentDisconnected {
            agent_id: agent_id.clone(),
            connection_id: connection_id.clone(),
        });
    }

    fn forward(&self, event: TransportEvent) {
        if self.transport_tx.send(event).is_err() {
            warn!("transport event receiver dropped");
        }
    }

    /// Attached customer connections.
    pub fn customer_count(&self) -> usize {
        self.customers.read().len()
    }

    /// Attached agent connections.
    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    /// Ask every attached connection to close.
    pub fn close_all(&self) {
        for conn in self.customers.read().values() {
            conn.request_close();
        }
        for conn in self.agents.read().values() {
            conn.request_close();
        }
    }
}

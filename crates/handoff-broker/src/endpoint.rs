//! Per-connection command dispatch.
//!
//! An endpoint holds what one connection knows about itself (its session or
//! agent ID) and turns inbound frames into broker calls. Rejections are sent
//! back to the same connection as `error` events.

use std::sync::Arc;

use handoff_core::metrics::REJECTIONS_TOTAL;
use handoff_core::{AgentId, SessionId};
use metrics::counter;
use tracing::debug;

use crate::broker::SessionBroker;
use crate::connection::ClientConnection;
use crate::errors::{BrokerError, Result};
use crate::events::{AgentCommand, AgentEvent, CloseReason, CustomerCommand, CustomerEvent, parse_error};

/// Customer side of one WebSocket.
pub struct CustomerEndpoint {
    broker: Arc<SessionBroker>,
    conn: Arc<ClientConnection>,
    session_id: Option<SessionId>,
}

impl CustomerEndpoint {
    /// Greet a new customer connection.
    pub fn new(broker: Arc<SessionBroker>, conn: Arc<ClientConnection>) -> Self {
        let _ = conn.send_event(&CustomerEvent::Connected {
            connection_id: conn.id.clone(),
        });
        Self {
            broker,
            conn,
            session_id: None,
        }
    }

    /// Session this connection escalated into or resumed.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Whether the connection is attached to a session.
    pub fn is_escalated(&self) -> bool {
        self.session_id.is_some()
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.conn
    }

    /// Parse and handle one text frame.
    pub fn handle_frame(&mut self, text: &str) {
        let result = match serde_json::from_str::<CustomerCommand>(text) {
            Ok(cmd) => self.handle(cmd),
            Err(e) => Err(parse_error(&e)),
        };
        if let Err(err) = result {
            record_rejection(&err);
            debug!(conn_id = %self.conn.id, error = %err, "customer command rejected");
            let _ = self.conn.send_event(&CustomerEvent::from_error(&err));
        }
    }

    /// Handle one command.
    pub fn handle(&mut self, cmd: CustomerCommand) -> Result<()> {
        match cmd {
            CustomerCommand::RequestHuman {
                display_name,
                context,
            } => {
                self.ensure_unattached()?;
                let created = self.broker.request_human(&self.conn, display_name, context)?;
                self.session_id = Some(created.entry.session_id);
            }
            CustomerCommand::Resume { session_id } => {
                self.ensure_unattached()?;
                let _ = self.broker.resume_customer(&self.conn, &session_id)?;
                self.session_id = Some(session_id);
            }
            CustomerCommand::Message { text } => {
                let session_id = self.session_id.as_ref().ok_or(BrokerError::NotEscalated)?;
                let _ = self.broker.customer_message(session_id, text)?;
            }
        }
        Ok(())
    }

    /// The socket closed.
    pub fn disconnect(&self) {
        if let Some(session_id) = &self.session_id {
            self.broker
                .multiplexer()
                .on_customer_disconnect(session_id, &self.conn.id);
        }
    }

    fn ensure_unattached(&self) -> Result<()> {
        match &self.session_id {
            Some(session_id) => Err(BrokerError::AlreadyEscalated {
                session_id: session_id.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Agent side of one WebSocket.
pub struct AgentEndpoint {
    broker: Arc<SessionBroker>,
    conn: Arc<ClientConnection>,
    agent_id: AgentId,
}

impl AgentEndpoint {
    /// Register the agent and send it `initial-state`.
    pub fn new(broker: Arc<SessionBroker>, conn: Arc<ClientConnection>) -> Self {
        let agent_id = broker.connect_agent(Arc::clone(&conn));
        Self {
            broker,
            conn,
            agent_id,
        }
    }

    /// This agent's ID.
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.conn
    }

    /// Parse and handle one text frame.
    pub fn handle_frame(&self, text: &str) {
        let result = match serde_json::from_str::<AgentCommand>(text) {
            Ok(cmd) => self.handle(cmd),
            Err(e) => Err(parse_error(&e)),
        };
        if let Err(err) = result {
            record_rejection(&err);
            debug!(agent_id = %self.agent_id, error = %err, "agent command rejected");
            let _ = self.conn.send_event(&AgentEvent::from_error(&err));
        }
    }

    /// Handle one command.
    pub fn handle(&self, cmd: AgentCommand) -> Result<()> {
        match cmd {
            AgentCommand::Accept { session_id } => {
                let _ = self.broker.accept(&self.agent_id, &session_id)?;
            }
            AgentCommand::Message { session_id, text } => {
                let _ = self.broker.agent_message(&self.agent_id, &session_id, text)?;
            }
            AgentCommand::Close { session_id } => {
                let _ = self
                    .broker
                    .close_session(&session_id, CloseReason::ClosedByAgent)?;
            }
            AgentCommand::GetQueue => {
                let _ = self.conn.send_event(&AgentEvent::QueueUpdate {
                    entries: self.broker.waiting_snapshot(),
                });
            }
        }
        Ok(())
    }

    /// The socket closed.
    pub fn disconnect(&self) {
        self.broker
            .multiplexer()
            .on_agent_disconnect(&self.agent_id, &self.conn.id);
    }
}

fn record_rejection(err: &BrokerError) {
    counter!(REJECTIONS_TOTAL, "code" => err.code().as_str()).increment(1);
}

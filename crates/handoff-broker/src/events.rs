//! Wire events exchanged with customer and agent connections.
//!
//! Each direction is a closed tagged union. Frames are JSON objects whose
//! `type` field carries the kebab-case variant name; fields are camelCase.

use chrono::{DateTime, Utc};
use handoff_core::{AgentId, ConnectionId, ErrorCode, SessionId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::BrokerError;
use crate::session::{ActiveSession, Message, QueueEntry, SessionState, UnassignedSession};

/// Customer → broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CustomerCommand {
    /// Escalate the conversation to a human.
    RequestHuman {
        /// Name shown on agent dashboards.
        #[serde(default)]
        display_name: Option<String>,
        /// Summary of the automated conversation so far.
        #[serde(default)]
        context: Option<String>,
    },
    /// Attach this connection to an existing live session.
    Resume {
        /// Session to rebind.
        session_id: SessionId,
    },
    /// Chat message.
    Message {
        /// Message body.
        text: String,
    },
}

/// Why the broker closed a customer session or connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// The bound agent ended the conversation.
    ClosedByAgent,
    /// Closed through the operator HTTP endpoint.
    ClosedByOperator,
    /// Another connection resumed this session.
    Replaced,
    /// No escalation arrived within the hello timeout.
    HelloTimeout,
    /// The server is shutting down.
    Shutdown,
}

/// Broker → customer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CustomerEvent {
    /// Sent once after the WebSocket upgrade.
    Connected {
        /// This connection's ID.
        connection_id: ConnectionId,
    },
    /// The session is in the waiting queue.
    Queued {
        /// New session ID; keep it to resume later.
        session_id: SessionId,
        /// 1-based queue position.
        position: usize,
    },
    /// The connection was attached to an existing session.
    Resumed {
        /// Rebound session.
        session_id: SessionId,
        /// Current state.
        state: SessionState,
        /// Conversation so far.
        messages: Vec<Message>,
    },
    /// A human agent accepted the session.
    AgentJoined {
        /// The bound agent.
        agent_id: AgentId,
    },
    /// Message from the agent.
    Message {
        /// Message body.
        text: String,
        /// Broker time at append.
        timestamp: DateTime<Utc>,
    },
    /// The bound agent dropped; another agent may take over.
    AgentLeft,
    /// The session was closed by the broker side.
    Closed {
        /// Why.
        reason: CloseReason,
    },
    /// A command was rejected.
    Error {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },
}

impl CustomerEvent {
    /// Rejection event for a failed command.
    pub fn from_error(err: &BrokerError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Agent → broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AgentCommand {
    /// Take a waiting or unassigned session.
    Accept {
        /// Target session.
        session_id: SessionId,
    },
    /// Chat message to a bound session.
    Message {
        /// Target session.
        session_id: SessionId,
        /// Message body.
        text: String,
    },
    /// End a session.
    Close {
        /// Target session.
        session_id: SessionId,
    },
    /// Ask for a fresh waiting snapshot.
    GetQueue,
}

/// Broker → agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    /// Dashboard bootstrap, sent before any other event.
    InitialState {
        /// This agent's generated ID.
        agent_id: AgentId,
        /// Waiting queue in arrival order.
        waiting_entries: Vec<QueueEntry>,
        /// All active bindings.
        active_sessions: Vec<ActiveSession>,
        /// Sessions whose agent dropped.
        unassigned_sessions: Vec<UnassignedSession>,
    },
    /// A customer joined the waiting queue.
    CustomerArrived {
        /// New session.
        session_id: SessionId,
        /// Customer display name.
        display_name: String,
        /// Session creation time.
        arrival_time: DateTime<Utc>,
        /// Queue length after arrival.
        queue_size: usize,
    },
    /// A session was taken by an agent.
    CustomerAccepted {
        /// Accepted session.
        session_id: SessionId,
        /// Agent that took it.
        agent_id: AgentId,
        /// Queue length after the accept.
        queue_size: usize,
    },
    /// A waiting customer left without being accepted.
    CustomerLeftQueue {
        /// Departed session.
        session_id: SessionId,
        /// Queue length after departure.
        queue_size: usize,
    },
    /// An active session lost its agent and can be re-accepted.
    SessionUnassigned {
        /// Affected session.
        session_id: SessionId,
        /// Customer display name.
        display_name: String,
    },
    /// Acknowledges this agent's accept.
    Accepted {
        /// Accepted session.
        session_id: SessionId,
        /// Customer display name.
        display_name: String,
        /// Conversation so far, including held customer messages.
        messages: Vec<Message>,
    },
    /// Message from a bound customer.
    Message {
        /// Source session.
        session_id: SessionId,
        /// Message body.
        text: String,
        /// Broker time at append.
        timestamp: DateTime<Utc>,
    },
    /// A session this agent could see was closed.
    CustomerClosed {
        /// Closed session.
        session_id: SessionId,
    },
    /// Waiting snapshot on request.
    QueueUpdate {
        /// Waiting queue in arrival order.
        entries: Vec<QueueEntry>,
    },
    /// A command was rejected.
    Error {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
        /// Session the command targeted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Actual session state, for invalid transitions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<SessionState>,
    },
}

impl AgentEvent {
    /// Rejection event for a failed command.
    pub fn from_error(err: &BrokerError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
            session_id: err.session_id().cloned(),
            state: err.state(),
        }
    }
}

/// Serialize an event into a text frame.
///
/// Serialization of these types cannot fail in practice; a failure is logged
/// and the frame skipped.
pub fn encode<T: Serialize>(event: &T) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            None
        }
    }
}

/// Error reply for a frame that did not parse.
pub fn parse_error(err: &serde_json::Error) -> BrokerError {
    BrokerError::InvalidMessage {
        reason: format!("unparseable frame: {err}"),
    }
}

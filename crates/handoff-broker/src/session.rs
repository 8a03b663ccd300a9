//! Customer session data model.
//!
//! A session's agent binding lives inside its [`SessionPhase`], so a waiting
//! session with a bound agent (or an active one without) cannot be built.

use std::fmt;

use chrono::{DateTime, Utc};
use handoff_core::{AgentId, ConnectionId, SessionId};
use serde::{Deserialize, Serialize};

/// Externally visible session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// Queued, no agent bound.
    Waiting,
    /// Bound to exactly one agent.
    Active,
    /// The bound agent dropped; the session can be re-accepted.
    AgentDisconnected,
    /// Terminal. Closed sessions are no longer held by the registry.
    Closed,
}

impl SessionState {
    /// The kebab-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::AgentDisconnected => "agent-disconnected",
            Self::Closed => "closed",
        }
    }

    /// Whether an agent may `accept` a session in this state.
    pub fn accepts_agent(self) -> bool {
        matches!(self, Self::Waiting | Self::AgentDisconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal phase of a live session, carrying the binding it implies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// In the waiting queue.
    Waiting,
    /// Bound to `agent_id`.
    Active {
        /// The one agent allowed to talk on this session.
        agent_id: AgentId,
    },
    /// The agent in `previous_agent` disconnected.
    AgentDisconnected {
        /// Agent that held the session before dropping.
        previous_agent: AgentId,
    },
}

impl SessionPhase {
    /// The externally visible state.
    pub fn state(&self) -> SessionState {
        match self {
            Self::Waiting => SessionState::Waiting,
            Self::Active { .. } => SessionState::Active,
            Self::AgentDisconnected { .. } => SessionState::AgentDisconnected,
        }
    }

    /// Currently bound agent, if any.
    pub fn bound_agent(&self) -> Option<&AgentId> {
        match self {
            Self::Active { agent_id } => Some(agent_id),
            Self::Waiting | Self::AgentDisconnected { .. } => None,
        }
    }
}

/// Who wrote a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    /// The customer.
    Customer,
    /// The bound human agent.
    Agent,
    /// The broker or the automated assistant before escalation.
    System,
}

impl SenderRole {
    /// Lowercase name, used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

/// One immutable entry of a session's conversation log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Author role.
    pub sender: SenderRole,
    /// Message body.
    pub text: String,
    /// Broker time at append.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Stamp a new message with the current time.
    pub fn now(sender: SenderRole, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A customer's escalated conversation, owned by the registry.
#[derive(Clone, Debug)]
pub struct CustomerSession {
    /// Session identifier.
    pub id: SessionId,
    /// Display name shown to agents.
    pub display_name: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Current phase and binding.
    pub phase: SessionPhase,
    /// Append-only conversation log.
    pub messages: Vec<Message>,
    /// Customer connection currently attached to this session.
    pub connection_id: ConnectionId,
}

impl CustomerSession {
    /// Externally visible state.
    pub fn state(&self) -> SessionState {
        self.phase.state()
    }

    /// Project into a queue entry.
    pub fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            session_id: self.id.clone(),
            display_name: self.display_name.clone(),
            arrival_time: self.created_at,
        }
    }
}

/// Thin projection of a waiting session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Session identifier.
    pub session_id: SessionId,
    /// Customer display name.
    pub display_name: String,
    /// Session creation time.
    pub arrival_time: DateTime<Utc>,
}

/// An active binding, for dashboard reconstruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    /// Session identifier.
    pub session_id: SessionId,
    /// Bound agent.
    pub agent_id: AgentId,
}

/// A session whose agent dropped, waiting to be re-accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignedSession {
    /// Session identifier.
    pub session_id: SessionId,
    /// Customer display name.
    pub display_name: String,
    /// Agent that dropped.
    pub previous_agent_id: AgentId,
}

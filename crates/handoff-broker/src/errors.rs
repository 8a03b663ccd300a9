//! Broker error types.

use handoff_core::{AgentId, ErrorCode, SessionId};
use thiserror::Error;

use crate::session::SessionState;

/// Rejections and failures reported by broker operations.
///
/// None of these are fatal: the broker state is unchanged by a rejected
/// command, and delivery failures never roll back a committed transition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The referenced session does not exist (never created, or closed).
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The unknown session.
        session_id: SessionId,
    },

    /// The session's current state does not allow the requested action.
    #[error("cannot {action} session {session_id} while it is {state}")]
    InvalidTransition {
        /// Target session.
        session_id: SessionId,
        /// Actual state at the time of the check.
        state: SessionState,
        /// The attempted action.
        action: &'static str,
    },

    /// The customer connection already escalated.
    #[error("connection already escalated as session {session_id}")]
    AlreadyEscalated {
        /// The session this connection is attached to.
        session_id: SessionId,
    },

    /// The customer connection has not escalated yet.
    #[error("request a human before sending messages")]
    NotEscalated,

    /// The session is active but bound to another agent.
    #[error("session {session_id} is not bound to agent {agent_id}")]
    NotBound {
        /// Target session.
        session_id: SessionId,
        /// Requesting agent.
        agent_id: AgentId,
    },

    /// The live session limit was reached.
    #[error("session limit of {limit} reached")]
    CapacityExhausted {
        /// Configured limit.
        limit: usize,
    },

    /// The payload was rejected before touching any state.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Why the payload was rejected.
        reason: String,
    },

    /// The counterpart connection could not be reached.
    #[error("{target} is unreachable")]
    Unreachable {
        /// Description of the unreachable endpoint.
        target: String,
    },
}

impl BrokerError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::AlreadyEscalated { .. } => ErrorCode::AlreadyEscalated,
            Self::NotEscalated => ErrorCode::NotEscalated,
            Self::NotBound { .. } => ErrorCode::NotBound,
            Self::CapacityExhausted { .. } => ErrorCode::CapacityExhausted,
            Self::InvalidMessage { .. } => ErrorCode::InvalidMessage,
            Self::Unreachable { .. } => ErrorCode::Unreachable,
        }
    }

    /// Session the error refers to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionNotFound { session_id }
            | Self::InvalidTransition { session_id, .. }
            | Self::AlreadyEscalated { session_id }
            | Self::NotBound { session_id, .. } => Some(session_id),
            Self::NotEscalated
            | Self::CapacityExhausted { .. }
            | Self::InvalidMessage { .. }
            | Self::Unreachable { .. } => None,
        }
    }

    /// Actual session state, for invalid-transition rejections.
    pub fn state(&self) -> Option<SessionState> {
        match self {
            Self::InvalidTransition { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub(crate) fn not_found(session_id: &SessionId) -> Self {
        Self::SessionNotFound {
            session_id: session_id.clone(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

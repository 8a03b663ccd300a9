//! Wire error codes.
//!
//! Every rejection the broker sends back to a connection carries one of these
//! codes next to a human-readable message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error code sent in `error` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The frame could not be parsed, or its payload is not acceptable.
    #[serde(rename = "INVALID_MESSAGE")]
    InvalidMessage,
    /// The referenced session does not exist.
    #[serde(rename = "SESSION_NOT_FOUND")]
    SessionNotFound,
    /// The session is not in a state that allows the requested transition.
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    /// The connection already escalated to a human.
    #[serde(rename = "ALREADY_ESCALATED")]
    AlreadyEscalated,
    /// The connection has not escalated yet.
    #[serde(rename = "NOT_ESCALATED")]
    NotEscalated,
    /// The session is not bound to the requesting agent.
    #[serde(rename = "NOT_BOUND")]
    NotBound,
    /// The live session limit was reached.
    #[serde(rename = "CAPACITY_EXHAUSTED")]
    CapacityExhausted,
    /// The target connection is gone or its send queue is full.
    #[serde(rename = "UNREACHABLE")]
    Unreachable,
}

impl ErrorCode {
    /// The code as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::AlreadyEscalated => "ALREADY_ESCALATED",
            Self::NotEscalated => "NOT_ESCALATED",
            Self::NotBound => "NOT_BOUND",
            Self::CapacityExhausted => "CAPACITY_EXHAUSTED",
            Self::Unreachable => "UNREACHABLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

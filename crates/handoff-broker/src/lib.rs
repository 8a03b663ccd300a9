//! # handoff-broker
//!
//! The live agent hand-off core: a session registry with an arrival-ordered
//! waiting queue, a connection multiplexer that routes events to customer and
//! agent connections, and the broker that drives each session through
//! `waiting → active ⇄ agent-disconnected → closed`.
//!
//! Everything here is transport-agnostic. Connections are bounded send
//! queues ([`ClientConnection`]); the server crate drains them into
//! WebSockets.

#![deny(unsafe_code)]

pub mod broker;
pub mod connection;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod multiplexer;
pub mod notifier;
pub mod queue;
pub mod registry;
pub mod session;

pub use broker::{BrokerConfig, BrokerStats, SessionBroker};
pub use connection::{ClientConnection, ConnectionRole, DeliveryError};
pub use endpoint::{AgentEndpoint, CustomerEndpoint};
pub use errors::{BrokerError, Result};
pub use events::{AgentCommand, AgentEvent, CloseReason, CustomerCommand, CustomerEvent};
pub use multiplexer::{BroadcastReport, ConnectionMultiplexer, TransportEvent};
pub use registry::{DashboardChange, SessionRegistry};
pub use session::{Message, QueueEntry, SenderRole, SessionState};

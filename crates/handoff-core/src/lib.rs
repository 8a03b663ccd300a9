//! # handoff-core
//!
//! Foundation types shared by every hand-off crate:
//!
//! - **Branded IDs**: `SessionId`, `AgentId`, `ConnectionId` as newtypes for type safety
//! - **Error codes**: [`ErrorCode`], the machine-readable codes carried on the wire
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber
//! - **Metrics**: metric name constants in [`metrics`]

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod metrics;

pub use errors::ErrorCode;
pub use ids::{AgentId, ConnectionId, SessionId};

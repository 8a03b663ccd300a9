//! WebSocket transport: per-connection reader loop, outbound writer, and the
//! binding between sockets and broker endpoints.

pub mod endpoint;
pub mod outbound;
pub mod session;

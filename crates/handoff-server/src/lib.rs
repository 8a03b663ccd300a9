//! # handoff-server
//!
//! Axum HTTP + `WebSocket` front end for the hand-off broker.
//!
//! - HTTP endpoints: welcome, health, broker stats, waiting queue, operator close, metrics
//! - `WebSocket` gateways for customers and agents at `/api/agent/ws/{customer,agent}`
//! - Per-connection writer task with Ping/Pong liveness and a bounded send queue
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::HandoffServer;

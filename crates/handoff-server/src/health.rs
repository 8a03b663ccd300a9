//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Attached customer and agent connections.
    pub connections: usize,
    /// Sessions waiting for an agent.
    pub waiting: usize,
    /// Sessions bound to an agent.
    pub active: usize,
    /// Deployment environment.
    pub environment: String,
}

/// Live counters reported by the health check.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounters {
    /// Attached customer and agent connections.
    pub connections: usize,
    /// Sessions waiting for an agent.
    pub waiting: usize,
    /// Sessions bound to an agent.
    pub active: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, counters: HealthCounters, environment: &str) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counters.connections,
        waiting: counters.waiting,
        active: counters.active,
        environment: environment.to_string(),
    }
}

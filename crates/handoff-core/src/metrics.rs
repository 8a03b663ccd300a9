//! Metric name constants shared by the broker and the server.

/// WebSocket connections opened total (counter, labels: role).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: role).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge, labels: role).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram, labels: role).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound frames dropped because a send queue was full or closed (counter).
pub const DELIVERY_DROPS_TOTAL: &str = "delivery_drops_total";
/// Customer sessions created total (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "sessions_created_total";
/// Customer sessions closed total (counter, labels: from).
pub const SESSIONS_CLOSED_TOTAL: &str = "sessions_closed_total";
/// Sessions currently waiting for an agent (gauge).
pub const QUEUE_DEPTH: &str = "queue_depth";
/// Successful accepts total (counter).
pub const ACCEPTS_TOTAL: &str = "accepts_total";
/// Rejected commands total (counter, labels: code).
pub const REJECTIONS_TOTAL: &str = "rejections_total";
/// Chat messages routed total (counter, labels: sender).
pub const MESSAGES_TOTAL: &str = "messages_total";

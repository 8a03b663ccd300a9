//! Server configuration.

use std::time::Duration;

use handoff_broker::BrokerConfig;
use handoff_settings::HandoffSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the hand-off server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Deployment environment reported by `/` and `/health`.
    pub environment: String,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
    /// Interval between server Ping frames, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without a Pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Close a customer connection that has not escalated after this long.
    pub hello_timeout_ms: u64,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_frame_bytes: usize,
    /// Broker limits.
    #[serde(skip)]
    pub broker: BrokerConfig,
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &HandoffSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            environment: settings.environment.clone(),
            cors_origins: settings.server.cors_origins.clone(),
            heartbeat_interval_ms: settings.server.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.server.heartbeat_timeout_ms,
            hello_timeout_ms: settings.server.hello_timeout_ms,
            send_queue_capacity: settings.server.send_queue_capacity,
            max_frame_bytes: settings.server.max_frame_bytes,
            broker: BrokerConfig {
                max_sessions: settings.broker.max_sessions,
                max_message_chars: settings.broker.max_message_chars,
                max_display_name_chars: settings.broker.max_display_name_chars,
            },
        }
    }

    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Customer hello timeout.
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            environment: "development".into(),
            cors_origins: Vec::new(),
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            hello_timeout_ms: 10_000,
            send_queue_capacity: 256,
            max_frame_bytes: 64 * 1024,
            broker: BrokerConfig::default(),
        }
    }
}

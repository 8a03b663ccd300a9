//! Settings type definitions.
//!
//! All types use camelCase field names and `#[serde(default)]`, so a partial
//! JSON file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000, "corsOrigins": ["https://example.com"] },
///   "broker": { "maxSessions": 200 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandoffSettings {
    /// Application name, echoed by the welcome endpoint.
    pub name: String,
    /// Deployment environment (`development` or `production`).
    pub environment: String,
    /// HTTP / WebSocket server settings.
    pub server: ServerSettings,
    /// Session broker limits.
    pub broker: BrokerSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for HandoffSettings {
    fn default() -> Self {
        Self {
            name: "handoff".to_string(),
            environment: "development".to_string(),
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl HandoffSettings {
    /// Whether the broker runs in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutMs must not be shorter than the interval".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be positive".into(),
            ));
        }
        if self.broker.max_sessions == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.maxSessions must be positive".into(),
            ));
        }
        if self.broker.max_message_chars == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.maxMessageChars must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed by CORS. Empty allows any origin.
    pub cors_origins: Vec<String>,
    /// Interval between server Ping frames in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// A client silent for longer than this is disconnected.
    pub heartbeat_timeout_ms: u64,
    /// Time a customer connection has to send its first command.
    pub hello_timeout_ms: u64,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Maximum WebSocket frame size in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            hello_timeout_ms: 10_000,
            send_queue_capacity: 256,
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// Session broker limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Maximum number of live customer sessions.
    pub max_sessions: usize,
    /// Maximum characters in one chat message.
    pub max_message_chars: usize,
    /// Maximum characters in a display name.
    pub max_display_name_chars: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 1_000,
            max_message_chars: 4_000,
            max_display_name_chars: 64,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

//! # handoff
//!
//! Hand-off broker binary: loads settings, installs logging and metrics,
//! and serves the customer and agent WebSocket endpoints until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use handoff_core::logging::{LogFormat, init_subscriber};
use handoff_server::config::ServerConfig;
use handoff_server::metrics;
use handoff_server::server::HandoffServer;
use handoff_settings::HandoffSettings;

/// Live agent hand-off broker.
#[derive(Parser, Debug)]
#[command(name = "handoff", about = "Live agent hand-off broker")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default `~/.handoff/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<HandoffSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(handoff_settings::settings_path);
        handoff_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }

    /// Fold command-line flags into the loaded settings.
    fn apply(&self, settings: &mut HandoffSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = cli.load_settings()?;
    cli.apply(&mut settings);

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    let handle = metrics::install_recorder().context("Failed to install metrics recorder")?;
    let server = HandoffServer::new(ServerConfig::from_settings(&settings), handle);
    let (addr, serve) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        environment = %settings.environment,
        "handoff broker listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop().await;
    let _ = serve.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "handoff",
            "--host",
            "127.0.0.1",
            "--port",
            "9100",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = HandoffSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn no_flags_keep_settings() {
        let cli = Cli::parse_from(["handoff"]);
        let mut settings = HandoffSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(!settings.logging.json);
    }

    #[test]
    fn settings_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9200}}"#).unwrap();
        let cli = Cli::parse_from(["handoff", "--settings", path.to_str().unwrap()]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.port, 9200);
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let cli = Cli::parse_from(["handoff", "--settings", path.to_str().unwrap()]);
        let err = cli.load_settings().unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}

//! # comment-relay
//!
//! Relay binary: loads settings, starts logging and metrics, and serves
//! the WebSocket relay until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::upstream::UpstreamConnector;
use relay_core::upstream::simulated::{SimulatedConfig, SimulatedConnector};
use relay_server::shutdown::DEFAULT_DRAIN_TIMEOUT;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{LogFormat, RelaySettings, SimulatedSettings, UpstreamKind};

/// Comment relay server.
#[derive(Parser, Debug)]
#[command(name = "comment-relay", about = "Relay one live comment feed to many WebSocket subscribers")]
struct Cli {
    /// Settings file (defaults to `~/.comment-relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent subscribers (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `pretty` or `json` (overrides settings).
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn settings_file(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(relay_settings::settings_path)
    }

    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn parse_log_format(raw: &str) -> std::result::Result<LogFormat, String> {
    LogFormat::parse(raw).ok_or_else(|| format!("unknown log format '{raw}' (expected pretty or json)"))
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    let path = cli.settings_file();
    let mut settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn simulated_config(settings: &SimulatedSettings) -> SimulatedConfig {
    SimulatedConfig {
        connect_delay: Duration::from_millis(settings.connect_delay_ms),
        comment_interval: Duration::from_millis(settings.comment_interval_ms),
        comment_limit: settings.comment_limit,
    }
}

fn build_connector(settings: &RelaySettings) -> Arc<dyn UpstreamConnector> {
    match settings.upstream.kind {
        UpstreamKind::Simulated => Arc::new(SimulatedConnector::new(simulated_config(
            &settings.upstream.simulated,
        ))),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    relay_logging::init_logging(&settings.logging).context("Failed to initialize logging")?;
    let metrics =
        relay_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let connector = build_connector(&settings);
    tracing::info!(
        upstream = settings.upstream.kind.as_str(),
        connector = connector.name(),
        "upstream configured"
    );

    let server = RelayServer::new(ServerConfig::from_settings(&settings), connector, metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Comment relay listening on ws://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    if server.manager().disconnect().await {
        tracing::info!("upstream session stopped");
    }
    let _ = server
        .shutdown()
        .drain(vec![handle], Some(DEFAULT_DRAIN_TIMEOUT))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_defaults_override_nothing() {
        let cli = Cli::parse_from(["comment-relay"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "comment-relay",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--max-connections",
            "12",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.max_connections, 12);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["comment-relay", "--log-format", "yaml"]).is_err());
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["comment-relay", "--config", "/tmp/relay.json"]);
        assert_eq!(cli.settings_file(), PathBuf::from("/tmp/relay.json"));
    }

    #[test]
    fn default_settings_file_under_relay_dir() {
        let cli = Cli::parse_from(["comment-relay"]);
        let path = cli.settings_file();
        assert!(path.to_string_lossy().contains(".comment-relay"));
        assert!(path.to_string_lossy().ends_with("settings.json"));
    }

    #[test]
    fn load_applies_file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server":{{"port":9100,"maxConnections":4}}}}"#).unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let cli = Cli::parse_from(["comment-relay", "--config", &path, "--port", "9200"]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.server.max_connections, 4);
    }

    #[test]
    fn load_rejects_zero_connection_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json").to_string_lossy().into_owned();
        let cli = Cli::parse_from(["comment-relay", "--config", &path, "--max-connections", "0"]);
        assert!(load(&cli).is_err());
    }

    #[test]
    fn simulated_timing_converts_to_durations() {
        let config = simulated_config(&SimulatedSettings {
            connect_delay_ms: 10,
            comment_interval_ms: 250,
            comment_limit: Some(3),
        });
        assert_eq!(config.connect_delay, Duration::from_millis(10));
        assert_eq!(config.comment_interval, Duration::from_millis(250));
        assert_eq!(config.comment_limit, Some(3));
    }

    #[test]
    fn connector_follows_upstream_kind() {
        let connector = build_connector(&RelaySettings::default());
        assert_eq!(connector.name(), "simulated");
    }
}

//! padlink pointer server: entry point.
//!
//! Runs the server headless.  Touch events, clicks, keys and text are read
//! line by line from standard input (see
//! [`lines`](padlink_server::infrastructure::input_source::lines) for the
//! format), status events are logged, and Ctrl+C stops everything.
//!
//! # Usage
//!
//! ```text
//! padlink-server [OPTIONS]
//!
//! Options:
//!   --config    <PATH>       TOML config file [default: platform config dir]
//!   --transport <KIND>       datagram | named-query
//!   --port      <PORT>       UDP port
//!   --password  <PASSWORD>   Enables encryption; empty = unsecured
//!   --tick-ms   <MS>         Send-loop period
//!   --log-level <LEVEL>      Used when RUST_LOG is unset
//! ```
//!
//! Values given on the command line (or through their environment variables)
//! override the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use padlink_server::infrastructure::input_source::lines::LineInputSource;
use padlink_server::infrastructure::input_source::InputSource;
use padlink_server::infrastructure::server::PointerServer;
use padlink_server::infrastructure::storage::config::{
    load_config, load_config_from, AppConfig, ConfigError, TransportKind,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Transport selection on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Datagram,
    NamedQuery,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Datagram => TransportKind::Datagram,
            TransportArg::NamedQuery => TransportKind::NamedQuery,
        }
    }
}

/// Touch-device remote pointer server.
#[derive(Debug, Parser)]
#[command(
    name = "padlink-server",
    about = "Streams touch-pad pointer motion and input commands to desktop listeners",
    version
)]
struct Cli {
    /// Path of the TOML config file.  Defaults to the platform config dir.
    #[arg(long, env = "PADLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Which transport binding to serve.
    #[arg(long, value_enum, env = "PADLINK_TRANSPORT")]
    transport: Option<TransportArg>,

    /// UDP port for the datagram socket or named-query face.
    #[arg(long, env = "PADLINK_PORT")]
    port: Option<u16>,

    /// Shared password.  An empty password disables encryption.
    #[arg(long, env = "PADLINK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Send-loop period in milliseconds.
    #[arg(long, env = "PADLINK_TICK_MS")]
    tick_ms: Option<u64>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies command-line overrides on top.
    fn into_config(self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => match load_config() {
                Ok(config) => config,
                Err(ConfigError::NoPlatformConfigDir) => AppConfig::default(),
                Err(e) => return Err(e).context("failed to load config"),
            },
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(self, config: &mut AppConfig) {
        if let Some(transport) = self.transport {
            config.server.transport = transport.into();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(password) = self.password {
            config.server.password = password;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.protocol.tick_ms = tick_ms;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!(
        "padlink server starting ({:?} transport, {})",
        config.server.transport,
        if config.server.password.is_empty() {
            "unsecured"
        } else {
            "secured"
        }
    );

    let (server, mut events) = PointerServer::new(config).context("invalid configuration")?;
    let server = Arc::new(server);

    // ── Status event pump ─────────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!("{event}");
        }
    });

    let local_addr = server.start().context("failed to start transport")?;
    info!("listening on {local_addr}.  Press Ctrl-C to exit.");

    // ── Local input ───────────────────────────────────────────────────────────
    let input = LineInputSource::stdin();
    let input_rx = input.start().context("failed to start input reader")?;
    let input_server = Arc::clone(&server);
    std::thread::Builder::new()
        .name("padlink-input-pump".to_string())
        .spawn(move || {
            for event in input_rx {
                input_server.on_input(event);
            }
        })
        .context("failed to spawn input pump")?;

    // ── Ctrl-C ────────────────────────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C signal: {e}");
    }
    info!("shutdown signal received");

    input.stop();
    let stop_server = Arc::clone(&server);
    tokio::task::spawn_blocking(move || stop_server.stop())
        .await
        .context("shutdown task failed")?;

    info!("padlink server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! TOML-based configuration persistence for the pointer server.
//!
//! Reads [`AppConfig`] from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Padlink\config.toml`
//! - Linux:    `~/.config/padlink/config.toml`
//! - macOS:    `~/Library/Application Support/Padlink/config.toml`
//!
//! A complete file looks like this; every key is optional:
//!
//! ```toml
//! [server]
//! transport = "datagram"      # or "named_query"
//! port = 10888
//! bind_address = "0.0.0.0"
//! password = ""               # empty = unsecured
//! log_level = "info"
//! route_prefix = "/ndnmouse"
//!
//! [input]
//! move_sensitivity = 1.0
//! scroll_inverted = false
//! precision_px = 5
//!
//! [protocol]
//! tick_ms = 50
//! packet_bytes = 48
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent, so the server runs on first start
//! (no file at all) and with files written by older versions.

use std::path::{Path, PathBuf};

use padlink_core::{InputSettings, SettingsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::manage_sessions::ProtocolGeneration;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but holds a value the server cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid input settings: {0}")]
    Settings(#[from] SettingsError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub input: InputSettings,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Which binding carries the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Push: datagrams, one send loop per listener.
    #[default]
    Datagram,
    /// Pull: listeners query named routes.
    NamedQuery,
}

/// Network and security settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub transport: TransportKind,
    /// UDP port for the datagram socket or the named-query face.
    #[serde(default = "default_port")]
    pub port: u16,
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Empty means unsecured.
    #[serde(default)]
    pub password: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Name prefix the named-query routes are registered under.
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
}

/// Wire protocol tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    /// Send-loop period in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// 48 for the current generation, 32 for the deprecated legacy one.
    #[serde(default = "default_packet_bytes")]
    pub packet_bytes: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    10888
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_route_prefix() -> String {
    "/ndnmouse".to_string()
}
fn default_tick_ms() -> u64 {
    50
}
fn default_packet_bytes() -> usize {
    48
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            port: default_port(),
            bind_address: default_bind_address(),
            password: String::new(),
            log_level: default_log_level(),
            route_prefix: default_route_prefix(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            packet_bytes: default_packet_bytes(),
        }
    }
}

impl ProtocolConfig {
    /// The wire generation selected by `packet_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for any size other than 48 or 32.
    pub fn generation(&self) -> Result<ProtocolGeneration, ConfigError> {
        ProtocolGeneration::from_packet_bytes(self.packet_bytes).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "packet_bytes must be 48 or 32, got {}",
                self.packet_bytes
            ))
        })
    }
}

impl AppConfig {
    /// Checks the values serde cannot constrain on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] or [`ConfigError::Settings`] naming
    /// the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.input.validate()?;
        self.protocol.generation()?;
        if self.protocol.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be positive".into()));
        }
        if self.server.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "bind_address {:?} is not an IP address",
                self.server.bind_address
            )));
        }
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the platform path; defaults if there is no file.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads [`AppConfig`] from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Padlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("padlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Padlink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! PointerServer: the facade the binary (or an embedding UI) drives.
//!
//! It owns the shared input settings, the session manager and whichever
//! transport the configuration selects.  Local input enters through
//! [`PointerServer::on_input`] or the narrower `on_touch`,
//! `execute_command` and `type_text` calls; lifecycle changes leave through
//! the [`ServerEvent`] receiver returned by [`PointerServer::new`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use padlink_core::{Command, GestureRecognizer, SettingsError, SharedSettings, TouchEvent};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::input_source::InputEvent;
use super::network::datagram::DatagramTransport;
use super::network::named_query::NamedQueryTransport;
use super::network::{Transport, TransportError};
use super::storage::config::{AppConfig, ConfigError, TransportKind};
use crate::application::events::{emit, ServerEvent, EVENT_CHANNEL_CAPACITY};
use crate::application::manage_sessions::{SessionConfig, SessionError, SessionManager};

/// Errors surfaced by the server facade.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// The running pointer server.
pub struct PointerServer {
    config: AppConfig,
    settings: SharedSettings,
    manager: Arc<SessionManager>,
    events: mpsc::Sender<ServerEvent>,
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl PointerServer {
    /// Validates `config` and builds the session manager.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for invalid values and
    /// [`ServerError::Session`] when key material cannot be created.  The
    /// latter is also reported as [`ServerEvent::Fatal`].
    pub fn new(config: AppConfig) -> Result<(Self, mpsc::Receiver<ServerEvent>), ServerError> {
        config.validate()?;
        let generation = config.protocol.generation()?;

        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let settings = SharedSettings::new(config.input.clone());
        let recognizer = Arc::new(GestureRecognizer::new(settings.clone()));
        let session_config = SessionConfig {
            password: config.server.password.clone(),
            generation,
        };

        let manager = match SessionManager::new(session_config, recognizer) {
            Ok(manager) => Arc::new(manager),
            Err(e) => {
                emit(&events, ServerEvent::Fatal(e.to_string()));
                return Err(e.into());
            }
        };

        Ok((
            Self {
                config,
                settings,
                manager,
                events,
                transport: Mutex::new(None),
            },
            rx,
        ))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Address the transport binds, from `bind_address` and `port`.
    pub fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        let ip: IpAddr = self.config.server.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "bind_address {:?} is not an IP address",
                self.config.server.bind_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.config.server.port))
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Starts the configured transport and returns its bound address.
    ///
    /// # Errors
    ///
    /// Bind and route-registration failures are fatal: they are returned and
    /// also reported as [`ServerEvent::Fatal`].
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut slot = self.transport.lock();
        if slot.is_some() {
            return Err(TransportError::AlreadyRunning.into());
        }

        let bind_addr = self.bind_addr()?;
        let result = self.build_transport(bind_addr).and_then(|transport| {
            let local_addr = transport.start()?;
            Ok((transport, local_addr))
        });

        match result {
            Ok((transport, local_addr)) => {
                *slot = Some(transport);
                Ok(local_addr)
            }
            Err(e) => {
                emit(&self.events, ServerEvent::Fatal(e.to_string()));
                Err(e.into())
            }
        }
    }

    fn build_transport(&self, bind_addr: SocketAddr) -> Result<Box<dyn Transport>, TransportError> {
        let manager = Arc::clone(&self.manager);
        let events = self.events.clone();
        Ok(match self.config.server.transport {
            TransportKind::Datagram => Box::new(DatagramTransport::new(
                manager,
                bind_addr,
                Duration::from_millis(self.config.protocol.tick_ms),
                events,
            )),
            TransportKind::NamedQuery => Box::new(NamedQueryTransport::new(
                manager,
                bind_addr,
                &self.config.server.route_prefix,
                events,
            )?),
        })
    }

    /// Stops the transport and every session.  Safe to call twice.
    pub fn stop(&self) {
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            transport.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.transport.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.lock().as_ref().and_then(|t| t.local_addr())
    }

    // ── Local input ───────────────────────────────────────────────────────────

    /// Applies one `[input]` setting by name to all running sessions.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Settings`] for unknown keys or bad values.
    pub fn update_setting(&self, key: &str, value: &str) -> Result<(), ServerError> {
        self.settings.update(key, value)?;
        info!("setting {key} = {value}");
        Ok(())
    }

    /// Feeds one touch event to the gesture recognizer.  A tap queues a click.
    pub fn on_touch(&self, event: TouchEvent) {
        if let Some(click) = self.manager.recognizer().handle(event) {
            self.manager.enqueue_command(click);
        }
    }

    pub fn execute_command(&self, command: Command) {
        debug!("queueing {command:?}");
        self.manager.enqueue_command(command);
    }

    /// Queues typed text; long text is split into several commands.
    pub fn type_text(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.manager.enqueue_command(Command::Type(text.to_string()));
    }

    /// Dispatches any [`InputEvent`].
    pub fn on_input(&self, event: InputEvent) {
        match event {
            InputEvent::Touch(touch) => self.on_touch(touch),
            InputEvent::Command(command) => self.execute_command(command),
            InputEvent::Text(text) => self.type_text(&text),
            InputEvent::Setting { key, value } => {
                if let Err(e) = self.update_setting(&key, &value) {
                    warn!("{e}");
                }
            }
        }
    }
}

impl Drop for PointerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

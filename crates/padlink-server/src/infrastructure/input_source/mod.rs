//! Input sources: where touch events, commands and typed text come from.
//!
//! The server itself has no opinion on where input originates.  A touch
//! driver, a test harness or a line-oriented console all produce the same
//! [`InputEvent`] stream, which [`PointerServer::on_input`] consumes.
//!
//! # Testability
//!
//! The [`InputSource`] trait lets tests inject synthetic events through
//! [`mock::MockInputSource`] without any real device.
//!
//! [`PointerServer::on_input`]: crate::infrastructure::server::PointerServer::on_input

use std::sync::mpsc;

use padlink_core::{Command, TouchEvent};
use thiserror::Error;

pub mod lines;
pub mod mock;

/// One unit of local input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A raw event from the touch surface.
    Touch(TouchEvent),
    /// A click or key command from the on-screen controls.
    Command(Command),
    /// Text typed on the device keyboard.  Fragmented before sending.
    Text(String),
    /// A live change to one input setting.
    Setting { key: String, value: String },
}

/// Error type for input sources.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input source has already been started")]
    AlreadyStarted,

    #[error("failed to spawn input thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A console line could not be understood.
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Trait abstracting input event production.
pub trait InputSource: Send {
    /// Starts the source and returns a receiver for its events.
    fn start(&self) -> Result<mpsc::Receiver<InputEvent>, InputError>;

    /// Stops the source.  The receiver disconnects once the source's
    /// producer has exited.
    fn stop(&self);
}

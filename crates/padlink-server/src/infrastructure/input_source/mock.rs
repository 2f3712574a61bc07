//! Mock input source for unit testing.
//!
//! Allows tests to inject synthetic [`InputEvent`]s without a touch device.

use std::sync::mpsc::{self, Sender};

use parking_lot::Mutex;

use super::{InputError, InputEvent, InputSource};

/// A mock implementation of [`InputSource`] that allows tests to inject events.
#[derive(Default)]
pub struct MockInputSource {
    sender: Mutex<Option<Sender<InputEvent>>>,
}

impl MockInputSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects a synthetic event.
    ///
    /// Returns `false` if the source is not started or the receiver is gone.
    pub fn inject_event(&self, event: InputEvent) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.send(event).is_ok())
    }
}

impl InputSource for MockInputSource {
    fn start(&self) -> Result<mpsc::Receiver<InputEvent>, InputError> {
        let mut guard = self.sender.lock();
        if guard.is_some() {
            return Err(InputError::AlreadyStarted);
        }
        let (tx, rx) = mpsc::channel();
        *guard = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        // Drop the sender to close the channel
        *self.sender.lock() = None;
    }
}

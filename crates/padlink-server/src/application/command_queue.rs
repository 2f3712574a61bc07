//! FIFO of pending discrete commands (clicks, key presses, typed text).
//!
//! The server keeps one queue in unsecured mode, shared by every listener
//! (the first send loop to tick takes the command), and one queue per
//! session in secured mode, where every enqueue fans out to all sessions.
//! The fan-out itself lives in
//! [`SessionManager::enqueue_command`](crate::application::manage_sessions::SessionManager::enqueue_command).

use std::collections::VecDeque;

use padlink_core::Command;
use parking_lot::Mutex;

/// Where commands are queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// One server-wide queue (unsecured broadcast mode).
    Global,
    /// One queue per session (secured mode).
    PerSession,
}

/// A thread-safe command FIFO.
///
/// Pushed by the input thread, drained by send loops; every operation takes
/// the lock once.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, cmd: Command) {
        self.inner.lock().push_back(cmd);
    }

    /// Appends several commands so no other push lands between them.
    pub fn push_all(&self, cmds: impl IntoIterator<Item = Command>) {
        self.inner.lock().extend(cmds);
    }

    /// Removes and returns the oldest command.
    pub fn pop(&self) -> Option<Command> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use padlink_core::protocol::{Key, MouseButton, PressAction};

    #[test]
    fn test_queue_is_fifo() {
        // Arrange
        let q = CommandQueue::new();
        let first = Command::click(MouseButton::Left, PressAction::Down);
        let second = Command::click(MouseButton::Left, PressAction::Up);

        // Act
        q.push(first.clone());
        q.push(second.clone());

        // Assert
        assert_eq!(q.pop(), Some(first));
        assert_eq!(q.pop(), Some(second));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_push_all_keeps_order() {
        let q = CommandQueue::new();
        q.push(Command::key(Key::Enter, PressAction::Full));
        q.push_all(Command::typed("abcdefghijklm"));

        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(Command::key(Key::Enter, PressAction::Full)));
        assert_eq!(q.pop(), Some(Command::Type("abcdefghij".into())));
        assert_eq!(q.pop(), Some(Command::Type("klm".into())));
    }

    #[test]
    fn test_clear_empties_queue() {
        let q = CommandQueue::new();
        q.push(Command::Type("x".into()));
        q.clear();
        assert!(q.is_empty());
    }
}

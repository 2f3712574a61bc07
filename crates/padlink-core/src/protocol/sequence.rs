//! Thread-safe sequence numbering for secure packets.
//!
//! # What is a sequence number? (for beginners)
//!
//! Every secure packet carries a 4-byte big-endian sequence number inside its
//! encrypted plaintext.  Because the number is encrypted, an eavesdropper
//! cannot forge a fresh one; because each side only accepts numbers larger
//! than the last one it accepted, a captured packet cannot be replayed.
//!
//! Two halves live here:
//!
//! - [`SequenceCounter`] mints *outbound* numbers for one session.
//! - [`SequenceWatermark`] remembers the highest *inbound* number accepted
//!   from one peer and rejects anything that does not exceed it.
//!
//! # Thread safety
//!
//! Both types are built on `AtomicU32`.  The counter is advanced by the send
//! loop and by the receive loop (for ACK replies), so a single
//! read-modify-write step per call is required; `fetch_update` gives us that
//! without a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// Largest sequence number on the wire.
///
/// Peers decode the field as a signed 32-bit integer, so the counter wraps to
/// 0 after `i32::MAX` rather than after `u32::MAX`.
pub const MAX_SEQUENCE: u32 = i32::MAX as u32;

fn step(value: u32) -> u32 {
    if value >= MAX_SEQUENCE {
        0
    } else {
        value + 1
    }
}

/// A thread-safe, monotonically increasing counter for outbound sequence numbers.
///
/// The counter starts at 0 and [`next`](Self::next) returns the *incremented*
/// value, so the first packet of a session carries sequence 1.  After
/// [`MAX_SEQUENCE`] the counter wraps to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use padlink_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU32,
}

impl SequenceCounter {
    /// Creates a new counter at 0.
    pub fn new() -> Self {
        Self {
            inner: AtomicU32::new(0),
        }
    }

    /// Advances the counter and returns the new value.
    pub fn next(&self) -> u32 {
        // The closure never returns `None`, so both arms carry the old value.
        let prev = match self
            .inner
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(step(v)))
        {
            Ok(v) | Err(v) => v,
        };
        step(prev)
    }

    /// Returns the last value handed out without advancing.
    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }

    /// Raises the counter to `value` if it is currently lower.
    ///
    /// Used by sequence resynchronisation when a peer reports that it has
    /// already seen numbers beyond ours.  Returns the resulting value.
    pub fn advance_to(&self, value: u32) -> u32 {
        let value = value.min(MAX_SEQUENCE);
        self.inner.fetch_max(value, Ordering::Relaxed).max(value)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Highest inbound sequence number accepted from one peer.
#[derive(Debug, Default)]
pub struct SequenceWatermark {
    inner: AtomicU32,
}

impl SequenceWatermark {
    /// Creates a watermark at 0 (the OPEN packet's sequence number).
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `seq` only if it strictly exceeds the watermark.
    ///
    /// On success the watermark moves to `seq` and `true` is returned; a
    /// replayed or lower number leaves the watermark untouched.
    pub fn accept(&self, seq: u32) -> bool {
        self.inner
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (seq > current).then_some(seq)
            })
            .is_ok()
    }

    /// Current watermark.
    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_first_value_is_one() {
        // Arrange
        let counter = SequenceCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, 1);
    }

    #[test]
    fn test_sequence_counter_increments_monotonically() {
        let counter = SequenceCounter::new();
        let values: Vec<u32> = (0..100).map(|_| counter.next()).collect();
        for window in values.windows(2) {
            assert!(window[1] > window[0], "values must be monotonically increasing");
        }
    }

    #[test]
    fn test_sequence_counter_wraps_after_max_sequence() {
        // Arrange – start one step before the wrap
        let counter = SequenceCounter {
            inner: AtomicU32::new(MAX_SEQUENCE - 1),
        };

        // Act
        let last = counter.next();
        let wrapped = counter.next();

        // Assert
        assert_eq!(last, MAX_SEQUENCE);
        assert_eq!(wrapped, 0, "counter must wrap to 0 after MAX_SEQUENCE");
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_sequence_counter_is_thread_safe() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());
        let thread_count = 8;
        let increments_per_thread = 1000;

        // Act
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..increments_per_thread).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all_values: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all_values.sort_unstable();
        all_values.dedup();
        assert_eq!(all_values.len(), thread_count * increments_per_thread);
    }

    #[test]
    fn test_advance_to_only_moves_forward() {
        let counter = SequenceCounter::new();
        counter.next();
        assert_eq!(counter.advance_to(40), 40);
        assert_eq!(counter.advance_to(10), 40);
        assert_eq!(counter.next(), 41);
    }

    #[test]
    fn test_watermark_accepts_strictly_increasing_values() {
        let mark = SequenceWatermark::new();
        assert!(mark.accept(1));
        assert!(mark.accept(5));
        assert_eq!(mark.current(), 5);
    }

    #[test]
    fn test_watermark_rejects_replay_and_decrease_without_change() {
        // Arrange
        let mark = SequenceWatermark::new();
        mark.accept(3);

        // Act / Assert
        assert!(!mark.accept(3), "replay must be rejected");
        assert!(!mark.accept(2), "decrease must be rejected");
        assert_eq!(mark.current(), 3);
    }

    #[test]
    fn test_watermark_rejects_zero_after_open() {
        assert!(!SequenceWatermark::new().accept(0));
    }
}

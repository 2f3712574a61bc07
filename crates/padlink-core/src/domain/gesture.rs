//! Gesture recognizer: raw touch events → relative deltas, tap clicks and
//! two-finger scroll.
//!
//! # How it works (for beginners)
//!
//! The input thread feeds every touch event into
//! [`GestureRecognizer::handle`].  The recognizer does not emit motion
//! directly; it only keeps a *buffered absolute position* up to date.  Each
//! session's send loop then calls [`GestureRecognizer::read_relative_delta`]
//! once per tick, which returns how far the finger travelled since the
//! previous read and moves the origin forward.  Reading twice without any
//! movement in between therefore yields `(0, 0)` the second time.
//!
//! The first read after a touch-down always returns zero.  Without that rule,
//! lifting the finger and putting it down elsewhere would make the cursor
//! jump by the distance between the two touch points.
//!
//! # Single consumer
//!
//! Reading a delta consumes it.  The state sits behind a mutex so concurrent
//! readers cannot corrupt it, but when several sessions read in parallel each
//! movement goes to whichever one reads first.  The recognizer assumes one
//! effective consumer stream; arbitrating deltas between listeners is not
//! attempted.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::settings::{InputSettings, SharedSettings};
use crate::protocol::messages::{Command, MouseButton, MoveKind, MoveMessage, PressAction, ScreenSize};

/// A point on the touch surface, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchPosition {
    pub x: i32,
    pub y: i32,
}

impl TouchPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn within(&self, width: u32, height: u32) -> bool {
        (0..=width as i64).contains(&(self.x as i64)) && (0..=height as i64).contains(&(self.y as i64))
    }
}

/// One raw event from the touch surface.  Timestamps are milliseconds on any
/// monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TouchEvent {
    Down { pos: TouchPosition, at_ms: u64 },
    /// Finger moved; `secondary` is the second finger, if one is down.
    Move {
        pos: TouchPosition,
        secondary: Option<TouchPosition>,
        at_ms: u64,
    },
    Up { pos: TouchPosition, at_ms: u64 },
}

/// Whether a delta is pointer motion or scrolling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaKind {
    #[default]
    Move,
    Scroll,
}

/// Raw (unscaled) displacement consumed by one read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delta {
    pub dx: i32,
    pub dy: i32,
    pub kind: DeltaKind,
}

impl Delta {
    pub fn is_zero(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }

    /// Applies sensitivity (and scroll direction) to build the outbound
    /// movement message.  Returns `None` when nothing is left to report.
    ///
    /// Scaling truncates toward zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use padlink_core::{Delta, DeltaKind, InputSettings};
    ///
    /// let settings = InputSettings { move_sensitivity: 2.0, ..InputSettings::default() };
    /// let delta = Delta { dx: 3, dy: -4, kind: DeltaKind::Move };
    /// let msg = delta.to_move_message(&settings).unwrap();
    /// assert_eq!((msg.dx, msg.dy), (6, -8));
    /// ```
    pub fn to_move_message(&self, settings: &InputSettings) -> Option<MoveMessage> {
        let (kind, sensitivity, sign) = match self.kind {
            DeltaKind::Move => (MoveKind::Relative, settings.move_sensitivity, 1.0),
            DeltaKind::Scroll => (
                MoveKind::Scroll,
                settings.scroll_sensitivity,
                if settings.scroll_inverted { 1.0 } else { -1.0 },
            ),
        };
        let dx = (self.dx as f32 * sensitivity * sign) as i32;
        let dy = (self.dy as f32 * sensitivity * sign) as i32;
        (dx != 0 || dy != 0).then(|| MoveMessage::new(kind, dx, dy))
    }
}

/// Maps a surface position onto the listener's screen for the deprecated
/// absolute mode.
pub fn scale_absolute(pos: TouchPosition, settings: &InputSettings, screen: ScreenSize) -> MoveMessage {
    let scale = |v: i32, from: u32, to: u32| -> i32 {
        if from == 0 {
            0
        } else {
            (v as i64 * to as i64 / from as i64) as i32
        }
    };
    MoveMessage::new(
        MoveKind::Absolute,
        scale(pos.x, settings.surface_width, screen.width),
        scale(pos.y, settings.surface_height, screen.height),
    )
}

#[derive(Debug, Default)]
struct GestureState {
    absolute: TouchPosition,
    last: TouchPosition,
    skip_next: bool,
    touching: bool,
    down_at_ms: u64,
    down_origin: TouchPosition,
    scroll_active: bool,
    last_reported_absolute: Option<TouchPosition>,
}

/// Sole holder of touch state for the whole server.
#[derive(Debug)]
pub struct GestureRecognizer {
    state: Mutex<GestureState>,
    settings: SharedSettings,
}

impl GestureRecognizer {
    pub fn new(settings: SharedSettings) -> Self {
        Self {
            state: Mutex::new(GestureState {
                skip_next: true,
                ..GestureState::default()
            }),
            settings,
        }
    }

    /// Feeds one touch event.
    ///
    /// Returns a left full-click command when a touch-up completes a tap.
    pub fn handle(&self, event: TouchEvent) -> Option<Command> {
        let settings = self.settings.snapshot();
        let mut state = self.state.lock();

        match event {
            TouchEvent::Down { pos, at_ms } => {
                state.touching = true;
                state.down_at_ms = at_ms;
                state.down_origin = pos;
                state.scroll_active = false;
                track(&mut state, pos, &settings);
                None
            }
            TouchEvent::Move { pos, secondary, .. } => {
                track(&mut state, pos, &settings);
                state.scroll_active = secondary
                    .map(|second| second.y.abs_diff(pos.y) <= settings.scroll_max_finger_gap_px)
                    .unwrap_or(false);
                None
            }
            TouchEvent::Up { pos, at_ms } => {
                state.touching = false;
                state.skip_next = true;
                state.scroll_active = false;

                let origin = state.down_origin;
                let elapsed = at_ms.saturating_sub(state.down_at_ms);
                let is_tap = settings.tap_to_click
                    && within_distance(origin, pos, settings.tap_max_distance_px)
                    && elapsed <= settings.tap_max_duration_ms;
                if is_tap {
                    debug!(elapsed_ms = elapsed, "tap recognised as left click");
                }
                is_tap.then(|| Command::click(MouseButton::Left, PressAction::Full))
            }
        }
    }

    /// Returns the movement since the previous read and consumes it.
    ///
    /// Zero unless a finger is down, and zero on the first read after each
    /// touch-down.
    pub fn read_relative_delta(&self) -> Delta {
        let mut state = self.state.lock();
        let kind = if state.scroll_active {
            DeltaKind::Scroll
        } else {
            DeltaKind::Move
        };

        if !state.touching {
            return Delta { dx: 0, dy: 0, kind };
        }
        if state.skip_next {
            state.skip_next = false;
            state.last = state.absolute;
            return Delta { dx: 0, dy: 0, kind };
        }

        let delta = Delta {
            dx: state.absolute.x - state.last.x,
            dy: state.absolute.y - state.last.y,
            kind,
        };
        state.last = state.absolute;
        delta
    }

    /// Returns the buffered absolute position if it changed since the last
    /// call (deprecated absolute mode).
    pub fn read_absolute_change(&self) -> Option<TouchPosition> {
        let mut state = self.state.lock();
        let current = state.absolute;
        if state.last_reported_absolute == Some(current) {
            return None;
        }
        state.last_reported_absolute = Some(current);
        Some(current)
    }

    /// The settings this recognizer reads.
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }
}

/// Moves the buffered position when the step clears the precision threshold
/// and the point lies on the surface.
fn track(state: &mut GestureState, pos: TouchPosition, settings: &InputSettings) {
    if !pos.within(settings.surface_width, settings.surface_height) {
        return;
    }
    let precision = settings.precision_px;
    if pos.x.abs_diff(state.absolute.x) >= precision
        || pos.y.abs_diff(state.absolute.y) >= precision
    {
        state.absolute = pos;
    }
}

/// Euclidean distance check between two points, in u128 so extreme
/// coordinates cannot overflow.
fn within_distance(a: TouchPosition, b: TouchPosition, max_px: u32) -> bool {
    let dx = u128::from(a.x.abs_diff(b.x));
    let dy = u128::from(a.y.abs_diff(b.y));
    let max = u128::from(max_px);
    dx * dx + dy * dy <= max * max
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer() -> GestureRecognizer {
        GestureRecognizer::new(SharedSettings::new(InputSettings {
            surface_width: 1000,
            surface_height: 1000,
            ..InputSettings::default()
        }))
    }

    fn down(x: i32, y: i32, at_ms: u64) -> TouchEvent {
        TouchEvent::Down { pos: TouchPosition::new(x, y), at_ms }
    }

    fn mv(x: i32, y: i32) -> TouchEvent {
        TouchEvent::Move {
            pos: TouchPosition::new(x, y),
            secondary: None,
            at_ms: 0,
        }
    }

    fn up(x: i32, y: i32, at_ms: u64) -> TouchEvent {
        TouchEvent::Up { pos: TouchPosition::new(x, y), at_ms }
    }

    #[test]
    fn test_first_read_after_touch_down_is_zero() {
        // Arrange
        let r = recognizer();
        r.handle(down(100, 100, 0));

        // Act
        let first = r.read_relative_delta();

        // Assert
        assert!(first.is_zero());
    }

    #[test]
    fn test_read_relative_delta_consumes_measurement() {
        // Arrange
        let r = recognizer();
        r.handle(down(100, 100, 0));
        r.read_relative_delta();
        r.handle(mv(130, 90));

        // Act
        let first = r.read_relative_delta();
        let second = r.read_relative_delta();

        // Assert
        assert_eq!((first.dx, first.dy), (30, -10));
        assert!(second.is_zero(), "second read without movement must be zero");
    }

    #[test]
    fn test_no_delta_when_not_touching() {
        let r = recognizer();
        r.handle(down(100, 100, 0));
        r.read_relative_delta();
        r.handle(mv(200, 200));
        r.handle(up(200, 200, 1000));
        assert!(r.read_relative_delta().is_zero());
    }

    #[test]
    fn test_retouch_elsewhere_does_not_jump() {
        // Arrange – drag, lift, touch down far away
        let r = recognizer();
        r.handle(down(100, 100, 0));
        r.read_relative_delta();
        r.handle(mv(150, 100));
        r.read_relative_delta();
        r.handle(up(150, 100, 2000));
        r.handle(down(800, 800, 3000));

        // Act
        let after_retouch = r.read_relative_delta();

        // Assert
        assert!(after_retouch.is_zero());
    }

    #[test]
    fn test_movement_below_precision_is_ignored() {
        let r = recognizer();
        r.handle(down(100, 100, 0));
        r.read_relative_delta();
        r.handle(mv(104, 96));
        assert!(r.read_relative_delta().is_zero());
    }

    #[test]
    fn test_out_of_bounds_touch_never_updates_position() {
        // Arrange
        let r = recognizer();
        r.handle(down(100, 100, 0));
        r.read_relative_delta();

        // Act
        r.handle(mv(-50, 100));
        r.handle(mv(100, 1001));

        // Assert
        assert!(r.read_relative_delta().is_zero());
    }

    #[test]
    fn test_tap_within_threshold_emits_one_click() {
        let r = recognizer();
        assert_eq!(r.handle(down(300, 300, 1_000)), None);
        let click = r.handle(up(300, 300, 1_500));
        assert_eq!(click, Some(Command::click(MouseButton::Left, PressAction::Full)));
    }

    #[test]
    fn test_slow_tap_emits_nothing() {
        let r = recognizer();
        r.handle(down(300, 300, 1_000));
        assert_eq!(r.handle(up(300, 300, 1_501)), None);
    }

    #[test]
    fn test_tap_disabled_emits_nothing() {
        let r = recognizer();
        r.settings().update("tap_to_click", "false").unwrap();
        r.handle(down(300, 300, 0));
        assert_eq!(r.handle(up(300, 300, 10)), None);
    }

    #[test]
    fn test_drag_is_not_a_tap() {
        let r = recognizer();
        r.handle(down(300, 300, 0));
        assert_eq!(r.handle(up(306, 300, 100)), None);
    }

    #[test]
    fn test_diagonal_tap_uses_total_displacement() {
        let r = recognizer();

        r.handle(down(300, 300, 0));
        let diagonal = r.handle(up(305, 305, 10));
        r.handle(down(300, 300, 20));
        let short_diagonal = r.handle(up(303, 304, 30));

        assert_eq!(diagonal, None);
        assert_eq!(short_diagonal, Some(Command::click(MouseButton::Left, PressAction::Full)));
    }

    #[test]
    fn test_extreme_coordinates_do_not_overflow() {
        // Arrange
        let r = recognizer();
        r.handle(down(100, 100, 0));

        // Act
        r.handle(TouchEvent::Move {
            pos: TouchPosition::new(100, -5),
            secondary: Some(TouchPosition::new(0, i32::MAX)),
            at_ms: 5,
        });
        r.handle(mv(i32::MIN, i32::MAX));
        let click = r.handle(up(i32::MIN, 100, 10));
        r.handle(down(i32::MAX, i32::MIN, 20));
        let far_click = r.handle(up(i32::MIN, i32::MAX, 30));

        // Assert
        assert_eq!(click, None);
        assert_eq!(far_click, None);
        assert!(r.read_relative_delta().is_zero());
    }

    #[test]
    fn test_two_close_fingers_scroll() {
        // Arrange
        let r = recognizer();
        r.handle(down(100, 100, 0));
        r.read_relative_delta();

        // Act
        r.handle(TouchEvent::Move {
            pos: TouchPosition::new(100, 160),
            secondary: Some(TouchPosition::new(300, 250)),
            at_ms: 10,
        });
        let delta = r.read_relative_delta();

        // Assert
        assert_eq!(delta.kind, DeltaKind::Scroll);
        assert_eq!(delta.dy, 60);
    }

    #[test]
    fn test_two_distant_fingers_do_not_scroll() {
        let r = recognizer();
        r.handle(down(100, 100, 0));
        r.handle(TouchEvent::Move {
            pos: TouchPosition::new(100, 100),
            secondary: Some(TouchPosition::new(100, 400)),
            at_ms: 10,
        });
        assert_eq!(r.read_relative_delta().kind, DeltaKind::Move);
    }

    #[test]
    fn test_scroll_is_negated_unless_inverted() {
        let delta = Delta { dx: 0, dy: 10, kind: DeltaKind::Scroll };
        let mut settings = InputSettings {
            scroll_sensitivity: 0.5,
            ..InputSettings::default()
        };

        assert_eq!(delta.to_move_message(&settings).map(|m| m.dy), Some(-5));
        settings.scroll_inverted = true;
        assert_eq!(delta.to_move_message(&settings).map(|m| m.dy), Some(5));
    }

    #[test]
    fn test_scaling_to_zero_reports_nothing() {
        let delta = Delta { dx: 1, dy: 1, kind: DeltaKind::Move };
        let settings = InputSettings {
            move_sensitivity: 0.5,
            ..InputSettings::default()
        };
        assert_eq!(delta.to_move_message(&settings), None);
    }

    #[test]
    fn test_absolute_change_is_reported_once() {
        let r = recognizer();
        r.handle(down(500, 500, 0));
        assert_eq!(r.read_absolute_change(), Some(TouchPosition::new(500, 500)));
        assert_eq!(r.read_absolute_change(), None);
    }

    #[test]
    fn test_scale_absolute_maps_surface_to_screen() {
        let settings = InputSettings {
            surface_width: 1000,
            surface_height: 500,
            ..InputSettings::default()
        };
        let msg = scale_absolute(
            TouchPosition::new(500, 250),
            &settings,
            ScreenSize { width: 1920, height: 1080 },
        );
        assert_eq!((msg.kind, msg.dx, msg.dy), (MoveKind::Absolute, 960, 540));
    }
}

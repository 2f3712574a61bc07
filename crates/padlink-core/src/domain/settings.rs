//! Live input settings.
//!
//! These are the values the settings screen hands to the core: sensitivities,
//! the tap and scroll thresholds, and the touch surface size.  They can be
//! changed while sessions are running via [`SharedSettings::update`]; every
//! reader sees the new value on its next tick.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Valid range for the movement precision threshold.
pub const PRECISION_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Errors produced when applying a setting by name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// No setting with this name exists.
    #[error("unknown setting: {0}")]
    UnknownKey(String),

    /// The value could not be parsed for this setting.
    #[error("invalid value {value:?} for setting {key}")]
    InvalidValue { key: String, value: String },

    /// The value parsed but lies outside the allowed range.
    #[error("value {value} for setting {key} is outside {min}..={max}")]
    OutOfRange {
        key: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Input tuning shared by the gesture recognizer and the send loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSettings {
    /// Multiplier applied to relative pointer deltas.
    #[serde(default = "default_sensitivity")]
    pub move_sensitivity: f32,

    /// Multiplier applied to scroll deltas.
    #[serde(default = "default_sensitivity")]
    pub scroll_sensitivity: f32,

    /// When `false` scroll deltas are negated ("natural" direction).
    #[serde(default)]
    pub scroll_inverted: bool,

    #[serde(default = "default_true")]
    pub tap_to_click: bool,

    /// Minimum per-axis change (pixels) before the tracked position moves.
    #[serde(default = "default_precision_px")]
    pub precision_px: u32,

    #[serde(default = "default_surface_width")]
    pub surface_width: u32,

    #[serde(default = "default_surface_height")]
    pub surface_height: u32,

    #[serde(default = "default_tap_max_distance_px")]
    pub tap_max_distance_px: u32,

    #[serde(default = "default_tap_max_duration_ms")]
    pub tap_max_duration_ms: u64,

    /// Largest vertical gap between two fingers that still counts as scrolling.
    #[serde(default = "default_scroll_max_finger_gap_px")]
    pub scroll_max_finger_gap_px: u32,

    /// Deprecated: report absolute positions instead of relative deltas.
    #[serde(default)]
    pub absolute_movement: bool,
}

fn default_sensitivity() -> f32 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_precision_px() -> u32 {
    5
}
fn default_surface_width() -> u32 {
    1080
}
fn default_surface_height() -> u32 {
    1920
}
fn default_tap_max_distance_px() -> u32 {
    5
}
fn default_tap_max_duration_ms() -> u64 {
    500
}
fn default_scroll_max_finger_gap_px() -> u32 {
    200
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            move_sensitivity: default_sensitivity(),
            scroll_sensitivity: default_sensitivity(),
            scroll_inverted: false,
            tap_to_click: true,
            precision_px: default_precision_px(),
            surface_width: default_surface_width(),
            surface_height: default_surface_height(),
            tap_max_distance_px: default_tap_max_distance_px(),
            tap_max_duration_ms: default_tap_max_duration_ms(),
            scroll_max_finger_gap_px: default_scroll_max_finger_gap_px(),
            absolute_movement: false,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl InputSettings {
    /// Sets one field by its configuration name.
    ///
    /// The value is parsed and validated before anything is changed, so a
    /// failed call leaves the settings untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] for an unknown key, an unparsable value or a
    /// precision outside [`PRECISION_RANGE`].
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        match key {
            "move_sensitivity" => self.move_sensitivity = parse_sensitivity(key, value)?,
            "scroll_sensitivity" => self.scroll_sensitivity = parse_sensitivity(key, value)?,
            "scroll_inverted" => self.scroll_inverted = parse(key, value)?,
            "tap_to_click" => self.tap_to_click = parse(key, value)?,
            "precision_px" => {
                let precision: u32 = parse(key, value)?;
                check_precision(precision)?;
                self.precision_px = precision;
            }
            "surface_width" => self.surface_width = parse(key, value)?,
            "surface_height" => self.surface_height = parse(key, value)?,
            "tap_max_distance_px" => self.tap_max_distance_px = parse(key, value)?,
            "tap_max_duration_ms" => self.tap_max_duration_ms = parse(key, value)?,
            "scroll_max_finger_gap_px" => self.scroll_max_finger_gap_px = parse(key, value)?,
            "absolute_movement" => self.absolute_movement = parse(key, value)?,
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Checks values that deserialization alone cannot constrain.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::OutOfRange`] for a precision outside
    /// [`PRECISION_RANGE`].
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_precision(self.precision_px)
    }
}

fn parse_sensitivity(key: &str, value: &str) -> Result<f32, SettingsError> {
    let v: f32 = parse(key, value)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn check_precision(precision: u32) -> Result<(), SettingsError> {
    if PRECISION_RANGE.contains(&precision) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            key: "precision_px".to_string(),
            value: precision.to_string(),
            min: PRECISION_RANGE.start().to_string(),
            max: PRECISION_RANGE.end().to_string(),
        })
    }
}

/// Settings shared between the input thread, every send loop and the
/// caller that reconfigures them.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<InputSettings>>,
}

impl SharedSettings {
    pub fn new(settings: InputSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// A copy of the current values.
    pub fn snapshot(&self) -> InputSettings {
        self.inner.read().clone()
    }

    /// Applies one named setting for all readers.
    ///
    /// # Errors
    ///
    /// See [`InputSettings::apply`].
    pub fn update(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.inner.write().apply(key, value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

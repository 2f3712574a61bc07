//! Line-oriented input, one event per line.
//!
//! Used by the binary to drive the server from a console or a pipe:
//!
//! ```text
//! down 100 200 0          touch down at (100, 200), t = 0 ms
//! move 110 205 40         primary finger moved
//! move 110 205 300 205 80 two fingers (scroll)
//! up 110 205 90
//! click left [D|U|F]      default F
//! key bspace [D|U|F]
//! type hello world
//! set move_sensitivity 1.5
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use padlink_core::protocol::{Key, MouseButton, PressAction};
use padlink_core::{Command, TouchEvent, TouchPosition};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{InputError, InputEvent, InputSource};

type Reader = Box<dyn BufRead + Send>;

/// Reads [`InputEvent`]s from any buffered reader on a background thread.
pub struct LineInputSource {
    reader: Mutex<Option<Reader>>,
    stopped: Arc<AtomicBool>,
}

impl LineInputSource {
    pub fn new(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reads from the process's standard input.
    pub fn stdin() -> Self {
        Self::new(io::BufReader::new(io::stdin()))
    }
}

impl InputSource for LineInputSource {
    fn start(&self) -> Result<mpsc::Receiver<InputEvent>, InputError> {
        let reader = self.reader.lock().take().ok_or(InputError::AlreadyStarted)?;
        let stopped = Arc::clone(&self.stopped);
        let (tx, rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("padlink-input".to_string())
            .spawn(move || {
                for (index, line) in reader.lines().enumerate() {
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("input read failed: {e}");
                            break;
                        }
                    };
                    match parse_line(&line, index + 1) {
                        Ok(Some(event)) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("{e}"),
                    }
                }
                debug!("input thread exited");
            })
            .map_err(InputError::Spawn)?;

        Ok(rx)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Parses one console line.  `Ok(None)` means the line is blank or a comment.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<InputEvent>, InputError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let err = |reason: String| InputError::Parse {
        line: line_no,
        reason,
    };

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let event = match verb {
        "type" => {
            if rest.is_empty() {
                return Err(err("nothing to type".into()));
            }
            InputEvent::Text(rest.to_string())
        }
        "set" => {
            let (key, value) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| err("expected `set <key> <value>`".into()))?;
            InputEvent::Setting {
                key: key.to_string(),
                value: value.trim().to_string(),
            }
        }
        "click" | "key" => {
            let mut args = rest.split_whitespace();
            let target = args.next().ok_or_else(|| err(format!("{verb} needs a target")))?;
            let action = match args.next() {
                None => PressAction::Full,
                Some(code) => PressAction::from_code(code)
                    .ok_or_else(|| err(format!("unknown press action {code:?}")))?,
            };
            let command = if verb == "click" {
                let button = MouseButton::from_name(target)
                    .ok_or_else(|| err(format!("unknown button {target:?}")))?;
                Command::click(button, action)
            } else {
                let key =
                    Key::from_name(target).ok_or_else(|| err(format!("unknown key {target:?}")))?;
                Command::key(key, action)
            };
            InputEvent::Command(command)
        }
        "down" | "move" | "up" => {
            let nums = rest
                .split_whitespace()
                .map(str::parse::<i64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| err(format!("bad number: {e}")))?;
            InputEvent::Touch(touch_event(verb, &nums).ok_or_else(|| {
                err(format!("wrong number of arguments for {verb}: {}", nums.len()))
            })?)
        }
        other => return Err(err(format!("unknown command {other:?}"))),
    };
    Ok(Some(event))
}

fn touch_event(verb: &str, nums: &[i64]) -> Option<TouchEvent> {
    let pos = |x: i64, y: i64| -> Option<TouchPosition> {
        Some(TouchPosition::new(i32::try_from(x).ok()?, i32::try_from(y).ok()?))
    };
    let at = |t: i64| u64::try_from(t).ok();

    match (verb, nums) {
        ("down", &[x, y, t]) => Some(TouchEvent::Down {
            pos: pos(x, y)?,
            at_ms: at(t)?,
        }),
        ("up", &[x, y, t]) => Some(TouchEvent::Up {
            pos: pos(x, y)?,
            at_ms: at(t)?,
        }),
        ("move", &[x, y, t]) => Some(TouchEvent::Move {
            pos: pos(x, y)?,
            secondary: None,
            at_ms: at(t)?,
        }),
        ("move", &[x, y, x2, y2, t]) => Some(TouchEvent::Move {
            pos: pos(x, y)?,
            secondary: Some(pos(x2, y2)?),
            at_ms: at(t)?,
        }),
        _ => None,
    }
}

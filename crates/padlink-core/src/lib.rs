//! # padlink-core
//!
//! Shared library for padlink containing the crypto engine, the packet codec,
//! and the gesture recognizer that turns raw touch events into pointer motion.
//!
//! It has zero dependencies on sockets, threads, or UI frameworks; the
//! `padlink-server` crate supplies all of those.
//!
//! # Architecture overview (for beginners)
//!
//! padlink turns a handheld touch device into a remote touchpad.  The device
//! runs the *server*; desktop *listeners* connect to it over the LAN and
//! receive cursor motion, clicks, key presses and short typed text.
//!
//! - **`crypto`** – Password-derived AES-128 keys, CBC encryption, and the
//!   extended PKCS#5 padding every encrypted payload uses on the wire.
//!
//! - **`protocol`** – How bytes travel over the network: the secure packet
//!   envelope (`IV ‖ Encrypt(Seq ‖ Body)`), the plaintext line format used
//!   when no password is set, the binary move message and the command
//!   vocabulary.
//!
//! - **`domain`** – The gesture recognizer (touch stream → relative deltas,
//!   tap clicks, two-finger scroll) and the live input settings it reads.

pub mod crypto;
pub mod domain;
pub mod protocol;

pub use crypto::{CryptoError, SessionKey};
pub use domain::gesture::{Delta, DeltaKind, GestureRecognizer, TouchEvent, TouchPosition};
pub use domain::settings::{InputSettings, SettingsError, SharedSettings};
pub use protocol::codec::ProtocolError;
pub use protocol::messages::{Body, Command, ControlMessage, MoveKind, MoveMessage};

//! Application layer: the session state machine and its collaborators.
//!
//! # What is the "application" layer? (for beginners)
//!
//! It sits between the pure protocol and gesture code in `padlink-core` and
//! the sockets in `infrastructure`.  Nothing here opens a socket or reads a
//! file; outbound I/O goes through the [`send_loop::PacketSink`] trait so
//! tests can substitute a mock.
//!
//! # Sub-modules
//!
//! - **`manage_sessions`** – The per-peer protocol state machine
//!   (OPEN / HEARTBEAT / CLOSE, replay protection, eviction) and the update
//!   builder every transport calls once per tick or query.
//! - **`session`** – State owned by one connected listener.
//! - **`command_queue`** – FIFO of pending clicks, key presses and text.
//! - **`send_loop`** – The fixed-tick thread that pushes updates to one
//!   listener.
//! - **`events`** – Status events for the display layer.

pub mod command_queue;
pub mod events;
pub mod manage_sessions;
pub mod send_loop;
pub mod session;

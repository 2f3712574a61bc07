//! # padlink-server
//!
//! The pointer server: a session manager shared by two transport bindings.
//!
//! - **`application`** – Session state machine, command queues, send loops
//!   and status events.  No sockets.
//! - **`infrastructure`** – The datagram (push) and named-query (pull)
//!   transports, input sources, TOML configuration and the
//!   [`PointerServer`](infrastructure::server::PointerServer) facade.

pub mod application;
pub mod infrastructure;

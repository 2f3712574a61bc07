//! Infrastructure layer for the pointer server.
//!
//! Contains OS-facing adapters: the datagram and named-query transports,
//! input sources, configuration storage, and the [`server::PointerServer`]
//! facade that wires them to the session manager.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `padlink_core`, but MUST NOT be imported by the `application` layer.

pub mod input_source;
pub mod network;
pub mod server;
pub mod storage;

//! Domain layer: gesture recognition and the live input settings it reads.

pub mod gesture;
pub mod settings;

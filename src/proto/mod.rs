//! The driver-facing protocol layer.
//!
//! This module provides:
//! - `wire`: the percent-escaped line codec
//! - `engine`: the command interpreter and event-coordination loop

pub mod engine;
pub mod wire;

pub use engine::{DebugCallback, Engine, EngineError};
pub use wire::ProtocolError;

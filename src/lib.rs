//! ttsbridge - speech request bridge for asynchronous TTS engines
//!
//! Accepts speech requests over a method channel, waits for the platform
//! engine to finish initializing, issues utterances with flush/append
//! queueing and relays the engine's progress callbacks back to the caller.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod language;

pub use bridge::TtsBridge;
pub use error::{BridgeError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

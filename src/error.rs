//! Error types for ttsbridge

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for ttsbridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Speech engine failed to initialize: {0}")]
    EngineInit(String),

    #[error("Speech engine not ready after {0:?}")]
    InitTimeout(Duration),

    #[error("Engine readiness was already signaled")]
    AlreadySettled,

    #[error("Speech engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("INI parse error: {0}")]
    IniParse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// True for errors that mean the engine never became usable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BridgeError::EngineInit(_) | BridgeError::InitTimeout(_))
    }
}

/// Result type alias for ttsbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Other(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Channel(format!("JSON error: {}", e))
    }
}

//! Core library for the cilow robot's network provisioning and control channel.
//! This crate owns the Wi-Fi connection state machine, the captive-portal DNS
//! hijack, the WebSocket control channel and the speaker audio stream, and
//! defines the traits (radio, audio sink, page store) its collaborators implement.

pub mod audio;
pub mod backends;
pub mod config;
pub mod control;
pub mod dns;
pub mod frontends;
pub mod lifecycle;
pub mod notifier;
pub mod traits;
pub mod wifi;

// Define a shared Error and Result type for the entire crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Radio error: {0}")]
    Radio(String),

    #[error("A scan is already in progress")]
    ScanBusy,

    #[error("Scan task ended without a result")]
    ScanAborted,

    #[error("Invalid WAV header: {0}")]
    Header(#[from] audio::HeaderError),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Web server error: {0}")]
    WebServer(#[from] axum::BoxError),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

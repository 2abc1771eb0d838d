//! Error types for navstat.
//!
//! Decoder-level errors (`FrameError`, `NmeaError`, `AisError`) live next to
//! their decoders and never travel past them; `NavError` covers everything
//! that can fail outside the decode path.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NavError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Config: {0}")]
    Config(String),

    #[error("Route: {0}")]
    Route(String),
}

pub type Result<T> = std::result::Result<T, NavError>;

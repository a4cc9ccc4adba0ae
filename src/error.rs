//! Error handling module
//!
//! Defines custom error types for the Rustscape game core.

use std::io;

use thiserror::Error;

/// Main error type for the Rustscape game core
#[derive(Error, Debug)]
pub enum RustscapeError {
    /// Game logic errors
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// Game service (tick clock, worker pool) errors
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Game logic errors
#[derive(Error, Debug)]
pub enum GameError {
    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Already logged in: {0}")]
    AlreadyLoggedIn(String),

    #[error("World full")]
    WorldFull,
}

/// Tick clock and worker pool errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Worker pool is shut down")]
    PoolShutdown,

    #[error("Invalid service state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Tick thread error: {0}")]
    TickThread(String),

    #[error("Panicked: {0}")]
    Panicked(String),
}

impl ServiceError {
    /// Build a `Panicked` error from a `catch_unwind` payload
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ServiceError::Panicked(message)
    }
}

/// Result type alias for Rustscape operations
pub type Result<T> = std::result::Result<T, RustscapeError>;

//! Rustscape Game Core Library
//!
//! This library provides the execution core of the Rustscape game server:
//! the fixed-rate game tick, task and action scheduling, the cross-thread
//! sync queue, the worker pool and graceful shutdown.
//!
//! ## Modules
//!
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `game` - Game world, players, tasks and actions (game thread only)
//! - `service` - Tick clock, sync queue, worker pool and lifecycle

pub mod config;
pub mod error;
pub mod game;
pub mod service;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{Result, RustscapeError};
pub use game::world::World;
pub use service::{GameService, ServiceSettings, ServiceState};

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

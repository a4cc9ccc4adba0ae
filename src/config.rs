//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name displayed to players
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// World ID (1-255)
    #[serde(default = "default_world_id")]
    pub world_id: u8,

    /// Maximum number of players
    #[serde(default = "default_max_players")]
    pub max_players: u32,

    /// Game tick rate in milliseconds
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u64,

    /// Extra ticks added to a system update countdown before the clock stops
    #[serde(default = "default_system_update_grace")]
    pub system_update_grace_ticks: u32,

    /// Autosave interval in seconds (0 to disable)
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,

    /// Ticks without activity before a player is logged out (0 to disable)
    #[serde(default)]
    pub idle_logout_ticks: u64,

    /// Path to data files (saved players, etc.)
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Name of the dedicated game (tick) thread
    #[serde(default = "default_game_thread_name")]
    pub game_thread_name: String,

    /// Worker pool configuration
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Thread name for worker pool threads
    #[serde(default = "default_worker_thread_name")]
    pub thread_name: String,

    /// Upper bound on elastic (blocking) worker threads
    #[serde(default = "default_worker_max_threads")]
    pub max_threads: usize,

    /// Core threads driving async worker jobs
    #[serde(default = "default_worker_core_threads")]
    pub core_threads: usize,
}

// Default value functions
fn default_server_name() -> String {
    "Rustscape".to_string()
}

fn default_world_id() -> u8 {
    1
}

fn default_max_players() -> u32 {
    2000
}

fn default_tick_rate() -> u64 {
    600 // 600ms = standard RS tick rate
}

fn default_system_update_grace() -> u32 {
    5
}

fn default_autosave_interval() -> u64 {
    300 // 5 minutes = 300 seconds
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_game_thread_name() -> String {
    "rustscape-game".to_string()
}

fn default_worker_thread_name() -> String {
    "rustscape-worker".to_string()
}

fn default_worker_max_threads() -> usize {
    512
}

fn default_worker_core_threads() -> usize {
    2
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name: default_worker_thread_name(),
            max_threads: default_worker_max_threads(),
            core_threads: default_worker_core_threads(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            world_id: default_world_id(),
            max_players: default_max_players(),
            tick_rate_ms: default_tick_rate(),
            system_update_grace_ticks: default_system_update_grace(),
            autosave_interval_secs: default_autosave_interval(),
            idle_logout_ticks: 0,
            data_path: default_data_path(),
            game_thread_name: default_game_thread_name(),
            worker: WorkerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("RUSTSCAPE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RUSTSCAPE_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("RUSTSCAPE_WORLD_ID") {
            if let Ok(id) = val.parse() {
                self.world_id = id;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_MAX_PLAYERS") {
            if let Ok(max) = val.parse() {
                self.max_players = max;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_TICK_RATE_MS") {
            if let Ok(rate) = val.parse() {
                self.tick_rate_ms = rate;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_AUTOSAVE_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                self.autosave_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_DATA_PATH") {
            self.data_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("RUSTSCAPE_WORKER_MAX_THREADS") {
            if let Ok(max) = val.parse() {
                self.worker.max_threads = max;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.world_id == 0 {
            anyhow::bail!("World ID must be between 1 and 255");
        }

        if self.max_players == 0 || self.max_players > 2047 {
            anyhow::bail!("Max players must be between 1 and 2047");
        }

        if self.tick_rate_ms < 100 || self.tick_rate_ms > 5000 {
            anyhow::bail!("Tick rate must be between 100ms and 5000ms");
        }

        if self.worker.max_threads == 0 || self.worker.core_threads == 0 {
            anyhow::bail!("Worker pool needs at least one thread");
        }

        if self.game_thread_name.is_empty() || self.worker.thread_name.is_empty() {
            anyhow::bail!("Thread names must not be empty");
        }

        Ok(())
    }

    /// Tick period as a duration
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms)
    }

    /// Autosave interval converted to ticks (0 when disabled)
    pub fn autosave_interval_ticks(&self) -> u64 {
        if self.autosave_interval_secs == 0 {
            return 0;
        }
        (self.autosave_interval_secs * 1000 / self.tick_rate_ms.max(1)).max(1)
    }

    /// Directory saved players are written to
    pub fn players_path(&self) -> PathBuf {
        self.data_path.join("players")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, "Rustscape");
        assert_eq!(config.world_id, 1);
        assert_eq!(config.tick_rate_ms, 600);
        assert_eq!(config.system_update_grace_ticks, 5);
        assert_eq!(config.autosave_interval_secs, 300);
        assert_eq!(config.worker.thread_name, "rustscape-worker");
    }

    #[test]
    fn test_autosave_ticks() {
        let mut config = ServerConfig::default();
        assert_eq!(config.autosave_interval_ticks(), 500);

        config.autosave_interval_secs = 0;
        assert_eq!(config.autosave_interval_ticks(), 0);
    }

    #[test]
    fn test_from_toml() {
        let config = ServerConfig::from_toml(
            r#"
            server_name = "Test"
            tick_rate_ms = 300

            [worker]
            thread_name = "bg"
            "#,
        )
        .unwrap();

        assert_eq!(config.server_name, "Test");
        assert_eq!(config.tick_rate(), Duration::from_millis(300));
        assert_eq!(config.worker.thread_name, "bg");
        assert_eq!(config.worker.max_threads, 512);
        assert_eq!(config.system_update_grace_ticks, 5);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.world_id = 0;
        assert!(config.validate().is_err());
        config.world_id = 1;

        config.tick_rate_ms = 50;
        assert!(config.validate().is_err());
        config.tick_rate_ms = 600;

        config.worker.max_threads = 0;
        assert!(config.validate().is_err());
    }
}

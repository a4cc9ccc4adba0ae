//! Player persistence module
//!
//! The game core only captures [`PlayerSnapshot`]s on the game thread and
//! hands them to a [`PlayerSaver`]. Savers are `Send + Sync` so autosaves can
//! run on the worker pool; logout and shutdown saves block the caller.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::game::player::{Location, PlayerRights};

/// Persistent state of a player at a given tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Player index at the time of the snapshot
    pub index: u16,
    /// Username
    pub username: String,
    /// Display name
    pub display_name: String,
    /// Privilege level
    pub rights: PlayerRights,
    /// Position
    pub location: Location,
    /// World tick the snapshot was taken at
    pub tick: u64,
    /// Wall-clock time the snapshot was taken at
    pub saved_at: DateTime<Utc>,
}

/// Storage backend for player snapshots
pub trait PlayerSaver: Send + Sync {
    /// Persist one snapshot, blocking until it is durable
    fn save(&self, snapshot: &PlayerSnapshot) -> Result<()>;
}

/// Saver that discards snapshots
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSaver;

impl PlayerSaver for NullSaver {
    fn save(&self, snapshot: &PlayerSnapshot) -> Result<()> {
        debug!(username = %snapshot.username, "Persistence disabled, snapshot discarded");
        Ok(())
    }
}

/// Saver writing one pretty-printed JSON file per player
#[derive(Debug, Clone)]
pub struct JsonPlayerSaver {
    directory: PathBuf,
}

impl JsonPlayerSaver {
    /// Create a saver writing into `directory`, creating it if needed
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    /// Directory snapshots are written to
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File a player's snapshot is stored in
    pub fn path_for(&self, username: &str) -> PathBuf {
        self.directory
            .join(format!("{}.json", username.to_lowercase()))
    }

    /// Read a stored snapshot back
    pub fn load(&self, username: &str) -> Result<Option<PlayerSnapshot>> {
        let path = self.path_for(username);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl PlayerSaver for JsonPlayerSaver {
    fn save(&self, snapshot: &PlayerSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.username);
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &path)?;

        debug!(
            username = %snapshot.username,
            path = %path.display(),
            "Player saved"
        );
        Ok(())
    }
}

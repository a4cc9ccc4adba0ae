//! World module
//!
//! Owns all game state advanced by the tick:
//! - The active task set (tasks and actions)
//! - The player registry and per-tick player upkeep
//! - Login, logout and the shutdown-time disconnect of every player
//!
//! The world is confined to the game thread; other threads reach it only
//! through [`GameService::sync`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{GameError, Result};
use crate::game::autosave::AutosaveTask;
use crate::game::entity::{Entity, EntityState};
use crate::game::persistence::{NullSaver, PlayerSaver, PlayerSnapshot};
use crate::game::player::{OutgoingMessage, PlayerList, PlayerRef, MAX_PLAYER_INDEX};
use crate::game::task::{Task, TaskHandle, TaskManager, TaskScheduler};
use crate::service::GameService;

/// World settings
#[derive(Debug, Clone)]
pub struct WorldSettings {
    /// World ID (1-255)
    pub world_id: u8,
    /// World name
    pub name: String,
    /// Maximum players allowed
    pub max_players: u16,
    /// Autosave interval in ticks (0 to disable)
    pub autosave_interval: u64,
    /// Ticks without activity before logout (0 to disable)
    pub idle_logout_ticks: u64,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            world_id: 1,
            name: "Rustscape".to_string(),
            max_players: MAX_PLAYER_INDEX,
            autosave_interval: 0,
            idle_logout_ticks: 0,
        }
    }
}

impl WorldSettings {
    /// Create world settings from server config
    pub fn from_config(config: &ServerConfig) -> Self {
        let autosave_interval = config.autosave_interval_ticks();

        info!(
            autosave_interval_secs = config.autosave_interval_secs,
            autosave_ticks = autosave_interval,
            "Configuring world autosave"
        );

        Self {
            world_id: config.world_id,
            name: config.server_name.clone(),
            max_players: config.max_players.min(MAX_PLAYER_INDEX as u32) as u16,
            autosave_interval,
            idle_logout_ticks: config.idle_logout_ticks,
        }
    }
}

/// Game world - everything the tick mutates
pub struct World {
    /// World settings
    pub settings: WorldSettings,
    tick: u64,
    players: PlayerList,
    tasks: TaskManager,
    service: GameService,
    saver: Arc<dyn PlayerSaver>,
    /// Logout saves that failed on the worker pool
    failed_saves: Arc<AtomicUsize>,
}

impl World {
    /// Create a world with default settings and no persistence
    pub fn new(service: GameService) -> Self {
        Self::with_settings(service, WorldSettings::default(), Arc::new(NullSaver))
    }

    /// Create a world with custom settings and persistence backend
    pub fn with_settings(
        service: GameService,
        settings: WorldSettings,
        saver: Arc<dyn PlayerSaver>,
    ) -> Self {
        info!(
            world_id = settings.world_id,
            name = %settings.name,
            "Creating game world"
        );

        let mut world = Self {
            players: PlayerList::new(settings.max_players),
            settings,
            tick: 0,
            tasks: TaskManager::new(),
            service,
            saver,
            failed_saves: Arc::new(AtomicUsize::new(0)),
        };

        if world.settings.autosave_interval > 0 {
            let task = AutosaveTask::new(world.settings.autosave_interval, world.saver.clone());
            world.schedule(task);
        }

        world
    }

    /// Get the current tick number
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Registered players
    pub fn players(&self) -> &PlayerList {
        &self.players
    }

    /// Registered players, mutably
    pub fn players_mut(&mut self) -> &mut PlayerList {
        &mut self.players
    }

    /// Active task set
    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// The game service this world is driven by
    pub fn service(&self) -> &GameService {
        &self.service
    }

    /// Persistence backend
    pub fn saver(&self) -> &Arc<dyn PlayerSaver> {
        &self.saver
    }

    /// Logout saves that have failed so far
    pub fn failed_saves(&self) -> usize {
        self.failed_saves.load(Ordering::SeqCst)
    }

    /// Register a task
    pub fn schedule<T: Task>(&mut self, task: T) -> TaskHandle {
        self.schedule_boxed(Box::new(task))
    }

    /// Advance the world by one tick: run due tasks, then player upkeep
    pub fn advance(&mut self) {
        self.tick += 1;

        if self.tick % 1000 == 0 {
            debug!(
                tick = self.tick,
                players = self.players.len(),
                tasks = self.tasks.len(),
                "Game tick milestone"
            );
        }

        self.tasks
            .process(self.tick, &mut self.players, &self.service);
        self.process_players();
    }

    /// Log out inactive and idle players
    fn process_players(&mut self) {
        let idle_limit = self.settings.idle_logout_ticks;
        let tick = self.tick;

        let expired: Vec<u16> = self
            .players
            .iter()
            .filter(|player| {
                player.state() == EntityState::Inactive
                    || (idle_limit > 0 && tick.saturating_sub(player.last_activity()) >= idle_limit)
            })
            .map(|player| player.index)
            .collect();

        for index in expired {
            debug!(index = index, tick = tick, "Logging out inactive player");
            if let Err(e) = self.logout(index) {
                warn!(index = index, error = %e, "Logout during player upkeep failed");
            }
        }
    }

    /// Register a player and make it active
    pub fn login(
        &mut self,
        username: impl Into<String>,
        outbound: Option<mpsc::UnboundedSender<OutgoingMessage>>,
    ) -> Result<PlayerRef> {
        let player = self.players.register(username.into(), outbound)?;
        player.touch(self.tick);
        player.set_state(EntityState::Active);
        Ok(player)
    }

    /// Deactivate and remove a player, then persist it on the worker pool
    ///
    /// The save runs off the game thread; failures are logged and counted in
    /// [`World::failed_saves`].
    pub fn logout(&mut self, index: u16) -> Result<()> {
        let player = self
            .players
            .remove(index)
            .ok_or_else(|| GameError::PlayerNotFound(index.to_string()))?;

        player.set_state(EntityState::Inactive);
        player.actions().interrupt();
        player.queue(OutgoingMessage::Logout);

        self.persist(player.snapshot(self.tick));
        Ok(())
    }

    fn persist(&self, snapshot: PlayerSnapshot) {
        let username = snapshot.username.clone();
        let saver = self.saver.clone();
        let failures = self.failed_saves.clone();

        let save = move || {
            if let Err(e) = saver.save(&snapshot) {
                failures.fetch_add(1, Ordering::SeqCst);
                error!(username = %snapshot.username, error = %e, "Failed to save player on logout");
            }
        };

        // Only reachable once shutdown has drained the pool
        if self.service.workers().is_shutdown() {
            warn!(username = %username, "Worker pool is shut down, saving on the game thread");
            save();
            return;
        }

        if let Err(e) = self.service.submit(save) {
            self.failed_saves.fetch_add(1, Ordering::SeqCst);
            error!(username = %username, error = %e, "Failed to submit logout save");
        }
    }

    /// Log out every player; returns how many were disconnected
    pub fn disconnect_all(&mut self) -> usize {
        let indices = self.players.indices();
        for &index in &indices {
            if let Err(e) = self.logout(index) {
                warn!(index = index, error = %e, "Disconnect failed");
            }
        }

        info!(disconnected = indices.len(), "All players disconnected");
        indices.len()
    }

    /// Queue a message to every player
    pub fn broadcast(&self, message: OutgoingMessage) {
        debug!(message = ?message, players = self.players.len(), "Broadcasting to all players");
        for player in self.players.iter() {
            player.queue(message.clone());
        }
    }

    /// Get world info as a string
    pub fn info(&self) -> String {
        format!(
            "World {} ({}) - {} players - {} tasks - Tick {}",
            self.settings.world_id,
            self.settings.name,
            self.players.len(),
            self.tasks.len(),
            self.tick
        )
    }
}

impl TaskScheduler for World {
    fn schedule_boxed(&mut self, task: Box<dyn Task>) -> TaskHandle {
        self.tasks
            .context(self.tick, &mut self.players, &self.service)
            .schedule_boxed(task)
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("settings", &self.settings)
            .field("tick", &self.tick)
            .field("players", &self.players)
            .field("tasks", &self.tasks)
            .finish()
    }
}

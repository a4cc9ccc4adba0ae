//! Player module
//!
//! Manages player entities and their state including:
//! - Player lifecycle state (NEW -> ACTIVE -> INACTIVE)
//! - Player position and privileges
//! - The single action slot of each player
//! - Outgoing message queue towards the player's session
//!
//! Players live on the game thread only and are shared as `Rc<Player>`.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{GameError, Result, RustscapeError};
use crate::game::action::{Action, ActionHandle, ActionSet};
use crate::game::entity::{Entity, EntityState};
use crate::game::persistence::PlayerSnapshot;
use crate::game::task::TaskScheduler;

/// Maximum player index value
pub const MAX_PLAYER_INDEX: u16 = 2047;

/// Shared handle to a player on the game thread
pub type PlayerRef = Rc<Player>;

/// Player rights/privilege levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlayerRights {
    /// Normal player
    #[default]
    Normal = 0,
    /// Player moderator
    Moderator = 1,
    /// Administrator
    Administrator = 2,
}

/// Player location in the game world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// X coordinate
    pub x: u16,
    /// Y coordinate
    pub y: u16,
    /// Z (height) level (0-3)
    pub z: u8,
}

impl Location {
    /// Lumbridge spawn point
    pub const HOME: Location = Location::new(3222, 3222, 0);

    /// Create a new location
    pub const fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }

    /// The adjacent tile one step closer to `target` (diagonal steps allowed)
    pub fn step_towards(&self, target: &Location) -> Location {
        let step = |from: u16, to: u16| match from.cmp(&to) {
            std::cmp::Ordering::Less => from + 1,
            std::cmp::Ordering::Greater => from - 1,
            std::cmp::Ordering::Equal => from,
        };
        Location::new(step(self.x, target.x), step(self.y, target.y), self.z)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Messages queued from the game thread to a player's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// System update countdown, in ticks
    SystemUpdate { ticks: u32 },
    /// Server-side logout
    Logout,
    /// Game chat box message
    Text(String),
}

/// A player entity in the game
pub struct Player {
    /// Player index (1-2047)
    pub index: u16,
    /// Username
    pub username: String,
    /// Display name (can differ from username)
    pub display_name: String,
    rights: Cell<PlayerRights>,
    location: Cell<Location>,
    state: Cell<EntityState>,
    actions: ActionSet,
    /// Tick of the last client activity
    last_activity: Cell<u64>,
    /// Tick of the last successful save
    last_saved: Cell<Option<u64>>,
    /// Channel to the session writer, if connected
    outbound: Option<mpsc::UnboundedSender<OutgoingMessage>>,
}

impl Player {
    /// Create a new player
    pub fn new(index: u16, username: String) -> Self {
        let display_name = username.replace('_', " ");

        Self {
            index,
            username,
            display_name,
            rights: Cell::new(PlayerRights::Normal),
            location: Cell::new(Location::HOME),
            state: Cell::new(EntityState::New),
            actions: ActionSet::new(),
            last_activity: Cell::new(0),
            last_saved: Cell::new(None),
            outbound: None,
        }
    }

    /// Attach the channel to the player's session
    pub fn with_outbound(mut self, outbound: mpsc::UnboundedSender<OutgoingMessage>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Queue a message for the player's session
    pub fn queue(&self, message: OutgoingMessage) {
        if let Some(tx) = &self.outbound {
            if tx.send(message).is_err() {
                debug!(username = %self.username, "Outbound channel closed, message dropped");
            }
        }
    }

    /// Set the lifecycle state
    pub fn set_state(&self, state: EntityState) {
        let old = self.state.replace(state);
        if old != state {
            debug!(
                username = %self.username,
                old_state = %old,
                new_state = %state,
                "Player state changed"
            );
        }
    }

    /// Get the player's rights
    pub fn rights(&self) -> PlayerRights {
        self.rights.get()
    }

    /// Set the player's rights
    pub fn set_rights(&self, rights: PlayerRights) {
        self.rights.set(rights);
    }

    /// Get the player's location
    pub fn location(&self) -> Location {
        self.location.get()
    }

    /// Set the player's location
    pub fn set_location(&self, location: Location) {
        self.location.set(location);
    }

    /// The player's action slot
    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    /// Interrupt the current action and start `action`
    pub fn submit_action<A, S>(self: &Rc<Self>, scheduler: &mut S, action: A) -> ActionHandle<Player>
    where
        A: Action<Player>,
        S: TaskScheduler + ?Sized,
    {
        self.actions.submit(scheduler, self.clone(), action)
    }

    /// Record client activity at `tick`
    pub fn touch(&self, tick: u64) {
        self.last_activity.set(tick);
    }

    /// Tick of the last client activity
    pub fn last_activity(&self) -> u64 {
        self.last_activity.get()
    }

    /// Record a completed save
    pub fn mark_saved(&self, tick: u64) {
        self.last_saved.set(Some(tick));
    }

    /// Tick of the last completed save
    pub fn last_saved(&self) -> Option<u64> {
        self.last_saved.get()
    }

    /// Capture the persistent state of the player
    pub fn snapshot(&self, tick: u64) -> PlayerSnapshot {
        PlayerSnapshot {
            index: self.index,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            rights: self.rights(),
            location: self.location(),
            tick,
            saved_at: chrono::Utc::now(),
        }
    }
}

impl Entity for Player {
    fn state(&self) -> EntityState {
        self.state.get()
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("index", &self.index)
            .field("username", &self.username)
            .field("state", &self.state())
            .field("location", &self.location())
            .field("rights", &self.rights())
            .finish()
    }
}

/// Player registry - index allocation and lookup
pub struct PlayerList {
    /// Map of player index to player, iterated in index order
    players: BTreeMap<u16, PlayerRef>,
    /// Map of lowercase username to player index
    username_to_index: HashMap<String, u16>,
    /// Maximum player count
    max_players: u16,
}

impl PlayerList {
    /// Create a new player list
    pub fn new(max_players: u16) -> Self {
        Self {
            players: BTreeMap::new(),
            username_to_index: HashMap::new(),
            max_players: max_players.clamp(1, MAX_PLAYER_INDEX),
        }
    }

    /// Register a new player at the lowest free index
    pub fn register(
        &mut self,
        username: String,
        outbound: Option<mpsc::UnboundedSender<OutgoingMessage>>,
    ) -> Result<PlayerRef> {
        let key = username.to_lowercase();
        if self.username_to_index.contains_key(&key) {
            return Err(RustscapeError::Game(GameError::AlreadyLoggedIn(username)));
        }

        let index = self.allocate_index()?;

        let mut player = Player::new(index, username);
        if let Some(tx) = outbound {
            player = player.with_outbound(tx);
        }
        let player = Rc::new(player);

        self.players.insert(index, player.clone());
        self.username_to_index.insert(key, index);

        info!(index = index, username = %player.username, "Player registered");

        Ok(player)
    }

    /// Remove a player from the registry
    pub fn remove(&mut self, index: u16) -> Option<PlayerRef> {
        let player = self.players.remove(&index)?;
        self.username_to_index.remove(&player.username.to_lowercase());

        info!(index = index, username = %player.username, "Player unregistered");

        Some(player)
    }

    /// Get a player by index
    pub fn get(&self, index: u16) -> Option<&PlayerRef> {
        self.players.get(&index)
    }

    /// Get a player by username
    pub fn get_by_username(&self, username: &str) -> Option<&PlayerRef> {
        self.username_to_index
            .get(&username.to_lowercase())
            .and_then(|index| self.players.get(index))
    }

    /// Get the player count
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether no player is registered
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Check if the world is full
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_players as usize
    }

    /// Iterate over all players in index order
    pub fn iter(&self) -> impl Iterator<Item = &PlayerRef> {
        self.players.values()
    }

    /// Indices of all registered players
    pub fn indices(&self) -> Vec<u16> {
        self.players.keys().copied().collect()
    }

    fn allocate_index(&self) -> Result<u16> {
        (1..=self.max_players)
            .find(|index| !self.players.contains_key(index))
            .ok_or(RustscapeError::Game(GameError::WorldFull))
    }
}

impl Default for PlayerList {
    fn default() -> Self {
        Self::new(MAX_PLAYER_INDEX)
    }
}

impl std::fmt::Debug for PlayerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerList")
            .field("count", &self.len())
            .field("max_players", &self.max_players)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_step_towards() {
        let from = Location::new(10, 10, 0);

        assert_eq!(from.step_towards(&Location::new(12, 8, 0)), Location::new(11, 9, 0));
        assert_eq!(from.step_towards(&Location::new(10, 15, 0)), Location::new(10, 11, 0));
        assert_eq!(from.step_towards(&from), from);
    }

    #[test]
    fn test_location_step_keeps_plane() {
        let upstairs = Location::new(5, 5, 1);
        assert_eq!(upstairs.step_towards(&Location::new(9, 5, 0)), Location::new(6, 5, 1));
    }

    #[test]
    fn test_player_creation() {
        let player = Player::new(1, "Test_Player".to_string());
        assert_eq!(player.index, 1);
        assert_eq!(player.display_name, "Test Player");
        assert_eq!(player.state(), EntityState::New);
        assert_eq!(player.location(), Location::HOME);
        assert!(!player.actions().is_busy());
    }

    #[test]
    fn test_player_rights() {
        let player = Player::new(1, "Test".to_string());
        assert_eq!(player.rights(), PlayerRights::Normal);

        player.set_rights(PlayerRights::Administrator);
        assert_eq!(player.rights(), PlayerRights::Administrator);
        assert_eq!(player.snapshot(3).rights, PlayerRights::Administrator);
    }

    #[test]
    fn test_queue_reaches_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let player = Player::new(1, "Test".to_string()).with_outbound(tx);

        player.queue(OutgoingMessage::SystemUpdate { ticks: 10 });
        assert_eq!(rx.try_recv().unwrap(), OutgoingMessage::SystemUpdate { ticks: 10 });

        drop(rx);
        // A closed session must not be an error for the game thread
        player.queue(OutgoingMessage::Logout);
    }

    #[test]
    fn test_player_list() {
        let mut players = PlayerList::new(100);
        assert!(players.is_empty());

        let player = players.register("TestPlayer".to_string(), None).unwrap();
        assert_eq!(player.index, 1);
        assert_eq!(players.len(), 1);

        let found = players.get_by_username("testplayer").unwrap();
        assert_eq!(found.index, 1);

        assert!(players.remove(1).is_some());
        assert!(players.is_empty());
        assert!(players.get_by_username("testplayer").is_none());
    }

    #[test]
    fn test_player_list_duplicate() {
        let mut players = PlayerList::new(100);

        players.register("TestPlayer".to_string(), None).unwrap();
        let result = players.register("testplayer".to_string(), None);

        assert!(matches!(
            result,
            Err(RustscapeError::Game(GameError::AlreadyLoggedIn(_)))
        ));
    }

    #[test]
    fn test_player_list_reuses_lowest_index() {
        let mut players = PlayerList::new(3);

        for name in ["a", "b", "c"] {
            players.register(name.to_string(), None).unwrap();
        }
        assert!(players.is_full());
        assert!(matches!(
            players.register("d".to_string(), None),
            Err(RustscapeError::Game(GameError::WorldFull))
        ));

        players.remove(2);
        let player = players.register("d".to_string(), None).unwrap();
        assert_eq!(player.index, 2);
        assert_eq!(players.indices(), vec![1, 2, 3]);
    }
}

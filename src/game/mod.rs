//! Game module
//!
//! This module contains the game-thread side of the server:
//! - World management (game tick, player upkeep)
//! - Task and action scheduling
//! - Player management (registry, lifecycle states, actions)
//! - Player persistence and periodic autosave

pub mod action;
pub mod autosave;
pub mod entity;
pub mod movement;
pub mod persistence;
pub mod player;
pub mod task;
pub mod world;

pub use action::{Action, ActionHandle, ActionSet};
pub use entity::{Entity, EntityState};
pub use player::{Location, OutgoingMessage, Player, PlayerList, PlayerRef};
pub use task::{FnTask, Task, TaskContext, TaskHandle, TaskScheduler, TaskState};
pub use world::{World, WorldSettings};

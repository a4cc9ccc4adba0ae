//! Entity lifecycle module
//!
//! Every simulated actor (players, and later NPCs) moves through the same
//! three lifecycle states. Actions bound to an entity consult this state
//! each time they fire.

use std::fmt;

/// Lifecycle state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityState {
    /// Created but not yet registered with the world
    #[default]
    New,
    /// Registered and taking part in the simulation
    Active,
    /// Disconnected or removed; pending actions must not run
    Inactive,
}

impl EntityState {
    /// Get a printable name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EntityState::New => "NEW",
            EntityState::Active => "ACTIVE",
            EntityState::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An actor with a lifecycle state
pub trait Entity: 'static {
    /// Current lifecycle state
    fn state(&self) -> EntityState;

    /// Whether the entity is still part of the simulation
    fn is_active(&self) -> bool {
        self.state() == EntityState::Active
    }
}

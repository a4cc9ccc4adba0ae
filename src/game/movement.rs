//! Walking, the simplest player action

use std::rc::Rc;

use tracing::debug;

use crate::error::{GameError, Result};
use crate::game::action::Action;
use crate::game::player::{Location, Player};
use crate::game::task::TaskContext;

/// Walk one tile per tick towards a destination
#[derive(Debug, Clone, Copy)]
pub struct WalkAction {
    destination: Location,
}

impl WalkAction {
    pub fn new(destination: Location) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> Location {
        self.destination
    }
}

impl Action<Player> for WalkAction {
    fn delay(&self) -> u32 {
        1
    }

    fn instant(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "walk"
    }

    fn call(&mut self, player: &Rc<Player>, ctx: &mut TaskContext<'_>) -> Result<()> {
        // Height changes need stairs or a teleport
        if player.location().z != self.destination.z {
            ctx.cancel();
            return Err(GameError::InvalidAction(format!(
                "cannot walk from plane {} to {}",
                player.location().z,
                self.destination.z
            ))
            .into());
        }

        let next = player.location().step_towards(&self.destination);
        player.set_location(next);
        player.touch(ctx.tick());

        if next == self.destination {
            debug!(username = %player.username, location = %next, "Destination reached");
            ctx.cancel();
        }
        Ok(())
    }

    fn on_interrupt(&mut self, player: &Rc<Player>) {
        debug!(
            username = %player.username,
            location = %player.location(),
            "Walk stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::World;
    use crate::service::{GameService, ServiceSettings};

    fn test_world() -> World {
        World::new(GameService::new(
            ServiceSettings::default(),
            tokio::runtime::Handle::current(),
        ))
    }

    #[tokio::test]
    async fn test_walk_reaches_destination() {
        let mut world = test_world();
        let player = world.login("walker", None).unwrap();
        player.set_location(Location::new(3200, 3200, 0));

        let handle = player.submit_action(&mut world, WalkAction::new(Location::new(3203, 3201, 0)));

        world.advance();
        assert_eq!(player.location(), Location::new(3201, 3201, 0));

        world.advance();
        world.advance();
        assert_eq!(player.location(), Location::new(3203, 3201, 0));
        assert!(!handle.is_running());
        assert!(!player.actions().is_busy());
    }

    #[tokio::test]
    async fn test_new_walk_replaces_old() {
        let mut world = test_world();
        let player = world.login("walker", None).unwrap();
        player.set_location(Location::new(3200, 3200, 0));

        let east = player.submit_action(&mut world, WalkAction::new(Location::new(3210, 3200, 0)));
        world.advance();
        let north = player.submit_action(&mut world, WalkAction::new(Location::new(3201, 3205, 0)));
        world.advance();

        assert!(!east.is_running());
        assert!(north.is_running());
        assert_eq!(player.location(), Location::new(3201, 3201, 0));
    }

    #[tokio::test]
    async fn test_walk_to_other_plane_is_refused() {
        let mut world = test_world();
        let player = world.login("climber", None).unwrap();
        player.set_location(Location::new(3200, 3200, 0));

        let handle = player.submit_action(&mut world, WalkAction::new(Location::new(3201, 3200, 1)));
        world.advance();

        assert!(!handle.is_running());
        assert_eq!(player.location(), Location::new(3200, 3200, 0));
        assert!(world.tasks().is_empty());
    }
}

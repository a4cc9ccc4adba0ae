//! Periodic autosave of online players
//!
//! Snapshots are captured on the game thread, written on the worker pool,
//! and the result is handed back to the game thread through the sync queue.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::Result;
use crate::game::persistence::{PlayerSaver, PlayerSnapshot};
use crate::game::task::{Task, TaskContext};

/// Task saving every online player each `interval` ticks
pub struct AutosaveTask {
    interval: u32,
    saver: Arc<dyn PlayerSaver>,
}

impl AutosaveTask {
    pub fn new(interval: u64, saver: Arc<dyn PlayerSaver>) -> Self {
        Self {
            interval: interval.clamp(1, u32::MAX as u64) as u32,
            saver,
        }
    }
}

impl Task for AutosaveTask {
    fn delay(&self) -> u32 {
        self.interval
    }

    fn name(&self) -> &str {
        "autosave"
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        let tick = ctx.tick();
        let snapshots: Vec<PlayerSnapshot> = ctx
            .players()
            .iter()
            .map(|player| player.snapshot(tick))
            .collect();

        if snapshots.is_empty() {
            debug!(tick = tick, "No players online, skipping autosave");
            return Ok(());
        }

        info!(player_count = snapshots.len(), "Starting periodic autosave");

        let saver = self.saver.clone();
        let service = ctx.service().clone();

        ctx.service().submit(move || {
            let mut saved = Vec::with_capacity(snapshots.len());
            let mut failed = 0usize;

            for snapshot in &snapshots {
                match saver.save(snapshot) {
                    Ok(()) => saved.push(snapshot.username.clone()),
                    Err(e) => {
                        failed += 1;
                        error!(
                            username = %snapshot.username,
                            error = %e,
                            "Failed to autosave player"
                        );
                    }
                }
            }

            info!(saved = saved.len(), failed = failed, "Autosave complete");

            service.sync(move |world| {
                for username in &saved {
                    // The player may have logged out while the save ran
                    if let Some(player) = world.players().get_by_username(username) {
                        player.mark_saved(tick);
                    }
                }
                Ok(())
            });
        })?;

        Ok(())
    }
}

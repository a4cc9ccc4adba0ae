//! Game service module
//!
//! The execution core of the server:
//! - A fixed-rate tick clock on a dedicated game thread
//! - The sync queue handing work from any thread to the game thread
//! - The worker pool running blocking and async jobs off the game thread
//! - Lifecycle (NEW -> RUNNING -> STOPPING -> TERMINATED) and graceful shutdown
//!
//! [`GameService`] is a cheap, cloneable handle; clones share the same
//! queue, pool and lifecycle.

pub mod sync_queue;
pub mod worker;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServiceError};
use crate::game::player::OutgoingMessage;
use crate::game::task::{FnTask, TaskHandle};
use crate::game::world::World;

pub use sync_queue::{SyncQueue, SyncTask};
pub use worker::WorkerPool;

/// Tick clock settings
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Tick period
    pub tick_rate: Duration,
    /// Ticks added to a system update countdown before stopping
    pub system_update_grace_ticks: u32,
    /// Name of the game thread
    pub game_thread_name: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            tick_rate: Duration::from_millis(600),
            system_update_grace_ticks: 5,
            game_thread_name: "rustscape-game".to_string(),
        }
    }
}

impl From<&ServerConfig> for ServiceSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            tick_rate: config.tick_rate(),
            system_update_grace_ticks: config.system_update_grace_ticks,
            game_thread_name: config.game_thread_name.clone(),
        }
    }
}

/// Lifecycle state of the game service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Created, clock not started
    New,
    /// Clock firing
    Running,
    /// Stop requested, shutdown in progress
    Stopping,
    /// Shutdown complete
    Terminated,
}

impl ServiceState {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceState::New => "NEW",
            ServiceState::Running => "RUNNING",
            ServiceState::Stopping => "STOPPING",
            ServiceState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of the graceful shutdown sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sync entries run by the final drain
    pub drained: usize,
    /// Players disconnected
    pub disconnected: usize,
    /// Disconnect saves that failed
    pub save_failures: usize,
    /// Shutdown steps that panicked
    pub step_failures: usize,
}

impl ShutdownReport {
    /// Whether every step and every save succeeded
    pub fn is_clean(&self) -> bool {
        self.save_failures == 0 && self.step_failures == 0
    }
}

struct Inner {
    settings: ServiceSettings,
    sync_queue: SyncQueue,
    workers: WorkerPool,
    state: watch::Sender<ServiceState>,
    started_at: RwLock<Option<Instant>>,
}

/// Handle to the game service
#[derive(Clone)]
pub struct GameService {
    inner: Arc<Inner>,
}

impl GameService {
    /// Create a service whose worker pool runs on `handle`'s runtime
    pub fn new(settings: ServiceSettings, handle: Handle) -> Self {
        let (state, _) = watch::channel(ServiceState::New);

        Self {
            inner: Arc::new(Inner {
                settings,
                sync_queue: SyncQueue::new(),
                workers: WorkerPool::new(handle),
                state,
                started_at: RwLock::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.inner.settings
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    fn transition(&self, from: ServiceState, to: ServiceState) -> bool {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(from = %from, to = %to, "Game service state changed");
        }
        changed
    }

    /// Seconds since the clock started
    pub fn uptime_secs(&self) -> u64 {
        let started_at = *self.inner.started_at.read();
        started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Queue work to run on the game thread at the start of the next tick
    pub fn sync<F>(&self, work: F)
    where
        F: FnOnce(&mut World) -> Result<()> + Send + 'static,
    {
        self.inner.sync_queue.push(work);
    }

    /// Sync entries waiting for the next tick
    pub fn pending_sync(&self) -> usize {
        self.inner.sync_queue.len()
    }

    /// Run a blocking job on the worker pool
    pub fn submit<F, T>(&self, work: F) -> Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.inner.workers.submit(work)
    }

    /// Run a future on the worker pool
    pub fn submit_async<Fut>(&self, future: Fut) -> Result<JoinHandle<Fut::Output>>
    where
        Fut: std::future::Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.inner.workers.submit_async(future)
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.inner.workers
    }

    /// Run one clock firing: drain the sync queue, then advance the world.
    ///
    /// Errors and panics are logged; the clock keeps firing.
    pub fn tick(&self, world: &mut World) {
        let started = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.inner.sync_queue.drain_all(world);
            world.advance();
        }));

        if let Err(payload) = outcome {
            let e = ServiceError::from_panic(payload);
            error!(tick = world.tick(), error = %e, "Game tick failed");
        }

        let elapsed = started.elapsed();
        if elapsed > self.inner.settings.tick_rate {
            warn!(
                tick = world.tick(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Game tick overran its period"
            );
        }
    }

    /// Move from NEW to RUNNING
    pub fn start(&self) -> Result<()> {
        if !self.transition(ServiceState::New, ServiceState::Running) {
            return Err(ServiceError::InvalidState {
                expected: ServiceState::New.name(),
                actual: self.state().name(),
            }
            .into());
        }
        *self.inner.started_at.write() = Some(Instant::now());
        Ok(())
    }

    /// Request a stop.
    ///
    /// A running service moves to STOPPING and shuts down after the current
    /// firing; a service that never started terminates immediately. Returns
    /// whether this call changed the state.
    pub fn stop(&self) -> bool {
        if self.transition(ServiceState::Running, ServiceState::Stopping) {
            info!("Game service stop requested");
            return true;
        }
        if self.transition(ServiceState::New, ServiceState::Terminated) {
            info!("Game service stopped before starting");
            return true;
        }
        false
    }

    /// Wait until the service reaches TERMINATED
    pub async fn wait_for_termination(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == ServiceState::Terminated).await;
    }

    /// Drive `world` at the configured rate until stopped, then shut down.
    ///
    /// Must run on the game thread. Firings are scheduled at fixed
    /// multiples of the period from the start; late firings run back to
    /// back rather than being skipped.
    pub async fn run(&self, world: &mut World) -> Result<()> {
        self.start()?;

        let period = self.inner.settings.tick_rate;
        info!(tick_rate_ms = period.as_millis() as u64, "Game service started");

        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut state_rx = self.inner.state.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    self.tick(world);
                }
                _ = state_rx.wait_for(|state| *state != ServiceState::Running) => {
                    break;
                }
            }
        }

        // A stop requested from inside a firing is seen here
        self.transition(ServiceState::Running, ServiceState::Stopping);

        let report = self.graceful_shutdown(world);
        self.inner.state.send_replace(ServiceState::Terminated);

        info!(
            ticks = world.tick(),
            uptime_secs = self.uptime_secs(),
            clean = report.is_clean(),
            "Game service terminated"
        );
        Ok(())
    }

    /// Start the clock on a dedicated game thread.
    ///
    /// `build_world` runs on that thread, so the world never crosses
    /// threads.
    pub fn spawn<F>(&self, build_world: F) -> Result<thread::JoinHandle<()>>
    where
        F: FnOnce(GameService) -> World + Send + 'static,
    {
        let service = self.clone();

        thread::Builder::new()
            .name(self.inner.settings.game_thread_name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(fatal = true, error = %e, "Failed to build game thread runtime");
                        service.abort();
                        return;
                    }
                };

                let mut world = build_world(service.clone());
                if let Err(e) = runtime.block_on(service.run(&mut world)) {
                    error!(error = %e, "Game service failed to run");
                    service.abort();
                }
            })
            .map_err(|e| ServiceError::TickThread(e.to_string()).into())
    }

    /// Terminate without running the clock, still draining the worker pool
    fn abort(&self) {
        self.inner.workers.shutdown();
        self.inner.state.send_replace(ServiceState::Terminated);
    }

    /// Announce a system update and stop the clock `ticks` plus the grace
    /// period from now. Cancelling the returned handle aborts the update.
    pub fn schedule_system_update(&self, world: &mut World, ticks: u32) -> TaskHandle {
        let delay = ticks.saturating_add(self.inner.settings.system_update_grace_ticks);
        info!(ticks = ticks, stop_in = delay, "System update scheduled");

        world.broadcast(OutgoingMessage::SystemUpdate { ticks });

        world.schedule(
            FnTask::new(delay, |ctx| {
                info!(tick = ctx.tick(), "System update countdown finished");
                ctx.service().stop();
                ctx.cancel();
                Ok(())
            })
            .named("system-update"),
        )
    }

    /// Run the shutdown steps in order: final sync drain, disconnect every
    /// player (queueing their saves), then wait for the worker pool to finish.
    ///
    /// Each step runs even if an earlier one failed.
    pub fn graceful_shutdown(&self, world: &mut World) -> ShutdownReport {
        info!("Game service is being gracefully terminated. The application will exit once completed.");
        let mut report = ShutdownReport::default();

        match catch_unwind(AssertUnwindSafe(|| self.inner.sync_queue.drain_all(world))) {
            Ok(drained) => report.drained = drained,
            Err(payload) => {
                report.step_failures += 1;
                let e = ServiceError::from_panic(payload);
                error!(fatal = true, error = %e, "Final sync drain failed");
            }
        }

        let failed_before = world.failed_saves();
        match catch_unwind(AssertUnwindSafe(|| world.disconnect_all())) {
            Ok(disconnected) => report.disconnected = disconnected,
            Err(payload) => {
                report.step_failures += 1;
                let e = ServiceError::from_panic(payload);
                error!(fatal = true, error = %e, "Disconnecting players failed");
            }
        }

        // Disconnect saves run on the pool; this waits for them too
        self.inner.workers.shutdown();
        report.save_failures = world.failed_saves().saturating_sub(failed_before);

        if report.is_clean() {
            info!(
                drained = report.drained,
                disconnected = report.disconnected,
                "Graceful shutdown complete"
            );
        } else {
            error!(
                fatal = true,
                save_failures = report.save_failures,
                step_failures = report.step_failures,
                "Game service could not be terminated gracefully"
            );
        }
        report
    }
}

impl fmt::Debug for GameService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameService")
            .field("state", &self.state())
            .field("pending_sync", &self.pending_sync())
            .field("in_flight", &self.inner.workers.in_flight())
            .finish()
    }
}

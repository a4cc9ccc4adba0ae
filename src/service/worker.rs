//! Worker pool
//!
//! Runs background jobs on the tokio runtime: blocking closures on its
//! blocking pool, futures on its worker threads. The pool tracks in-flight
//! jobs so shutdown can wait for every accepted job to finish.

use std::future::Future;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Result, ServiceError};

#[derive(Debug)]
struct PoolState {
    accepting: bool,
    in_flight: usize,
}

#[derive(Debug)]
struct Tracker {
    state: Mutex<PoolState>,
    idle: Condvar,
}

/// Held by a running job; releases its slot when dropped
struct JobGuard(Arc<Tracker>);

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Background job executor
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    tracker: Arc<Tracker>,
}

impl WorkerPool {
    /// Create a pool running jobs on `handle`'s runtime
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tracker: Arc::new(Tracker {
                state: Mutex::new(PoolState {
                    accepting: true,
                    in_flight: 0,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    fn enter(&self) -> Result<JobGuard> {
        let mut state = self.tracker.state.lock();
        if !state.accepting {
            return Err(ServiceError::PoolShutdown.into());
        }
        state.in_flight += 1;
        Ok(JobGuard(self.tracker.clone()))
    }

    /// Run a blocking closure on the pool
    pub fn submit<F, T>(&self, work: F) -> Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.enter()?;
        Ok(self.handle.spawn_blocking(move || {
            let _guard = guard;
            work()
        }))
    }

    /// Run a future on the pool
    pub fn submit_async<Fut>(&self, future: Fut) -> Result<JoinHandle<Fut::Output>>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let guard = self.enter()?;
        Ok(self.handle.spawn(async move {
            let _guard = guard;
            future.await
        }))
    }

    /// Jobs accepted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.tracker.state.lock().in_flight
    }

    /// Whether the pool has stopped accepting jobs
    pub fn is_shutdown(&self) -> bool {
        !self.tracker.state.lock().accepting
    }

    /// Stop accepting jobs and block until every accepted job has finished.
    ///
    /// Must not be called from a task running on the pool's own runtime
    /// worker threads.
    pub fn shutdown(&self) {
        let mut state = self.tracker.state.lock();
        state.accepting = false;

        if state.in_flight > 0 {
            info!(in_flight = state.in_flight, "Waiting for worker jobs to finish");
        }
        while state.in_flight > 0 {
            self.tracker.idle.wait(&mut state);
        }

        debug!("Worker pool drained");
    }
}

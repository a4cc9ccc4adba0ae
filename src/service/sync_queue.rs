//! Sync queue
//!
//! Unbounded multi-producer queue of work that must run on the game thread.
//! Any thread may push; only the game thread drains, at the start of each
//! tick.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crossbeam::queue::SegQueue;
use tracing::error;

use crate::error::{Result, ServiceError};
use crate::game::world::World;

/// A unit of work executed on the game thread
pub type SyncTask = Box<dyn FnOnce(&mut World) -> Result<()> + Send>;

/// FIFO hand-off of work to the game thread
#[derive(Default)]
pub struct SyncQueue {
    queue: SegQueue<SyncTask>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue work; never blocks
    pub fn push<F>(&self, work: F)
    where
        F: FnOnce(&mut World) -> Result<()> + Send + 'static,
    {
        self.queue.push(Box::new(work));
    }

    /// Number of entries waiting
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Run entries in FIFO order until the queue is empty.
    ///
    /// Entries pushed while draining run in the same pass. A failing or
    /// panicking entry is logged and does not stop the drain. Returns the
    /// number of entries run.
    pub fn drain_all(&self, world: &mut World) -> usize {
        let mut executed = 0;

        while let Some(work) = self.queue.pop() {
            executed += 1;

            match catch_unwind(AssertUnwindSafe(|| work(world))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(tick = world.tick(), error = %e, "Sync task failed");
                }
                Err(payload) => {
                    let e = ServiceError::from_panic(payload);
                    error!(tick = world.tick(), error = %e, "Sync task panicked");
                }
            }
        }

        executed
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use crate::error::{GameError, RustscapeError};
    use crate::service::{GameService, ServiceSettings};

    fn test_world() -> World {
        World::new(GameService::new(
            ServiceSettings::default(),
            tokio::runtime::Handle::current(),
        ))
    }

    #[tokio::test]
    async fn test_drain_runs_in_fifo_order() {
        let mut world = test_world();
        let queue = SyncQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            queue.push(move |_world: &mut World| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(queue.drain_all(&mut world), 5);
        assert!(queue.is_empty());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_drain() {
        let mut world = test_world();
        let queue = SyncQueue::new();
        let ran = Arc::new(Mutex::new(0));

        queue.push(|_world: &mut World| {
            Err(RustscapeError::Game(GameError::InvalidAction("nope".to_string())))
        });
        queue.push(|_world: &mut World| -> Result<()> { panic!("boom") });
        let counter = ran.clone();
        queue.push(move |_world: &mut World| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        assert_eq!(queue.drain_all(&mut world), 3);
        assert_eq!(*ran.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let mut world = test_world();
        let queue = Arc::new(SyncQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..8)
            .map(|t| {
                let queue = queue.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let seen = seen.clone();
                        queue.push(move |_world: &mut World| {
                            seen.lock().unwrap().push((t, i));
                            Ok(())
                        });
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(queue.drain_all(&mut world), 800);

        let seen = seen.lock().unwrap();
        for t in 0..8 {
            let per_thread: Vec<_> = seen.iter().filter(|(p, _)| *p == t).map(|(_, i)| *i).collect();
            assert_eq!(per_thread, (0..100).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_entries_pushed_while_draining_run_in_same_pass() {
        let mut world = test_world();
        let queue = Arc::new(SyncQueue::new());
        let ran = Arc::new(Mutex::new(false));

        let inner_queue = queue.clone();
        let flag = ran.clone();
        queue.push(move |_world: &mut World| {
            inner_queue.push(move |_world: &mut World| {
                *flag.lock().unwrap() = true;
                Ok(())
            });
            Ok(())
        });

        assert_eq!(queue.drain_all(&mut world), 2);
        assert!(*ran.lock().unwrap());
    }
}

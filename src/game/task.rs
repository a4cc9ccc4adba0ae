//! Task module
//!
//! Tasks are the unit of periodic work driven by the world tick:
//! - A task fires every `delay` ticks, optionally once immediately (`instant`)
//! - Cancellation is cooperative and final; `on_cancel` fires exactly once
//! - Failing executions are logged and the task stays scheduled
//!
//! Tasks are confined to the game thread. Scheduling moves the task into the
//! world and hands back a [`TaskHandle`], so a task can never be registered
//! twice.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{debug, error};

use crate::error::{Result, ServiceError};
use crate::game::player::PlayerList;
use crate::service::GameService;

/// Execution state of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Built but not registered with the world
    Idle,
    /// Registered and firing
    Running,
    /// Cancelled; never fires again
    Cancelled,
}

/// Periodic logic executed by the game tick
pub trait Task: 'static {
    /// Ticks between executions
    fn delay(&self) -> u32;

    /// Whether the first execution happens on the first tick after scheduling
    fn instant(&self) -> bool {
        false
    }

    /// Name used in log output
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The unit of work
    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<()>;

    /// Invoked once, when the task is registered
    fn on_schedule(&mut self, _ctx: &mut TaskContext<'_>) {}

    /// Invoked once, on the first cancellation
    fn on_cancel(&mut self) {}
}

/// Scheduler-side bookkeeping for one registered task
struct TaskCell {
    name: String,
    delay: u32,
    instant: Cell<bool>,
    counter: Cell<u32>,
    state: Cell<TaskState>,
    /// Set when the task was cancelled while its body was running
    cancel_hook_pending: Cell<bool>,
    task: RefCell<Box<dyn Task>>,
}

impl TaskCell {
    fn new(task: Box<dyn Task>) -> Self {
        Self {
            name: task.name().to_string(),
            delay: task.delay(),
            instant: Cell::new(task.instant()),
            counter: Cell::new(0),
            state: Cell::new(TaskState::Idle),
            cancel_hook_pending: Cell::new(false),
            task: RefCell::new(task),
        }
    }

    fn is_running(&self) -> bool {
        self.state.get() == TaskState::Running
    }

    /// Count one tick and report whether the task is due
    fn tick_due(&self) -> bool {
        if self.instant.replace(false) {
            return true;
        }
        let counter = self.counter.get() + 1;
        if counter >= self.delay {
            self.counter.set(0);
            true
        } else {
            self.counter.set(counter);
            false
        }
    }

    fn advance(self: &Rc<Self>, ctx: &mut TaskContext<'_>) {
        if !self.is_running() || !self.tick_due() {
            return;
        }

        let previous = ctx.current.replace(TaskHandle(self.clone()));
        let outcome = catch_unwind(AssertUnwindSafe(|| self.task.borrow_mut().execute(ctx)));
        ctx.current = previous;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(task = %self.name, tick = ctx.tick, error = %e, "Task execution failed");
            }
            Err(payload) => {
                let e = ServiceError::from_panic(payload);
                error!(task = %self.name, tick = ctx.tick, error = %e, "Task execution panicked");
            }
        }

        self.fire_pending_cancel_hook();
    }

    /// Run `on_cancel`; a panicking hook is logged and contained
    fn run_cancel_hook(&self, task: &mut Box<dyn Task>) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.on_cancel())) {
            let e = ServiceError::from_panic(payload);
            error!(task = %self.name, error = %e, "Task cancel hook panicked");
        }
    }

    fn fire_pending_cancel_hook(&self) {
        if self.cancel_hook_pending.replace(false) {
            self.run_cancel_hook(&mut self.task.borrow_mut());
        }
    }
}

/// Handle to a registered task
///
/// Handles are cheap to clone; every clone refers to the same task.
#[derive(Clone)]
pub struct TaskHandle(Rc<TaskCell>);

impl TaskHandle {
    /// Cancel the task. Only the first call has an effect.
    pub fn cancel(&self) {
        if self.0.state.replace(TaskState::Cancelled) == TaskState::Cancelled {
            return;
        }

        debug!(task = %self.0.name, "Task cancelled");

        match self.0.task.try_borrow_mut() {
            Ok(mut task) => self.0.run_cancel_hook(&mut task),
            // Cancelled from inside its own body; the hook fires when the body returns
            Err(_) => self.0.cancel_hook_pending.set(true),
        }
    }

    /// Whether the task is registered and not cancelled
    pub fn is_running(&self) -> bool {
        self.0.is_running()
    }

    /// Current execution state
    pub fn state(&self) -> TaskState {
        self.0.state.get()
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Ticks between executions
    pub fn delay(&self) -> u32 {
        self.0.delay
    }

    /// Non-owning handle that does not keep the task alive
    pub fn downgrade(&self) -> WeakTaskHandle {
        WeakTaskHandle(Rc::downgrade(&self.0))
    }
}

/// Non-owning task handle
#[derive(Clone)]
pub struct WeakTaskHandle(Weak<TaskCell>);

impl WeakTaskHandle {
    /// Recover the task if the world still holds it
    pub fn upgrade(&self) -> Option<TaskHandle> {
        self.0.upgrade().map(TaskHandle)
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TaskHandle {}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.0.name)
            .field("state", &self.state())
            .field("delay", &self.0.delay)
            .finish()
    }
}

/// Anything tasks can be scheduled on: the world itself, or the context
/// handed to a running task.
pub trait TaskScheduler {
    /// Register a boxed task
    fn schedule_boxed(&mut self, task: Box<dyn Task>) -> TaskHandle;

    /// Register a task
    fn schedule<T: Task>(&mut self, task: T) -> TaskHandle
    where
        Self: Sized,
    {
        self.schedule_boxed(Box::new(task))
    }
}

/// View of the world handed to task bodies and hooks
pub struct TaskContext<'a> {
    tick: u64,
    players: &'a mut PlayerList,
    service: &'a GameService,
    scheduled: &'a mut Vec<Rc<TaskCell>>,
    current: Option<TaskHandle>,
}

impl<'a> TaskContext<'a> {
    /// Current world tick
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Registered players
    pub fn players(&self) -> &PlayerList {
        &*self.players
    }

    /// Registered players, mutably
    pub fn players_mut(&mut self) -> &mut PlayerList {
        &mut *self.players
    }

    /// The game service (sync queue, worker pool, lifecycle)
    pub fn service(&self) -> &GameService {
        self.service
    }

    /// Handle of the task whose body or hook is running
    pub fn current(&self) -> Option<&TaskHandle> {
        self.current.as_ref()
    }

    /// Cancel the task whose body or hook is running
    pub fn cancel(&self) {
        if let Some(handle) = &self.current {
            handle.cancel();
        }
    }
}

impl TaskScheduler for TaskContext<'_> {
    fn schedule_boxed(&mut self, task: Box<dyn Task>) -> TaskHandle {
        let cell = Rc::new(TaskCell::new(task));
        cell.state.set(TaskState::Running);
        let handle = TaskHandle(cell.clone());

        let previous = self.current.replace(handle.clone());
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            cell.task.borrow_mut().on_schedule(self);
        }));
        self.current = previous;

        if let Err(payload) = outcome {
            let e = ServiceError::from_panic(payload);
            error!(task = %cell.name, error = %e, "Task schedule hook panicked");
        }
        cell.fire_pending_cancel_hook();

        debug!(
            task = %cell.name,
            delay = cell.delay,
            instant = cell.instant.get(),
            "Task scheduled"
        );

        self.scheduled.push(cell);
        handle
    }
}

/// Active task set of the world
#[derive(Default)]
pub struct TaskManager {
    /// Tasks that fire this tick, in registration order
    active: Vec<Rc<TaskCell>>,
    /// Tasks registered since the last tick started
    pending: Vec<Rc<TaskCell>>,
}

impl TaskManager {
    /// Create an empty task manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context for scheduling outside of a tick
    pub(crate) fn context<'a>(
        &'a mut self,
        tick: u64,
        players: &'a mut PlayerList,
        service: &'a GameService,
    ) -> TaskContext<'a> {
        TaskContext {
            tick,
            players,
            service,
            scheduled: &mut self.pending,
            current: None,
        }
    }

    /// Fire every due task once, then sweep out cancelled ones
    pub(crate) fn process(&mut self, tick: u64, players: &mut PlayerList, service: &GameService) {
        self.active.append(&mut self.pending);

        // Tasks registered while firing land in `pending`
        let mut ctx = TaskContext {
            tick,
            players,
            service,
            scheduled: &mut self.pending,
            current: None,
        };
        for task in &self.active {
            task.advance(&mut ctx);
        }

        self.active.retain(|task| task.is_running());
    }

    /// Number of registered, non-cancelled tasks
    pub fn len(&self) -> usize {
        self.active
            .iter()
            .chain(self.pending.iter())
            .filter(|task| task.is_running())
            .count()
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("active", &self.active.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// A task built from a closure
pub struct FnTask<F> {
    name: String,
    delay: u32,
    instant: bool,
    body: F,
}

impl<F> FnTask<F> {
    /// Fire `body` every `delay` ticks
    pub fn new(delay: u32, body: F) -> Self
    where
        F: FnMut(&mut TaskContext<'_>) -> Result<()> + 'static,
    {
        Self {
            name: "fn-task".to_string(),
            delay,
            instant: false,
            body,
        }
    }

    /// Fire `body` on the first tick, then every `delay` ticks
    pub fn immediate(delay: u32, body: F) -> Self
    where
        F: FnMut(&mut TaskContext<'_>) -> Result<()> + 'static,
    {
        Self {
            instant: true,
            ..Self::new(delay, body)
        }
    }

    /// Set the name used in log output
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> Task for FnTask<F>
where
    F: FnMut(&mut TaskContext<'_>) -> Result<()> + 'static,
{
    fn delay(&self) -> u32 {
        self.delay
    }

    fn instant(&self) -> bool {
        self.instant
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        (self.body)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GameError, RustscapeError};
    use crate::game::world::World;
    use crate::service::{GameService, ServiceSettings};

    fn test_world() -> World {
        let service = GameService::new(
            ServiceSettings::default(),
            tokio::runtime::Handle::current(),
        );
        World::new(service)
    }

    /// Counts executions and hook invocations through shared cells
    struct Tally {
        delay: u32,
        instant: bool,
        runs: Rc<RefCell<Vec<u64>>>,
        scheduled: Rc<Cell<u32>>,
        cancelled: Rc<Cell<u32>>,
    }

    impl Tally {
        fn new(delay: u32, instant: bool) -> Self {
            Self {
                delay,
                instant,
                runs: Rc::default(),
                scheduled: Rc::default(),
                cancelled: Rc::default(),
            }
        }
    }

    impl Task for Tally {
        fn delay(&self) -> u32 {
            self.delay
        }

        fn instant(&self) -> bool {
            self.instant
        }

        fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
            self.runs.borrow_mut().push(ctx.tick());
            Ok(())
        }

        fn on_schedule(&mut self, _ctx: &mut TaskContext<'_>) {
            self.scheduled.set(self.scheduled.get() + 1);
        }

        fn on_cancel(&mut self) {
            self.cancelled.set(self.cancelled.get() + 1);
        }
    }

    #[tokio::test]
    async fn test_delay_cadence() {
        let mut world = test_world();
        let tally = Tally::new(3, false);
        let runs = tally.runs.clone();
        let scheduled = tally.scheduled.clone();

        let handle = world.schedule(tally);
        assert!(handle.is_running());
        assert_eq!(scheduled.get(), 1);

        for _ in 0..9 {
            world.advance();
        }
        assert_eq!(*runs.borrow(), vec![3, 6, 9]);
    }

    #[tokio::test]
    async fn test_instant_then_cadence() {
        let mut world = test_world();
        let tally = Tally::new(2, true);
        let runs = tally.runs.clone();

        world.schedule(tally);
        for _ in 0..5 {
            world.advance();
        }
        assert_eq!(*runs.borrow(), vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_cancel_is_final_and_idempotent() {
        let mut world = test_world();
        let tally = Tally::new(1, false);
        let runs = tally.runs.clone();
        let cancelled = tally.cancelled.clone();

        let handle = world.schedule(tally);
        world.advance();
        handle.cancel();
        handle.cancel();
        handle.clone().cancel();

        for _ in 0..5 {
            world.advance();
        }

        assert_eq!(*runs.borrow(), vec![1]);
        assert_eq!(cancelled.get(), 1);
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert!(world.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick() {
        let mut world = test_world();
        let tally = Tally::new(1, true);
        let runs = tally.runs.clone();

        let handle = world.schedule(tally);
        handle.cancel();
        world.advance();

        assert!(runs.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_self_cancel_fires_hook_once() {
        let mut world = test_world();
        let cancelled = Rc::new(Cell::new(0));

        struct Once {
            cancelled: Rc<Cell<u32>>,
        }

        impl Task for Once {
            fn delay(&self) -> u32 {
                1
            }

            fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
                ctx.cancel();
                ctx.cancel();
                Ok(())
            }

            fn on_cancel(&mut self) {
                self.cancelled.set(self.cancelled.get() + 1);
            }
        }

        let handle = world.schedule(Once {
            cancelled: cancelled.clone(),
        });
        world.advance();
        world.advance();

        assert!(!handle.is_running());
        assert_eq!(cancelled.get(), 1);
    }

    #[tokio::test]
    async fn test_failing_task_stays_scheduled() {
        let mut world = test_world();
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let handle = world.schedule(FnTask::new(1, move |_ctx| {
            counter.set(counter.get() + 1);
            Err(RustscapeError::Game(GameError::InvalidAction(
                "transient".to_string(),
            )))
        }));

        for _ in 0..3 {
            world.advance();
        }

        assert_eq!(attempts.get(), 3);
        assert!(handle.is_running());
    }

    #[tokio::test]
    async fn test_panicking_task_stays_scheduled() {
        let mut world = test_world();
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        world.schedule(FnTask::new(1, move |_ctx| {
            counter.set(counter.get() + 1);
            panic!("bad task");
        }));

        world.advance();
        world.advance();
        assert_eq!(attempts.get(), 2);
    }

    #[tokio::test]
    async fn test_task_scheduled_during_tick_starts_next_tick() {
        let mut world = test_world();
        let runs = Rc::new(RefCell::new(Vec::new()));
        let inner_runs = runs.clone();

        world.schedule(FnTask::immediate(1, move |ctx| {
            let runs = inner_runs.clone();
            ctx.schedule(FnTask::immediate(1, move |ctx| {
                runs.borrow_mut().push(ctx.tick());
                ctx.cancel();
                Ok(())
            }));
            ctx.cancel();
            Ok(())
        }));

        world.advance();
        assert!(runs.borrow().is_empty());
        world.advance();
        assert_eq!(*runs.borrow(), vec![2]);
    }

    #[tokio::test]
    async fn test_firing_order_is_registration_order() {
        let mut world = test_world();
        let order = Rc::new(RefCell::new(Vec::new()));

        for id in 0..4 {
            let order = order.clone();
            world.schedule(FnTask::new(1, move |_ctx| {
                order.borrow_mut().push(id);
                Ok(())
            }));
        }
        world.advance();

        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_handle_identity() {
        let mut world = test_world();
        let a = world.schedule(FnTask::new(1, |_ctx| Ok(())).named("a"));
        let b = world.schedule(FnTask::new(1, |_ctx| Ok(())).named("b"));

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.name(), "a");
        assert_eq!(world.tasks().len(), 2);
    }

    /// Task whose hooks panic; the body cancels the task on its first run
    struct Fragile {
        panic_on_schedule: bool,
        runs: Rc<Cell<u32>>,
    }

    impl Task for Fragile {
        fn delay(&self) -> u32 {
            1
        }

        fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
            self.runs.set(self.runs.get() + 1);
            ctx.cancel();
            Ok(())
        }

        fn on_schedule(&mut self, _ctx: &mut TaskContext<'_>) {
            if self.panic_on_schedule {
                panic!("schedule hook failed");
            }
        }

        fn on_cancel(&mut self) {
            panic!("cancel hook failed");
        }
    }

    #[tokio::test]
    async fn test_panicking_cancel_hook_keeps_other_tasks() {
        let mut world = test_world();
        let healthy_runs = Rc::new(Cell::new(0));
        let counter = healthy_runs.clone();

        let fragile = world.schedule(Fragile {
            panic_on_schedule: false,
            runs: Rc::default(),
        });
        let healthy = world.schedule(FnTask::new(1, move |_ctx| {
            counter.set(counter.get() + 1);
            Ok(())
        }));

        for _ in 0..5 {
            world.advance();
        }

        assert_eq!(healthy_runs.get(), 5);
        assert!(healthy.is_running());
        assert!(!fragile.is_running());
        assert_eq!(world.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_hooks_outside_a_tick() {
        let mut world = test_world();
        let runs = Rc::new(Cell::new(0));

        let handle = world.schedule(Fragile {
            panic_on_schedule: true,
            runs: runs.clone(),
        });
        assert!(handle.is_running());

        world.advance();
        assert_eq!(runs.get(), 1);

        let other = world.schedule(Fragile {
            panic_on_schedule: false,
            runs: Rc::default(),
        });
        other.cancel();
        other.cancel();

        assert_eq!(other.state(), TaskState::Cancelled);
        assert!(world.tasks().is_empty());
    }
}

//! Action module
//!
//! Actions are tasks bound to a single entity:
//! - Each entity runs at most one action at a time (see [`ActionSet`])
//! - An action whose entity has gone inactive is interrupted instead of run
//! - Interruption cancels the underlying task and fires `on_interrupt` once

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::Result;
use crate::game::entity::{Entity, EntityState};
use crate::game::task::{Task, TaskContext, TaskHandle, TaskScheduler, WeakTaskHandle};

/// Entity-bound periodic logic
pub trait Action<E: Entity>: 'static {
    /// Ticks between calls
    fn delay(&self) -> u32;

    /// Whether the first call happens on the first tick after init
    fn instant(&self) -> bool {
        false
    }

    /// Name used in log output
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The unit of work, called every `delay` ticks while the entity is active
    fn call(&mut self, entity: &Rc<E>, ctx: &mut TaskContext<'_>) -> Result<()>;

    /// Invoked once, when the action is initialized
    fn on_init(&mut self, _entity: &Rc<E>, _ctx: &mut TaskContext<'_>) {}

    /// Invoked once, when the action is interrupted
    fn on_interrupt(&mut self, _entity: &Rc<E>) {}
}

/// Drives an [`Action`] through the task scheduler
struct ActionProcessor<E, A> {
    entity: Rc<E>,
    action: A,
}

impl<E, A> Task for ActionProcessor<E, A>
where
    E: Entity,
    A: Action<E>,
{
    fn delay(&self) -> u32 {
        self.action.delay()
    }

    fn instant(&self) -> bool {
        self.action.instant()
    }

    fn name(&self) -> &str {
        self.action.name()
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        if self.entity.state() == EntityState::Inactive {
            ctx.cancel();
            return Ok(());
        }
        self.action.call(&self.entity, ctx)
    }

    fn on_schedule(&mut self, ctx: &mut TaskContext<'_>) {
        self.action.on_init(&self.entity, ctx);
    }

    fn on_cancel(&mut self) {
        self.action.on_interrupt(&self.entity);
    }
}

/// Handle to an initialized action
///
/// Two handles compare equal only when they refer to the same action; no two
/// distinct actions are ever equal.
pub struct ActionHandle<E> {
    task: TaskHandle,
    entity: Rc<E>,
}

impl<E: Entity> ActionHandle<E> {
    /// Initialize `action` for `entity` by scheduling its processor.
    ///
    /// The action is consumed, so it can only ever be initialized once.
    /// This does not interrupt other actions of the entity; use
    /// [`ActionSet::submit`] for that.
    pub fn init<A, S>(scheduler: &mut S, entity: Rc<E>, action: A) -> Self
    where
        A: Action<E>,
        S: TaskScheduler + ?Sized,
    {
        let task = scheduler.schedule_boxed(Box::new(ActionProcessor {
            entity: entity.clone(),
            action,
        }));
        Self { task, entity }
    }

    /// The entity the action is bound to
    pub fn entity(&self) -> &Rc<E> {
        &self.entity
    }

    /// The task driving the action
    pub fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// Interrupt the action. Only the first call has an effect.
    pub fn interrupt(&self) {
        self.task.cancel();
    }

    /// Whether the action has not been interrupted
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Action name
    pub fn name(&self) -> &str {
        self.task.name()
    }
}

impl<E> Clone for ActionHandle<E> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            entity: self.entity.clone(),
        }
    }
}

impl<E> PartialEq for ActionHandle<E> {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task
    }
}

impl<E> Eq for ActionHandle<E> {}

impl<E> fmt::Debug for ActionHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandle")
            .field("task", &self.task)
            .finish()
    }
}

/// The single action slot of an entity
///
/// Submitting a new action interrupts the one currently running. The slot
/// only holds a weak reference, so a finished action is freed once the
/// world sweeps it.
#[derive(Default)]
pub struct ActionSet {
    current: RefCell<Option<WeakTaskHandle>>,
}

impl ActionSet {
    /// Create an empty action slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt the running action (if any) and start `action` for `entity`
    pub fn submit<E, A, S>(&self, scheduler: &mut S, entity: Rc<E>, action: A) -> ActionHandle<E>
    where
        E: Entity,
        A: Action<E>,
        S: TaskScheduler + ?Sized,
    {
        self.interrupt();

        let handle = ActionHandle::init(scheduler, entity, action);
        debug!(action = %handle.name(), "Action submitted");

        *self.current.borrow_mut() = Some(handle.task.downgrade());
        handle
    }

    /// Interrupt the running action, if any
    pub fn interrupt(&self) {
        // Release the slot before the hook runs; it may submit a new action
        let current = self.current.borrow_mut().take();
        if let Some(task) = current.and_then(|weak| weak.upgrade()) {
            task.cancel();
        }
    }

    /// Task of the running action, if any
    pub fn current(&self) -> Option<TaskHandle> {
        self.current
            .borrow()
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .filter(|task| task.is_running())
    }

    /// Whether an action is running
    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }
}

impl fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSet")
            .field("current", &self.current())
            .finish()
    }
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use static_assertions::assert_not_impl_any;

use crate::directive::{self, AnyWait, Directive};
use crate::error::JoinError;
use crate::event::Event;
use crate::queue::TimerQueue;
use crate::task::{IntoSteps, Periodic, Step, Task, Timer};
use crate::time::{Clock, SystemClock};

/// Runtime state shared between the scheduler handle and its tasks.
pub(crate) struct Core {
    clock: Rc<dyn Clock>,
    queue: RefCell<TimerQueue>,
}

/// A single-threaded cooperative runtime.
///
/// The scheduler owns the timer queue and the clock. It interleaves tasks
/// by popping the earliest scheduled one, sleeping until its wake-up time,
/// running exactly one step, and interpreting the yielded [`Directive`].
/// Exactly one task runs at a time; a task runs until it yields.
///
/// `Scheduler` is a handle: clones are cheap and drive the same runtime.
/// The runtime is strictly single-threaded; the scheduler, its tasks, and
/// its events must all stay on the thread that created them.
#[derive(Clone)]
pub struct Scheduler {
    core: Rc<Core>,
}

assert_not_impl_any!(Scheduler: Send, Sync);

// === impl Scheduler ===

impl Scheduler {
    /// A runtime driven by the real monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Rc::new(SystemClock))
    }

    /// A runtime driven by a custom clock.
    #[must_use]
    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self {
            core: Rc::new(Core {
                clock,
                queue: RefCell::new(TimerQueue::new()),
            }),
        }
    }

    pub(crate) fn from_core(core: Rc<Core>) -> Self {
        Self { core }
    }

    pub(crate) fn downgrade(&self) -> Weak<Core> {
        Rc::downgrade(&self.core)
    }

    pub(crate) fn now(&self) -> Instant {
        self.core.clock.now()
    }

    pub(crate) fn schedule(&self, task: Task, at: Instant) {
        tracing::trace!(task = ?task.name(), ?at, "scheduling task");
        self.core.queue.borrow_mut().push(task, at);
    }

    /// Constructs a task and starts it immediately.
    pub fn spawn<F, S>(&self, target: F) -> Task
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        let task = Task::new(target);
        task.launch(self);
        task
    }

    /// Constructs a one-shot task whose first run is `interval` from now,
    /// and starts it.
    pub fn delay<F, S>(&self, interval: Duration, target: F) -> Timer
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        let timer = Timer::new(interval, target);
        timer.launch(self);
        timer
    }

    /// Constructs a periodic task firing every `interval`, and starts it.
    pub fn every<F, S>(&self, interval: Duration, target: F) -> Periodic
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        let periodic = Periodic::new(interval, target);
        periodic.launch(self);
        periodic
    }

    /// Drives the runtime until the timer queue drains or `timeout`
    /// elapses.
    ///
    /// Tasks suspended on events are not scheduled and do not keep `join`
    /// from returning. Returning on timeout is not cancellation: every
    /// scheduled task stays on the queue in its current state.
    ///
    /// # Errors
    ///
    /// [`JoinError::InvalidDirective`] if a task yields a directive outside
    /// the accepted set.
    pub fn join(&self, timeout: Option<Duration>) -> Result<(), JoinError> {
        self.drive(None, timeout)
    }

    /// Discards every scheduled task.
    ///
    /// Events and tasks suspended on events are unaffected.
    pub fn clear(&self) {
        self.core.queue.borrow_mut().clear();
    }

    /// Whether the timer queue is empty.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.core.queue.borrow().is_empty()
    }

    /// The shared scheduler loop behind [`Scheduler::join`] and
    /// [`Task::join`]: drain the queue, or drain until `until` dies.
    pub(crate) fn drive(
        &self,
        until: Option<&Task>,
        timeout: Option<Duration>,
    ) -> Result<(), JoinError> {
        let deadline = timeout.map(|timeout| self.now() + timeout);

        loop {
            if let Some(task) = until {
                if !task.is_alive() {
                    return Ok(());
                }
            }

            let popped = self.core.queue.borrow_mut().pop();
            let Some(entry) = popped else {
                return match until {
                    // Nothing scheduled can ever wake the joined task.
                    Some(_) => Err(JoinError::Stalled),
                    None => Ok(()),
                };
            };

            // stopped periodics and other dead tasks are discarded at pop
            if !entry.task.is_alive() {
                tracing::warn!(task = ?entry.task.name(), "discarding dead task");
                continue;
            }

            let now = self.now();

            if let Some(deadline) = deadline {
                if entry.at > deadline {
                    // out of time: put the entry back untouched and consume
                    // the remainder of the timeout
                    let wait = deadline.saturating_duration_since(now);
                    self.core.queue.borrow_mut().restore(entry);
                    if !wait.is_zero() {
                        self.core.clock.sleep(wait);
                    }
                    return Ok(());
                }
            }

            let wait = entry.at.saturating_duration_since(now);
            if !wait.is_zero() {
                tracing::trace!(task = ?entry.task.name(), ?wait, "sleeping until next wake-up");
                self.core.clock.sleep(wait);
            }

            // A periodic task re-enqueues itself before running; a firing
            // that produces a step-generator substitutes a detached helper
            // task for the rest of this iteration.
            let task = if let Some(interval) = entry.task.periodic_interval() {
                let next = entry.at + interval;
                entry.task.set_next_time(next);
                self.schedule(entry.task.clone(), next);

                match entry.task.fire(self.now()) {
                    Some(helper) => helper,
                    None => continue,
                }
            } else {
                entry.task.clone()
            };

            match task.step() {
                Step::Complete => continue,
                Step::Yielded(directive) => self.handle_directive(&task, directive)?,
            }
        }
    }

    fn handle_directive(&self, task: &Task, directive: Directive) -> Result<(), JoinError> {
        tracing::trace!(task = ?task.name(), ?directive, "handling directive");
        let now = self.now();

        match directive {
            Directive::Yield => self.reschedule(task, now),
            Directive::Sleep(duration) => self.reschedule(task, now + duration),
            Directive::Wait(event) => self.wait_on(task, &event, now),
            Directive::Join(other) => {
                let exit = other.exit_event();
                self.wait_on(task, &exit, now);
            }
            Directive::Any(list) => {
                let any = match directive::flatten_any(list) {
                    Ok(any) => any,
                    Err(directive::NestedAny) => {
                        task.mark_dead();
                        return Err(JoinError::InvalidDirective { task: task.name() });
                    }
                };
                self.wait_any(task, any, now);
            }
        }

        Ok(())
    }

    /// Parks `task` on a folded wait-for-any.
    fn wait_any(&self, task: &Task, any: AnyWait, now: Instant) {
        let AnyWait { timeout, mut events } = any;

        match (events.len(), timeout) {
            (0, None) => self.reschedule(task, now),
            (0, Some(timeout)) => self.reschedule(task, now + timeout),
            (1, None) => {
                let event = events.remove(0);
                self.wait_on(task, &event, now);
            }
            _ => {
                if events.iter().any(Event::is_set) {
                    self.reschedule(task, now);
                    return;
                }

                // first-one-wins: every source fires the same one-shot
                // composite, which fires at most once
                let first = Event::new();
                for event in &events {
                    let first = first.clone();
                    event.subscribe(Box::new(move || first.set()));
                }
                if let Some(timeout) = timeout {
                    self.deferred_set(first.clone(), now + timeout);
                }
                self.wait_on(task, &first, now);
            }
        }
    }

    /// Parks `task` on `event`; reschedules immediately if it is already
    /// set. A task resumed by an event wake-up joins the ready tail at the
    /// then-current time.
    fn wait_on(&self, task: &Task, event: &Event, now: Instant) {
        if event.is_set() {
            self.reschedule(task, now);
            return;
        }

        tracing::trace!(task = ?task.name(), ?event, "suspending task on event");
        let runtime = self.downgrade();
        let task = task.clone();
        event.subscribe(Box::new(move || {
            if let Some(core) = runtime.upgrade() {
                let runtime = Scheduler::from_core(core);
                let now = runtime.now();
                runtime.reschedule(&task, now);
            }
        }));
    }

    fn reschedule(&self, task: &Task, at: Instant) {
        task.set_next_time(at);
        self.schedule(task.clone(), at);
    }

    /// Sets `event` at `at` through an internal one-shot queue entry.
    fn deferred_set(&self, event: Event, at: Instant) {
        let task = Task::new(move || event.set());
        task.launch_at(self, at);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("scheduled", &self.core.queue.borrow().len())
            .finish_non_exhaustive()
    }
}

thread_local! {
    static DEFAULT: Scheduler = Scheduler::new();
}

/// The calling thread's default runtime.
///
/// Every thread gets its own; the free functions below bind to it.
#[must_use]
pub fn runtime() -> Scheduler {
    DEFAULT.with(Scheduler::clone)
}

/// Constructs a task on the default runtime and starts it immediately.
pub fn spawn<F, S>(target: F) -> Task
where
    F: FnMut() -> S + 'static,
    S: IntoSteps,
{
    runtime().spawn(target)
}

/// Constructs a one-shot delayed task on the default runtime and starts
/// it.
pub fn delay<F, S>(interval: Duration, target: F) -> Timer
where
    F: FnMut() -> S + 'static,
    S: IntoSteps,
{
    runtime().delay(interval, target)
}

/// Constructs a periodic task on the default runtime and starts it.
pub fn every<F, S>(interval: Duration, target: F) -> Periodic
where
    F: FnMut() -> S + 'static,
    S: IntoSteps,
{
    runtime().every(interval, target)
}

/// Drains the calling thread's default runtime.
///
/// # Errors
///
/// Same as [`Scheduler::join`].
pub fn join(timeout: Option<Duration>) -> Result<(), JoinError> {
    runtime().join(timeout)
}

/// Discards every task scheduled on the default runtime.
pub fn clear() {
    runtime().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn spawn_runs_the_target_to_completion() {
        let runtime = Scheduler::new();
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        let task = runtime.spawn(move || flag.set(true));

        runtime.join(None).unwrap();
        assert!(ran.get());
        assert!(!task.is_alive());
        assert!(runtime.is_idle());
    }

    #[test]
    fn clear_discards_scheduled_tasks() {
        let runtime = Scheduler::new();
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        runtime.spawn(move || flag.set(true));
        assert!(!runtime.is_idle());

        runtime.clear();
        assert!(runtime.is_idle());

        runtime.join(None).unwrap();
        assert!(!ran.get());
    }

    #[test]
    fn default_runtime_free_functions_share_one_queue() {
        let ran = Rc::new(Cell::new(0));

        let counter = ran.clone();
        spawn(move || counter.set(counter.get() + 1));
        let counter = ran.clone();
        spawn(move || counter.set(counter.get() + 1));

        join(None).unwrap();
        assert_eq!(ran.get(), 2);
        assert!(runtime().is_idle());
    }
}

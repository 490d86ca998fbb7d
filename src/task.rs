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

use crate::directive::Directive;
use crate::error::{JoinError, StartError, StopError};
use crate::event::Event;
use crate::scheduler::{Core, Scheduler};

/// What a task target produces when it is invoked.
///
/// A target either completes inline ([`Steps::done`]), in which case the
/// task dies after the one call, or produces a step-generator
/// ([`Steps::many`]): an iterator polled one [`Directive`] at a time, with
/// the task suspended between steps.
pub struct Steps {
    generator: Option<Box<dyn Iterator<Item = Directive>>>,
}

// === impl Steps ===

impl Steps {
    /// The call did all of its work inline; the task completes immediately.
    #[must_use]
    pub fn done() -> Self {
        Self { generator: None }
    }

    /// The call produced a step-generator.
    ///
    /// Each `next()` runs the task up to its next suspension and returns
    /// the directive it yields there; returning `None` completes the task.
    #[must_use]
    pub fn many<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = Directive>,
        I::IntoIter: 'static,
    {
        Self {
            generator: Some(Box::new(steps.into_iter())),
        }
    }
}

impl fmt::Debug for Steps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Steps")
            .field("generator", &self.generator.is_some())
            .finish()
    }
}

/// Conversion into [`Steps`], so plain closures can be used as targets.
pub trait IntoSteps {
    fn into_steps(self) -> Steps;
}

impl IntoSteps for Steps {
    fn into_steps(self) -> Steps {
        self
    }
}

/// A target returning `()` completes in a single call.
impl IntoSteps for () {
    fn into_steps(self) -> Steps {
        Steps::done()
    }
}

type Target = Box<dyn FnMut() -> Steps>;
type Generator = Box<dyn Iterator<Item = Directive>>;

/// The outcome of running one task step.
pub(crate) enum Step {
    /// The target completed inline or the generator is exhausted; the task
    /// is now dead.
    Complete,
    /// The step suspended with a directive.
    Yielded(Directive),
}

#[derive(Clone, Copy)]
enum Kind {
    /// Runs as soon as it is started.
    Immediate,
    /// First run is delayed by the interval.
    Delayed(Duration),
    /// Re-enqueued every interval until stopped.
    Periodic(Duration),
}

struct TaskInner {
    name: Option<String>,
    kind: Kind,
    /// Taken out for the duration of a call so the task can observe its own
    /// state from inside the target.
    target: Option<Target>,
    steps: Option<Generator>,
    /// Mirrors the task's key on the timer queue while it is scheduled.
    next_time: Option<Instant>,
    started: bool,
    alive: bool,
    /// Fired exactly when the task transitions to dead.
    exit: Event,
    runtime: Weak<Core>,
}

/// A suspendable unit of work.
///
/// A task wraps a *target*: a call that either completes inline or produces
/// a step-generator (see [`Steps`]). Once [`start`]ed, the scheduler runs
/// the task one step at a time, suspending it between steps according to
/// the directives it yields.
///
/// `Task` is a handle; clones refer to the same task. A task also doubles
/// as something other tasks can wait on: yielding [`Directive::Join`] with
/// a task handle suspends the yielder until that task dies.
///
/// [`start`]: Task::start
#[derive(Clone)]
pub struct Task {
    inner: Rc<RefCell<TaskInner>>,
}

// === impl Task ===

impl Task {
    /// Creates a task that runs `target` once started.
    pub fn new<F, S>(target: F) -> Self
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        Self::build(None, Kind::Immediate, target)
    }

    /// Creates a named task.
    ///
    /// The name shows up in traces and in
    /// [`JoinError::InvalidDirective`].
    pub fn named<F, S>(name: impl Into<String>, target: F) -> Self
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        Self::build(Some(name.into()), Kind::Immediate, target)
    }

    fn build<F, S>(name: Option<String>, kind: Kind, mut target: F) -> Self
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        Self {
            inner: Rc::new(RefCell::new(TaskInner {
                name,
                kind,
                target: Some(Box::new(move || target().into_steps())),
                steps: None,
                next_time: None,
                started: false,
                alive: true,
                exit: Event::new(),
                runtime: Weak::new(),
            })),
        }
    }

    /// A helper synthesized by the scheduler: already started, already
    /// holding a step-generator, runnable at `now`.
    pub(crate) fn detached(
        name: Option<String>,
        generator: Generator,
        runtime: Weak<Core>,
        now: Instant,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TaskInner {
                name,
                kind: Kind::Immediate,
                target: None,
                steps: Some(generator),
                next_time: Some(now),
                started: true,
                alive: true,
                exit: Event::new(),
                runtime,
            })),
        }
    }

    /// Pushes the task onto `runtime`'s timer queue.
    ///
    /// The task becomes runnable now, or after its interval for delayed and
    /// periodic variants.
    ///
    /// # Errors
    ///
    /// Tasks can only be started once; a second call fails with
    /// [`StartError::AlreadyStarted`].
    pub fn start(&self, runtime: &Scheduler) -> Result<(), StartError> {
        if self.inner.borrow().started {
            return Err(StartError::AlreadyStarted);
        }
        self.launch(runtime);
        Ok(())
    }

    /// Whether the task has not yet died.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.borrow().alive
    }

    /// The name given at construction.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.borrow().name.clone()
    }

    /// Drives the runtime until this task dies or `timeout` elapses.
    ///
    /// Returning is not cancellation: on timeout the task stays scheduled
    /// in whatever state it reached.
    ///
    /// # Errors
    ///
    /// 1. [`JoinError::NotStarted`] if the task was never started.
    /// 2. [`JoinError::Stalled`] if the timer queue runs empty while this
    ///    task is still alive.
    /// 3. [`JoinError::InvalidDirective`] if any task yields a directive
    ///    outside the accepted set.
    pub fn join(&self, timeout: Option<Duration>) -> Result<(), JoinError> {
        let runtime = {
            let inner = self.inner.borrow();
            if !inner.started {
                return Err(JoinError::NotStarted);
            }
            inner.runtime.upgrade()
        };

        match runtime {
            Some(core) => Scheduler::from_core(core).drive(Some(self), timeout),
            // The runtime is gone; nothing can drive this task anymore.
            None if self.is_alive() => Err(JoinError::Stalled),
            None => Ok(()),
        }
    }

    /// The event fired when this task dies.
    pub(crate) fn exit_event(&self) -> Event {
        self.inner.borrow().exit.clone()
    }

    pub(crate) fn launch(&self, runtime: &Scheduler) {
        let now = runtime.now();
        let at = {
            let inner = self.inner.borrow();
            match inner.kind {
                Kind::Immediate => now,
                Kind::Delayed(interval) | Kind::Periodic(interval) => now + interval,
            }
        };
        self.launch_at(runtime, at);
    }

    pub(crate) fn launch_at(&self, runtime: &Scheduler, at: Instant) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.started = true;
            inner.runtime = runtime.downgrade();
            inner.next_time = Some(at);
        }
        runtime.schedule(self.clone(), at);
    }

    pub(crate) fn set_next_time(&self, at: Instant) {
        self.inner.borrow_mut().next_time = Some(at);
    }

    /// The re-enqueue interval, for periodic tasks only.
    pub(crate) fn periodic_interval(&self) -> Option<Duration> {
        match self.inner.borrow().kind {
            Kind::Periodic(interval) => Some(interval),
            Kind::Immediate | Kind::Delayed(_) => None,
        }
    }

    /// Runs one step: obtains the step-generator on the first run, then
    /// pulls the next directive. Marks the task dead on completion.
    pub(crate) fn step(&self) -> Step {
        if self.inner.borrow().steps.is_none() {
            let target = self.inner.borrow_mut().target.take();
            let Some(mut target) = target else {
                self.mark_dead();
                return Step::Complete;
            };

            // user code runs with no borrows held
            let produced = target();

            let mut inner = self.inner.borrow_mut();
            if !inner.alive {
                return Step::Complete;
            }
            inner.target = Some(target);
            match produced.generator {
                Some(generator) => inner.steps = Some(generator),
                None => {
                    drop(inner);
                    self.mark_dead();
                    return Step::Complete;
                }
            }
        }

        let steps = self.inner.borrow_mut().steps.take();
        let Some(mut steps) = steps else {
            self.mark_dead();
            return Step::Complete;
        };

        // user code runs inside `next()`, again with no borrows held
        match steps.next() {
            Some(directive) => {
                self.inner.borrow_mut().steps = Some(steps);
                Step::Yielded(directive)
            }
            None => {
                self.mark_dead();
                Step::Complete
            }
        }
    }

    /// One periodic firing: invokes the target once. A step-generator
    /// result becomes a fresh, detached, already-started helper task that
    /// runs independently of the periodic's own schedule.
    pub(crate) fn fire(&self, now: Instant) -> Option<Task> {
        let target = self.inner.borrow_mut().target.take();
        let mut target = target?;

        let produced = target();

        let mut inner = self.inner.borrow_mut();
        // the target may have stopped the task during the call
        if inner.alive {
            inner.target = Some(target);
        }
        let name = inner.name.clone();
        let runtime = inner.runtime.clone();
        drop(inner);

        let generator = produced.generator?;
        Some(Task::detached(name, generator, runtime, now))
    }

    /// Transitions the task to dead and fires its exit event. Idempotent.
    pub(crate) fn mark_dead(&self) {
        let exit = {
            let mut inner = self.inner.borrow_mut();
            if !inner.alive {
                return;
            }
            inner.alive = false;
            inner.target = None;
            inner.steps = None;
            inner.exit.clone()
        };
        tracing::trace!(task = ?self.name(), "task died");
        exit.set();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Task")
            .field("name", &inner.name)
            .field("started", &inner.started)
            .field("alive", &inner.alive)
            .field("next_time", &inner.next_time)
            .finish_non_exhaustive()
    }
}

/// A one-shot task whose first run is delayed by a fixed interval.
///
/// Apart from the delayed first run it behaves exactly like a [`Task`].
#[derive(Clone, Debug)]
pub struct Timer {
    task: Task,
}

// === impl Timer ===

impl Timer {
    /// Creates a timer that runs `target` once, `interval` after start.
    pub fn new<F, S>(interval: Duration, target: F) -> Self
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        Self {
            task: Task::build(None, Kind::Delayed(interval), target),
        }
    }

    /// Creates a named timer.
    pub fn named<F, S>(name: impl Into<String>, interval: Duration, target: F) -> Self
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        Self {
            task: Task::build(Some(name.into()), Kind::Delayed(interval), target),
        }
    }

    /// See [`Task::start`].
    ///
    /// # Errors
    ///
    /// Fails with [`StartError::AlreadyStarted`] on a second call.
    pub fn start(&self, runtime: &Scheduler) -> Result<(), StartError> {
        self.task.start(runtime)
    }

    /// See [`Task::is_alive`].
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.task.is_alive()
    }

    /// See [`Task::join`].
    ///
    /// # Errors
    ///
    /// Same as [`Task::join`].
    pub fn join(&self, timeout: Option<Duration>) -> Result<(), JoinError> {
        self.task.join(timeout)
    }

    /// A plain task handle, e.g. for yielding [`Directive::Join`] against.
    #[must_use]
    pub fn handle(&self) -> Task {
        self.task.clone()
    }

    pub(crate) fn launch(&self, runtime: &Scheduler) {
        self.task.launch(runtime);
    }
}

/// A task re-enqueued at a fixed interval until stopped.
///
/// The periodic is re-enqueued *before* each firing, so its schedule drifts
/// from the original start time rather than from the end of each run. A
/// firing whose target produces a step-generator spawns a detached helper
/// task; the periodic keeps firing on its own schedule regardless of
/// helper progress, so helper runs may overlap.
#[derive(Clone, Debug)]
pub struct Periodic {
    task: Task,
}

// === impl Periodic ===

impl Periodic {
    /// Creates a periodic task firing every `interval` after start.
    pub fn new<F, S>(interval: Duration, target: F) -> Self
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        Self {
            task: Task::build(None, Kind::Periodic(interval), target),
        }
    }

    /// Creates a named periodic task.
    pub fn named<F, S>(name: impl Into<String>, interval: Duration, target: F) -> Self
    where
        F: FnMut() -> S + 'static,
        S: IntoSteps,
    {
        Self {
            task: Task::build(Some(name.into()), Kind::Periodic(interval), target),
        }
    }

    /// See [`Task::start`].
    ///
    /// # Errors
    ///
    /// Fails with [`StartError::AlreadyStarted`] on a second call.
    pub fn start(&self, runtime: &Scheduler) -> Result<(), StartError> {
        self.task.start(runtime)
    }

    /// See [`Task::is_alive`].
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.task.is_alive()
    }

    /// Stops the periodic task.
    ///
    /// Its queue entry stays in the heap and is silently discarded the next
    /// time the scheduler pops it. Stopping an already stopped periodic is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Fails with [`StopError::NotStarted`] before [`start`](Self::start).
    pub fn stop(&self) -> Result<(), StopError> {
        if !self.task.inner.borrow().started {
            return Err(StopError::NotStarted);
        }
        self.task.mark_dead();
        Ok(())
    }

    /// A plain task handle, e.g. for yielding [`Directive::Join`] against.
    #[must_use]
    pub fn handle(&self) -> Task {
        self.task.clone()
    }

    pub(crate) fn launch(&self, runtime: &Scheduler) {
        self.task.launch(runtime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheduler;

    #[test]
    fn starting_twice_fails() {
        let runtime = Scheduler::new();
        let task = Task::new(|| ());

        task.start(&runtime).unwrap();
        assert_eq!(task.start(&runtime), Err(StartError::AlreadyStarted));
    }

    #[test]
    fn joining_before_start_fails() {
        let task = Task::new(|| ());
        assert_eq!(task.join(None), Err(JoinError::NotStarted));
    }

    #[test]
    fn stopping_before_start_fails() {
        let periodic = Periodic::new(Duration::from_millis(10), || ());
        assert_eq!(periodic.stop(), Err(StopError::NotStarted));
    }

    #[test]
    fn name_is_preserved() {
        let task = Task::named("worker", || ());
        assert_eq!(task.name().as_deref(), Some("worker"));

        let anonymous = Task::new(|| ());
        assert_eq!(anonymous.name(), None);
    }

    #[test]
    fn direct_target_completes_after_one_step() {
        let task = Task::new(|| ());
        assert!(task.is_alive());

        assert!(matches!(task.step(), Step::Complete));
        assert!(!task.is_alive());
    }

    #[test]
    fn death_fires_the_exit_event() {
        let task = Task::new(|| ());
        let exit = task.exit_event();
        assert!(!exit.is_set());

        task.mark_dead();
        assert!(exit.is_set());

        // dying is idempotent
        task.mark_dead();
        assert!(!task.is_alive());
    }

    #[test]
    fn generator_target_yields_then_completes() {
        let task = Task::new(|| Steps::many([Directive::Yield]));

        assert!(matches!(task.step(), Step::Yielded(Directive::Yield)));
        assert!(task.is_alive());

        assert!(matches!(task.step(), Step::Complete));
        assert!(!task.is_alive());
    }
}

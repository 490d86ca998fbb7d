// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::time::Duration;

use crate::event::Event;
use crate::task::Task;

/// What a task tells the scheduler when it suspends.
///
/// A step-generator yields one `Directive` per step; the scheduler consumes
/// it and decides when the task becomes runnable again.
#[derive(Clone, Debug)]
pub enum Directive {
    /// Hand the CPU forward and run again as soon as possible.
    Yield,

    /// Run again once the duration has elapsed.
    Sleep(Duration),

    /// Run again once the event fires, or immediately if it already has.
    Wait(Event),

    /// Run again once the task dies.
    ///
    /// Shorthand for waiting on the task's exit event.
    Join(Task),

    /// Run again when the first of the listed waits completes.
    ///
    /// Sleeps fold into a single timeout (the minimum), events and tasks
    /// collect into an event set, and [`Yield`](Directive::Yield) items are
    /// ignored. Nesting another `Any` inside the list is an invalid
    /// directive and is fatal to the scheduler.
    Any(Vec<Directive>),
}

impl From<Duration> for Directive {
    fn from(duration: Duration) -> Self {
        Directive::Sleep(duration)
    }
}

impl From<Event> for Directive {
    fn from(event: Event) -> Self {
        Directive::Wait(event)
    }
}

impl From<&Event> for Directive {
    fn from(event: &Event) -> Self {
        Directive::Wait(event.clone())
    }
}

impl From<Task> for Directive {
    fn from(task: Task) -> Self {
        Directive::Join(task)
    }
}

impl From<&Task> for Directive {
    fn from(task: &Task) -> Self {
        Directive::Join(task.clone())
    }
}

/// Marker for a wait-for-any list that contained another wait-for-any.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct NestedAny;

/// A wait-for-any list folded into its effective parts.
#[derive(Debug)]
pub(crate) struct AnyWait {
    /// The smallest sleep in the list, if it contained any.
    pub(crate) timeout: Option<Duration>,
    /// Every event in the list; tasks contribute their exit event.
    pub(crate) events: Vec<Event>,
}

/// Folds a wait-for-any list.
pub(crate) fn flatten_any(directives: Vec<Directive>) -> Result<AnyWait, NestedAny> {
    let mut timeout: Option<Duration> = None;
    let mut events = Vec::new();

    for directive in directives {
        match directive {
            Directive::Yield => {}
            Directive::Sleep(duration) => {
                timeout = Some(timeout.map_or(duration, |t| t.min(duration)));
            }
            Directive::Wait(event) => events.push(event),
            Directive::Join(task) => events.push(task.exit_event()),
            Directive::Any(_) => return Err(NestedAny),
        }
    }

    Ok(AnyWait { timeout, events })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeps_fold_into_the_minimum_timeout() {
        let any = flatten_any(vec![
            Directive::Sleep(Duration::from_millis(300)),
            Directive::Sleep(Duration::from_millis(100)),
            Directive::Sleep(Duration::from_millis(200)),
        ])
        .unwrap();

        assert_eq!(any.timeout, Some(Duration::from_millis(100)));
        assert!(any.events.is_empty());
    }

    #[test]
    fn yields_are_ignored() {
        let any = flatten_any(vec![Directive::Yield, Directive::Yield]).unwrap();
        assert_eq!(any.timeout, None);
        assert!(any.events.is_empty());
    }

    #[test]
    fn events_and_tasks_collect_into_the_event_set() {
        let event = Event::new();
        let task = Task::new(|| ());
        let exit = task.exit_event();

        let any = flatten_any(vec![
            Directive::Wait(event.clone()),
            Directive::Join(task),
        ])
        .unwrap();

        assert_eq!(any.events.len(), 2);
        assert!(!any.events[0].is_set());
        exit.set();
        assert!(any.events[1].is_set());
    }

    #[test]
    fn nested_any_is_rejected() {
        let folded = flatten_any(vec![Directive::Any(Vec::new())]);
        assert_eq!(folded.unwrap_err(), NestedAny);
    }

    #[test]
    fn conversions_pick_the_matching_variant() {
        assert!(matches!(
            Directive::from(Duration::from_secs(1)),
            Directive::Sleep(_)
        ));
        assert!(matches!(Directive::from(Event::new()), Directive::Wait(_)));
        assert!(matches!(
            Directive::from(Task::new(|| ())),
            Directive::Join(_)
        ));
    }
}

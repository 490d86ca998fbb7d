// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

pub(crate) type Callback = Box<dyn FnOnce()>;

/// A one-shot latch with an ordered list of deferred callbacks.
///
/// An `Event` starts unset and becomes set exactly once. Tasks wait on an
/// event by yielding [`Directive::Wait`]; the scheduler parks them in the
/// event's subscriber list, and [`set`] moves them back onto the timer
/// queue in subscription order.
///
/// Cloning an `Event` clones the handle; all clones observe the same latch.
///
/// [`Directive::Wait`]: crate::Directive::Wait
/// [`set`]: Event::set
#[derive(Clone)]
pub struct Event {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    set: bool,
    subscribers: Vec<Callback>,
}

// === impl Event ===

impl Event {
    /// Creates a new, unset event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                set: false,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Returns `true` once [`set`](Self::set) has been called.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.borrow().set
    }

    /// Fires the event.
    ///
    /// The first call flips the latch and runs every subscriber in
    /// subscription order, exactly once. Later calls are no-ops. The latch
    /// flips before the drain, so a subscriber that re-entrantly subscribes
    /// runs inline and a re-entrant `set` observes the event already set.
    pub fn set(&self) {
        let drained = {
            let mut inner = self.inner.borrow_mut();
            if inner.set {
                return;
            }
            inner.set = true;
            mem::take(&mut inner.subscribers)
        };
        tracing::trace!(subscribers = drained.len(), "event set");
        for callback in drained {
            callback();
        }
    }

    /// Runs `callback` when the event fires, or immediately if it already
    /// has. Subscribing the same callback twice runs it twice.
    pub(crate) fn subscribe(&self, callback: Callback) {
        if self.is_set() {
            callback();
            return;
        }
        self.inner.borrow_mut().subscribers.push(callback);
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Event")
            .field("set", &inner.set)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        let event = Event::new();
        assert!(!event.is_set());
    }

    #[test]
    fn set_is_monotonic() {
        let event = Event::new();
        event.set();
        assert!(event.is_set());
        event.set();
        assert!(event.is_set());
    }

    #[test]
    fn subscribers_run_in_subscription_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let event = Event::new();

        for i in 0..3 {
            let order = order.clone();
            event.subscribe(Box::new(move || order.borrow_mut().push(i)));
        }

        assert!(order.borrow().is_empty());
        event.set();
        assert_eq!(*order.borrow(), [0, 1, 2]);
    }

    #[test]
    fn subscribing_after_set_runs_inline() {
        let ran = Rc::new(RefCell::new(false));
        let event = Event::new();
        event.set();

        let flag = ran.clone();
        event.subscribe(Box::new(move || *flag.borrow_mut() = true));
        assert!(*ran.borrow());
    }

    #[test]
    fn second_set_does_not_rerun_subscribers() {
        let count = Rc::new(RefCell::new(0));
        let event = Event::new();

        let counter = count.clone();
        event.subscribe(Box::new(move || *counter.borrow_mut() += 1));

        event.set();
        event.set();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn reentrant_subscribe_during_drain_runs_inline() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let event = Event::new();

        let reentrant = event.clone();
        let outer = order.clone();
        event.subscribe(Box::new(move || {
            outer.borrow_mut().push(1);
            let inner = outer.clone();
            reentrant.subscribe(Box::new(move || inner.borrow_mut().push(2)));
            outer.borrow_mut().push(3);
        }));

        event.set();
        assert_eq!(*order.borrow(), [1, 2, 3]);
    }

    #[test]
    fn reentrant_set_during_drain_is_a_noop() {
        let count = Rc::new(RefCell::new(0));
        let event = Event::new();

        let reentrant = event.clone();
        let counter = count.clone();
        event.subscribe(Box::new(move || {
            *counter.borrow_mut() += 1;
            reentrant.set();
        }));

        event.set();
        assert_eq!(*count.borrow(), 1);
    }
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! # A single-threaded cooperative task runtime.
//!
//! Tasks are units of work that voluntarily suspend themselves by yielding
//! [`Directive`]s: hand the CPU forward, sleep for a duration, wait for an
//! [`Event`], wait for another [`Task`] to die, or wait for the first of a
//! collection of those. The [`Scheduler`] interleaves every task on one
//! thread: it keeps a time-ordered queue, pops the earliest task, sleeps
//! until its wake-up time, runs exactly one step, and interprets the
//! yielded directive.
//!
//! There is no parallelism and no preemption. A task runs until it yields,
//! and the scheduler, its tasks, and its events must all stay on the thread
//! that created them.
//!
//! A task's *target* either completes inline (a plain `()`-returning
//! closure) or produces a step-generator: any iterator of directives,
//! wrapped in [`Steps::many`]. Each `next()` call runs the task up to its
//! next suspension.
//!
//! ## Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use coop_rt::{Directive, Scheduler, Steps};
//!
//! let runtime = Scheduler::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let writer = log.clone();
//! runtime.spawn(move || {
//!     let writer = writer.clone();
//!     let mut step = 0;
//!     Steps::many(std::iter::from_fn(move || {
//!         step += 1;
//!         match step {
//!             1 => {
//!                 writer.borrow_mut().push("hello");
//!                 Some(Directive::Sleep(Duration::from_millis(10)))
//!             }
//!             _ => {
//!                 writer.borrow_mut().push("world");
//!                 None
//!             }
//!         }
//!     }))
//! });
//!
//! runtime.join(None).unwrap();
//! assert_eq!(*log.borrow(), ["hello", "world"]);
//! ```
//!
//! The free functions [`spawn`], [`delay`], [`every`], [`join`] and
//! [`clear`] bind to a per-thread default runtime for programs that do not
//! need an explicit [`Scheduler`] value.

mod directive;
mod error;
mod event;
mod queue;
mod scheduler;
mod task;
pub mod time;

#[cfg(test)]
mod test_util;

pub use directive::Directive;
pub use error::{JoinError, StartError, StopError};
pub use event::Event;
pub use scheduler::{Scheduler, clear, delay, every, join, runtime, spawn};
pub use task::{IntoSteps, Periodic, Steps, Task, Timer};

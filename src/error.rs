// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

/// Error returned by [`Task::start`](crate::Task::start).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum StartError {
    /// Tasks can only be started once.
    AlreadyStarted,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::AlreadyStarted => f.write_str("tasks can only be started once"),
        }
    }
}

impl core::error::Error for StartError {}

/// Error returned by [`Periodic::stop`](crate::Periodic::stop).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum StopError {
    /// The periodic task has not been started yet.
    NotStarted,
}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopError::NotStarted => {
                f.write_str("cannot stop a periodic task before it is started")
            }
        }
    }
}

impl core::error::Error for StopError {}

/// Error returned by [`Task::join`](crate::Task::join) and
/// [`Scheduler::join`](crate::Scheduler::join).
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum JoinError {
    /// The task has not been started yet.
    NotStarted,

    /// The timer queue ran empty while the joined task was still alive, so
    /// the runtime cannot make progress.
    Stalled,

    /// A task yielded a directive outside the accepted set.
    ///
    /// This is fatal to the scheduler rather than being quietly dropped;
    /// a silently discarded task would be undiagnosable.
    InvalidDirective {
        /// Name of the offending task, if it has one.
        task: Option<String>,
    },
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::NotStarted => f.write_str("cannot join a task before it is started"),
            JoinError::Stalled => {
                f.write_str("runtime stalled: no scheduled tasks left to drive the join")
            }
            JoinError::InvalidDirective { task: Some(name) } => {
                write!(f, "task {name:?} yielded an invalid directive")
            }
            JoinError::InvalidDirective { task: None } => {
                f.write_str("a task yielded an invalid directive")
            }
        }
    }
}

impl core::error::Error for JoinError {}

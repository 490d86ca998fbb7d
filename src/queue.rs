// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::task::Task;

/// An entry in the timer queue: a task and the instant it becomes runnable.
pub(crate) struct Entry {
    pub(crate) at: Instant,
    /// Strictly increasing insertion tiebreaker. Entries with equal wake-up
    /// times must pop in insertion order.
    seq: u64,
    pub(crate) task: Task,
}

// === impl Entry ===

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of scheduled tasks keyed by wake-up time.
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

// === impl TimerQueue ===

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `task` to run at `at`, behind earlier insertions with the
    /// same wake-up time.
    pub(crate) fn push(&mut self, task: Task, at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry { at, seq, task }));
    }

    /// Pops the earliest entry.
    pub(crate) fn pop(&mut self) -> Option<Entry> {
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    /// Puts back an entry taken with [`pop`](Self::pop), keeping its
    /// original position relative to entries with the same wake-up time.
    pub(crate) fn restore(&mut self, entry: Entry) {
        self.heap.push(Reverse(entry));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(name: &str) -> Task {
        Task::named(name, || ())
    }

    #[test]
    fn pops_in_time_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        queue.push(task("late"), now + Duration::from_millis(200));
        queue.push(task("early"), now);
        queue.push(task("middle"), now + Duration::from_millis(100));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|entry| entry.task.name().unwrap())
            .collect();
        assert_eq!(order, ["early", "middle", "late"]);
    }

    #[test]
    fn equal_times_pop_in_insertion_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        for name in ["a", "b", "c", "d"] {
            queue.push(task(name), now);
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|entry| entry.task.name().unwrap())
            .collect();
        assert_eq!(order, ["a", "b", "c", "d"]);
    }

    #[test]
    fn restore_keeps_the_original_position() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        queue.push(task("first"), now);
        queue.push(task("second"), now);

        let entry = queue.pop().unwrap();
        assert_eq!(entry.task.name().unwrap(), "first");
        queue.restore(entry);

        assert_eq!(queue.pop().unwrap().task.name().unwrap(), "first");
        assert_eq!(queue.pop().unwrap().task.name().unwrap(), "second");
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut queue = TimerQueue::new();
        queue.push(task("a"), Instant::now());
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}

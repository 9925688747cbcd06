//! Task id generation
//!
//! Every request carries a task id that the robot echoes in everything it sends
//! back for that request. Ids are 16 bits on the wire; the counter wraps from
//! 65535 back to 1 and never hands out 0, which the firmware reserves for
//! "no task". After a wrap an id can collide with a request that is still in
//! flight from 65535 requests ago.

use std::sync::atomic::{AtomicU16, Ordering};

/// Correlation id carried by every request and response
pub type TaskId = u16;

static GLOBAL: TaskIdSource = TaskIdSource::new();

/// Monotonic, thread-safe task id counter
#[derive(Debug)]
pub struct TaskIdSource {
    next: AtomicU16,
}

impl TaskIdSource {
    /// Create a counter whose first id is 1
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a counter whose first id is `first` (0 is bumped to 1)
    pub const fn starting_at(first: TaskId) -> Self {
        let first = if first == 0 { 1 } else { first };
        Self {
            next: AtomicU16::new(first),
        }
    }

    /// Process-wide source used by the [`Request`](super::Request) builders
    pub fn global() -> &'static TaskIdSource {
        &GLOBAL
    }

    /// Take the next id
    pub fn next(&self) -> TaskId {
        let previous = self.next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
            Some(if id == TaskId::MAX { 1 } else { id + 1 })
        });
        // fetch_update only fails if the closure returns None
        match previous {
            Ok(id) | Err(id) => id,
        }
    }

    /// The id the next call to [`next`](Self::next) will return
    pub fn peek(&self) -> TaskId {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for TaskIdSource {
    fn default() -> Self {
        Self::new()
    }
}

//! Timer events and their time-ordered queue

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use thread_pool::Job;

/// Identifier returned by [`TimerThread::schedule`](crate::TimerThread::schedule)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub(crate) u64);

impl EventId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When a scheduled job becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Relative to the moment the event is scheduled
    Relative(Duration),
    /// Wall-clock time; times in the past are due immediately
    Absolute(SystemTime),
}

impl Timeout {
    /// Convert to a monotonic due time
    pub(crate) fn due_at(self, now: Instant) -> Instant {
        match self {
            Timeout::Relative(delay) => now + delay,
            Timeout::Absolute(at) => match at.duration_since(SystemTime::now()) {
                Ok(remaining) => now + remaining,
                Err(_) => now,
            },
        }
    }
}

/// How a due job is handed to the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Persistence {
    /// Queued like any other job
    #[default]
    ShortTerm,
    /// Given a dedicated worker through the persistent slot
    Persistent,
}

pub(crate) struct TimerEvent {
    pub id: EventId,
    pub due: Instant,
    pub persistence: Persistence,
    pub job: Job,
}

/// Events in ascending due order; equal due times keep insertion order
#[derive(Default)]
pub(crate) struct EventQueue {
    events: VecDeque<TimerEvent>,
}

impl EventQueue {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn insert(&mut self, event: TimerEvent) {
        let position = self.events.partition_point(|queued| queued.due <= event.due);
        self.events.insert(position, event);
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.events.front().map(|event| event.due)
    }

    pub fn pop_due(&mut self, now: Instant) -> Option<TimerEvent> {
        if self.next_due()? <= now {
            self.events.pop_front()
        } else {
            None
        }
    }

    pub fn remove(&mut self, id: EventId) -> Option<TimerEvent> {
        let position = self.events.iter().position(|event| event.id == id)?;
        self.events.remove(position)
    }

    pub fn drain(&mut self) -> Vec<TimerEvent> {
        self.events.drain(..).collect()
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<u64> {
        self.events.iter().map(|event| event.id.0).collect()
    }
}

//! Priority queues backed by a job arena
//!
//! Jobs live in a map keyed by [`JobId`]; the three FIFO queues only hold
//! ids. Removal by id is a map lookup plus a scan of one queue.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::job::{Job, JobId, JobPriority};

const PRIORITIES: [JobPriority; 3] = [JobPriority::High, JobPriority::Med, JobPriority::Low];

/// A job moved to a higher queue, reported for wait-time accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bumped {
    pub from: JobPriority,
    pub waited: Duration,
}

#[derive(Default)]
pub(crate) struct JobQueues {
    arena: HashMap<JobId, Job>,
    order: [VecDeque<JobId>; 3],
}

impl JobQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn len_of(&self, priority: JobPriority) -> usize {
        self.order[priority.queue_index()].len()
    }

    /// Append a job that already carries its id and resolved priority
    pub fn push(&mut self, id: JobId, priority: JobPriority, mut job: Job, queued_at: Instant) {
        job.id = Some(id);
        job.queued_at = Some(queued_at);
        job.set_priority(priority);
        self.order[priority.queue_index()].push_back(id);
        self.arena.insert(id, job);
    }

    /// Take the head of the highest non-empty queue
    pub fn pop_next(&mut self) -> Option<(JobPriority, Job)> {
        for priority in PRIORITIES {
            while let Some(id) = self.order[priority.queue_index()].pop_front() {
                if let Some(job) = self.arena.remove(&id) {
                    return Some((priority, job));
                }
            }
        }
        None
    }

    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.arena.remove(&id)?;
        for queue in &mut self.order {
            if let Some(position) = queue.iter().position(|queued| *queued == id) {
                queue.remove(position);
                break;
            }
        }
        Some(job)
    }

    /// Promote starving queue heads
    ///
    /// A Med head that waited at least `starvation_time` moves to the tail of
    /// High; a Low head that waited at least `max_idle_time` moves to the tail
    /// of Med. Repeats until neither holds. Wait is measured from the
    /// original enqueue time.
    pub fn bump(
        &mut self,
        now: Instant,
        starvation_time: Duration,
        max_idle_time: Duration,
    ) -> Vec<Bumped> {
        let mut bumped = Vec::new();
        loop {
            if let Some(waited) = self.head_wait(JobPriority::Med, now) {
                if waited >= starvation_time {
                    self.promote(JobPriority::Med, JobPriority::High);
                    bumped.push(Bumped { from: JobPriority::Med, waited });
                    continue;
                }
            }
            if let Some(waited) = self.head_wait(JobPriority::Low, now) {
                if waited >= max_idle_time {
                    self.promote(JobPriority::Low, JobPriority::Med);
                    bumped.push(Bumped { from: JobPriority::Low, waited });
                    continue;
                }
            }
            break;
        }
        bumped
    }

    /// Empty every queue, High first, FIFO within a queue
    pub fn drain(&mut self) -> Vec<Job> {
        let mut drained = Vec::with_capacity(self.arena.len());
        while let Some((_, job)) = self.pop_next() {
            drained.push(job);
        }
        drained
    }

    fn head_wait(&self, priority: JobPriority, now: Instant) -> Option<Duration> {
        let id = self.order[priority.queue_index()].front()?;
        let queued_at = self.arena.get(id)?.queued_at?;
        Some(now.saturating_duration_since(queued_at))
    }

    fn promote(&mut self, from: JobPriority, to: JobPriority) {
        if let Some(id) = self.order[from.queue_index()].pop_front() {
            if let Some(job) = self.arena.get_mut(&id) {
                job.set_priority(to);
            }
            self.order[to.queue_index()].push_back(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const STARVE: Duration = Duration::from_millis(500);
    const IDLE: Duration = Duration::from_millis(10_000);

    fn queues_with(entries: &[(u64, JobPriority, Duration)], now: Instant) -> JobQueues {
        let mut queues = JobQueues::new();
        for (id, priority, age) in entries {
            queues.push(JobId(*id), *priority, Job::new(|| {}), now - *age);
        }
        queues
    }

    fn drain_ids(queues: &mut JobQueues) -> Vec<u64> {
        queues
            .drain()
            .into_iter()
            .filter_map(|job| job.id().map(JobId::as_u64))
            .collect()
    }

    #[test]
    fn test_pop_prefers_high_then_med_then_low() {
        let now = Instant::now();
        let mut queues = queues_with(
            &[
                (0, JobPriority::Low, Duration::ZERO),
                (1, JobPriority::Med, Duration::ZERO),
                (2, JobPriority::High, Duration::ZERO),
            ],
            now,
        );
        assert_eq!(drain_ids(&mut queues), vec![2, 1, 0]);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_fifo_within_priority() {
        let now = Instant::now();
        let mut queues = queues_with(
            &[
                (0, JobPriority::Med, Duration::ZERO),
                (1, JobPriority::Med, Duration::ZERO),
                (2, JobPriority::Med, Duration::ZERO),
            ],
            now,
        );
        assert_eq!(drain_ids(&mut queues), vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_by_id() {
        let now = Instant::now();
        let mut queues = queues_with(
            &[
                (0, JobPriority::Med, Duration::ZERO),
                (1, JobPriority::Low, Duration::ZERO),
            ],
            now,
        );

        let removed = queues.remove(JobId(1)).unwrap();
        assert_eq!(removed.id(), Some(JobId(1)));
        assert!(queues.remove(JobId(1)).is_none());
        assert_eq!(queues.len(), 1);
        assert_eq!(queues.len_of(JobPriority::Low), 0);
    }

    #[test]
    fn test_fresh_jobs_are_not_bumped() {
        let now = Instant::now();
        let mut queues = queues_with(
            &[
                (0, JobPriority::Low, Duration::ZERO),
                (1, JobPriority::Med, Duration::ZERO),
            ],
            now,
        );
        assert!(queues.bump(now, STARVE, IDLE).is_empty());
        assert_eq!(queues.len_of(JobPriority::Low), 1);
        assert_eq!(queues.len_of(JobPriority::Med), 1);
    }

    #[test]
    fn test_starving_med_moves_to_high() {
        let now = Instant::now();
        let mut queues = queues_with(
            &[
                (0, JobPriority::High, Duration::ZERO),
                (1, JobPriority::Med, STARVE),
                (2, JobPriority::Med, Duration::from_millis(10)),
            ],
            now,
        );

        let bumped = queues.bump(now, STARVE, IDLE);
        assert_eq!(bumped.len(), 1);
        assert_eq!(bumped[0].from, JobPriority::Med);
        assert_eq!(queues.len_of(JobPriority::High), 2);
        // the bumped job queues behind the existing High job
        assert_eq!(drain_ids(&mut queues), vec![0, 1, 2]);
    }

    #[test]
    fn test_low_past_idle_moves_to_med_only() {
        let now = Instant::now();
        let long_starve = Duration::from_secs(60);
        let mut queues = queues_with(&[(0, JobPriority::Low, IDLE)], now);

        let bumped = queues.bump(now, long_starve, IDLE);
        assert_eq!(bumped, vec![Bumped { from: JobPriority::Low, waited: IDLE }]);
        assert_eq!(queues.len_of(JobPriority::Med), 1);
        assert_eq!(queues.len_of(JobPriority::High), 0);
    }

    #[test]
    fn test_long_waiting_low_climbs_to_high() {
        let now = Instant::now();
        let mut queues = queues_with(&[(0, JobPriority::Low, IDLE)], now);

        let bumped = queues.bump(now, STARVE, IDLE);
        assert_eq!(bumped.len(), 2);
        assert_eq!(queues.len_of(JobPriority::High), 1);
    }

    #[rstest]
    #[case(JobPriority::High, 0)]
    #[case(JobPriority::Med, 1)]
    #[case(JobPriority::Low, 2)]
    fn test_queue_index(#[case] priority: JobPriority, #[case] index: usize) {
        assert_eq!(priority.queue_index(), index);
    }
}

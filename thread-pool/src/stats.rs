//! Pool statistics

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::job::JobPriority;

/// Snapshot of pool activity returned by [`ThreadPool::stats`](crate::ThreadPool::stats)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub high_jobs_pending: usize,
    pub med_jobs_pending: usize,
    pub low_jobs_pending: usize,
    /// Average queue wait in milliseconds, per priority
    pub avg_wait_high_ms: f64,
    pub avg_wait_med_ms: f64,
    pub avg_wait_low_ms: f64,
    /// Jobs accounted per priority (picked up or bumped out of the queue)
    pub total_jobs_high: u64,
    pub total_jobs_med: u64,
    pub total_jobs_low: u64,
    pub worker_threads: usize,
    pub idle_threads: usize,
    pub persistent_threads: usize,
    pub busy_threads: usize,
    pub total_threads: usize,
    /// Highest `total_threads` seen over the pool's lifetime
    pub max_threads: usize,
    /// Cumulative seconds workers spent running jobs
    pub total_work_time: f64,
    /// Cumulative seconds workers spent waiting for jobs
    pub total_idle_time: f64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "High Jobs pending: {}", self.high_jobs_pending)?;
        writeln!(f, "Med Jobs Pending: {}", self.med_jobs_pending)?;
        writeln!(f, "Low Jobs Pending: {}", self.low_jobs_pending)?;
        writeln!(f, "Average Wait in High Priority Q in milliseconds: {:.3}", self.avg_wait_high_ms)?;
        writeln!(f, "Average Wait in Med Priority Q in milliseconds: {:.3}", self.avg_wait_med_ms)?;
        writeln!(f, "Average Wait in Low Priority Q in milliseconds: {:.3}", self.avg_wait_low_ms)?;
        writeln!(f, "Max Threads Active: {}", self.max_threads)?;
        writeln!(f, "Current Worker Threads: {}", self.worker_threads)?;
        writeln!(f, "Current Persistent Threads: {}", self.persistent_threads)?;
        writeln!(f, "Current Idle Threads: {}", self.idle_threads)?;
        writeln!(f, "Current Busy Threads: {}", self.busy_threads)?;
        writeln!(f, "Total Threads: {}", self.total_threads)?;
        writeln!(f, "Total Work Time: {:.3}", self.total_work_time)?;
        write!(f, "Total Idle Time: {:.3}", self.total_idle_time)
    }
}

/// Running totals kept under the pool lock
#[derive(Debug, Default)]
pub(crate) struct StatsAccumulator {
    wait_total: [Duration; 3],
    jobs_total: [u64; 3],
    pub worker_threads: usize,
    pub idle_threads: usize,
    pub persistent_threads: usize,
    pub max_threads: usize,
    pub work_time: Duration,
    pub idle_time: Duration,
}

impl StatsAccumulator {
    pub fn account_wait(&mut self, priority: JobPriority, waited: Duration) {
        let index = priority.queue_index();
        self.wait_total[index] += waited;
        self.jobs_total[index] += 1;
    }

    pub fn note_thread_count(&mut self, total_threads: usize) {
        self.max_threads = self.max_threads.max(total_threads);
    }

    fn average_ms(&self, priority: JobPriority) -> f64 {
        let index = priority.queue_index();
        match self.jobs_total[index] {
            0 => 0.0,
            jobs => self.wait_total[index].as_secs_f64() * 1000.0 / jobs as f64,
        }
    }

    pub fn snapshot(&self, pending: [usize; 3], busy_threads: usize, total_threads: usize) -> PoolStats {
        PoolStats {
            high_jobs_pending: pending[0],
            med_jobs_pending: pending[1],
            low_jobs_pending: pending[2],
            avg_wait_high_ms: self.average_ms(JobPriority::High),
            avg_wait_med_ms: self.average_ms(JobPriority::Med),
            avg_wait_low_ms: self.average_ms(JobPriority::Low),
            total_jobs_high: self.jobs_total[0],
            total_jobs_med: self.jobs_total[1],
            total_jobs_low: self.jobs_total[2],
            worker_threads: self.worker_threads,
            idle_threads: self.idle_threads,
            persistent_threads: self.persistent_threads,
            busy_threads,
            total_threads,
            max_threads: self.max_threads,
            total_work_time: self.work_time.as_secs_f64(),
            total_idle_time: self.idle_time.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_wait() {
        let mut acc = StatsAccumulator::default();
        acc.account_wait(JobPriority::High, Duration::from_millis(10));
        acc.account_wait(JobPriority::High, Duration::from_millis(30));
        acc.account_wait(JobPriority::Low, Duration::from_millis(5));

        let stats = acc.snapshot([0, 0, 0], 0, 0);
        assert!((stats.avg_wait_high_ms - 20.0).abs() < 1e-6);
        assert_eq!(stats.avg_wait_med_ms, 0.0);
        assert!((stats.avg_wait_low_ms - 5.0).abs() < 1e-6);
        assert_eq!(stats.total_jobs_high, 2);
        assert_eq!(stats.total_jobs_low, 1);
    }

    #[test]
    fn test_high_water_mark() {
        let mut acc = StatsAccumulator::default();
        acc.note_thread_count(3);
        acc.note_thread_count(1);
        assert_eq!(acc.max_threads, 3);
    }

    #[test]
    fn test_display_and_serialize() {
        let stats = PoolStats {
            high_jobs_pending: 2,
            total_threads: 4,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("High Jobs pending: 2"));
        assert!(text.contains("Total Threads: 4"));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["high_jobs_pending"], 2);
    }
}

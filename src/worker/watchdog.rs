//! Per-job deadline tracking.
//!
//! The watchdog only keeps deadlines. The supervisor polls it from its own
//! loop and kills overdue workers, so pool state keeps a single owner. The
//! kill surfaces as an ordinary worker exit, and the retry policy handles it
//! like any other crash.

use crate::queue::JobId;
use crate::waiting::WorkerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Upper bound on how often the supervisor checks deadlines.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lower bound, so tiny timeouts don't turn into a busy loop.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
struct Armed {
    job_id: JobId,
    deadline: Instant,
}

/// Tracks one deadline per busy worker.
#[derive(Debug)]
pub struct JobWatchdog {
    timeout: Duration,
    armed: HashMap<WorkerId, Armed>,
}

impl JobWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            armed: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How often the owner should call [`JobWatchdog::expired`].
    pub fn poll_interval(timeout: Duration) -> Duration {
        (timeout / 4).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
    }

    /// Start the clock for `job_id` on `worker`, replacing any previous deadline.
    pub fn arm(&mut self, worker: WorkerId, job_id: JobId, now: Instant) {
        self.armed.insert(
            worker,
            Armed {
                job_id,
                deadline: now + self.timeout,
            },
        );
    }

    pub fn disarm(&mut self, worker: WorkerId) -> bool {
        self.armed.remove(&worker).is_some()
    }

    /// Remove and return every worker whose deadline has passed, ordered by id.
    pub fn expired(&mut self, now: Instant) -> Vec<(WorkerId, JobId)> {
        let mut overdue: Vec<_> = self
            .armed
            .iter()
            .filter(|(_, armed)| armed.deadline <= now)
            .map(|(worker, armed)| (*worker, armed.job_id))
            .collect();
        overdue.sort();
        for (worker, _) in &overdue {
            self.armed.remove(worker);
        }
        overdue
    }

    pub fn clear(&mut self) {
        self.armed.clear();
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

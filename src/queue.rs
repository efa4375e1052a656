//! FIFO job queue.
//!
//! The queue is the authoritative home of every job that is neither in flight
//! nor settled. Retried jobs are appended at the tail, so they never overtake
//! fresh work.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Identifier assigned to a job when it is first enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of work tracked by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque arguments forwarded to the worker handler.
    pub payload: serde_json::Value,
    /// Number of workers that exited while holding this job.
    pub failure_count: u32,
}

impl Job {
    /// Create a fresh job with no recorded failures.
    pub fn new(id: JobId, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            failure_count: 0,
        }
    }
}

/// Ordered collection of pending jobs.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job at the tail, keeping its failure count.
    pub fn enqueue(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Remove and return the head job, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Pending jobs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }
}

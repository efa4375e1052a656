//! Retry policy for jobs whose worker exited mid-execution.

use crate::queue::Job;

/// Default number of attempts before a job is declared failed.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Outcome of a crash for the job that was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the job back at the tail of the queue.
    Requeue,
    /// The job reached the threshold and is dropped.
    GiveUp,
}

/// Bounds how many times a job may be attempted.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    failure_threshold: u32,
}

impl RetryPolicy {
    /// `failure_threshold` is clamped to at least one attempt.
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Record a crash against `job` and decide what happens to it.
    pub fn on_crash(&self, job: &mut Job) -> RetryDecision {
        job.failure_count = job.failure_count.saturating_add(1);
        if job.failure_count >= self.failure_threshold {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Requeue
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobId;
    use serde_json::json;

    #[test]
    fn test_default_threshold_allows_one_retry() {
        let policy = RetryPolicy::default();
        let mut job = Job::new(JobId(1), json!("x"));

        assert_eq!(policy.on_crash(&mut job), RetryDecision::Requeue);
        assert_eq!(job.failure_count, 1);
        assert_eq!(policy.on_crash(&mut job), RetryDecision::GiveUp);
        assert_eq!(job.failure_count, 2);
    }

    #[test]
    fn test_threshold_one_gives_up_immediately() {
        let policy = RetryPolicy::new(1);
        let mut job = Job::new(JobId(5), json!(5));
        assert_eq!(policy.on_crash(&mut job), RetryDecision::GiveUp);
        assert_eq!(job.failure_count, 1);
    }

    #[test]
    fn test_failure_count_never_exceeds_threshold() {
        for threshold in 1..=5 {
            let policy = RetryPolicy::new(threshold);
            let mut job = Job::new(JobId(1), json!(null));
            let mut attempts = 0;
            loop {
                attempts += 1;
                if policy.on_crash(&mut job) == RetryDecision::GiveUp {
                    break;
                }
            }
            assert_eq!(attempts, threshold);
            assert_eq!(job.failure_count, threshold);
        }
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.failure_threshold(), 1);
    }
}

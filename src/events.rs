//! Lifecycle events reported to the pool's owner.

use crate::queue::Job;
use crate::waiting::WorkerId;
use crate::worker::signals::TerminationReason;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;

/// Something that happened in the pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    /// A job settled, either completed or permanently failed.
    JobEnded {
        done_count: u64,
        failed_count: u64,
        job: Job,
        success: bool,
    },
    /// A worker process exited unexpectedly. `job` is what it was running.
    WorkerDied {
        worker: WorkerId,
        reason: TerminationReason,
        exit_code: Option<i32>,
        done_count: u64,
        job: Option<Job>,
    },
    /// An application message from a worker, forwarded verbatim.
    JobMessage {
        worker: WorkerId,
        message: serde_json::Value,
        done_count: u64,
    },
    /// The queue is empty and nothing is in flight.
    AllJobsEnded { done_count: u64 },
}

impl PoolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobEnded { .. } => "job_ended",
            Self::WorkerDied { .. } => "worker_died",
            Self::JobMessage { .. } => "job_message",
            Self::AllJobsEnded { .. } => "all_jobs_ended",
        }
    }

    pub fn is_drained(&self) -> bool {
        matches!(self, Self::AllJobsEnded { .. })
    }

    /// `Some(success)` for a settled job.
    pub fn job_outcome(&self) -> Option<bool> {
        match self {
            Self::JobEnded { success, .. } => Some(*success),
            _ => None,
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("PoolEvent serialization should never fail")
    }
}

/// Sending half of the event stream. Events are dropped once the owner
/// has stopped listening.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<PoolEvent>,
}

impl EventSink {
    pub fn emit(&self, event: PoolEvent) {
        tracing::trace!(event = event.name(), "Emitting event");
        let _ = self.tx.send(event);
    }
}

/// Create a connected sink and receiver.
pub fn channel() -> (EventSink, Receiver<PoolEvent>) {
    let (tx, rx) = unbounded();
    (EventSink { tx }, rx)
}

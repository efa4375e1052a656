//! Fork supervisor: a pool of reusable worker processes.
//!
//! [`ForkPool`] is the caller's handle. It forwards commands to a single
//! supervisor thread, which owns all scheduling state in `PoolCore` and
//! also receives every worker's messages and exit.

mod core;
mod supervisor;
mod transport;

pub use supervisor::ForkPool;

use serde::Serialize;

/// Point-in-time snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub running: bool,
    pub live_workers: usize,
    /// Stopped workers whose exit has not been seen yet.
    pub stopping_workers: usize,
    pub parked_workers: usize,
    pub queued_jobs: usize,
    pub in_flight_jobs: usize,
    /// Completed jobs since the last `start()`.
    pub done_count: u64,
    /// Permanently failed jobs since the last `start()`.
    pub failed_count: u64,
    /// Jobs in flight when the pool was stopped.
    pub abandoned_count: u64,
    /// Replacement workers launched after an exit.
    pub restarts: u64,
}

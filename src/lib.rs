//! forkq - a process-pool job scheduler.
//!
//! Jobs are spread across a fixed-size pool of reusable worker processes.
//! A crashed worker is replaced and its job retried up to a failure
//! threshold. Progress is reported as [`PoolEvent`]s.
//!
//! The supervisor side is [`ForkPool`]. A worker program calls
//! [`worker::register_handler`] first thing, in whatever mode its
//! [`WorkerEntry`] selects.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod waiting;
pub mod worker;

pub use config::{IdlePolicy, PoolConfig};
pub use error::{PoolError, Result};
pub use events::PoolEvent;
pub use pool::{ForkPool, PoolStats};
pub use queue::{Job, JobId};
pub use waiting::WorkerId;
pub use worker::{Completion, Handler, Outbox, TerminationReason, WorkerEntry, register_handler};

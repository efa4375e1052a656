//! Worker processes and the protocol they speak.
//!
//! Both sides of the pipe live here. The supervisor side spawns workers,
//! writes assignments and watches for exits. The worker side
//! ([`register_handler`]) runs a handler for each job it is given.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────┐
//!                     │    Supervisor    │
//!                     │ (forkq-supervisor│
//!                     │     thread)      │
//!                     └────────┬─────────┘
//!                  stdin ▲     │      ▲ WorkerEvent
//!               ┌────────┼─────┼──────┼────────┐
//!               │        │     │      │        │
//!         ┌─────▼─────┐  │ ┌───▼──────┴┐ ┌─────▼─────┐
//!         │ Worker 1  │  │ │ Worker 2  │ │ Worker N  │
//!         │ (process) │──┘ │ (process) │ │ (process) │
//!         └─────┬─────┘    └─────┬─────┘ └─────┬─────┘
//!               │ stdout         │             │
//!         ┌─────▼─────┐    ┌─────▼─────┐ ┌─────▼─────┐
//!         │ watcher 1 │    │ watcher 2 │ │ watcher N │
//!         └───────────┘    └───────────┘ └───────────┘
//! ```
//!
//! Each watcher thread forwards its worker's stdout lines and then the
//! worker's exit status, in that order.

pub mod bootstrap;
pub mod ipc;
pub mod proc;
pub mod protocol;
pub mod signals;
pub mod spawn;
pub mod watchdog;

pub use bootstrap::{Completion, Handler, HandlerError, Outbox, register_handler, serve};
pub use protocol::{SupervisorMessage, WorkerControl, WorkerMessage};
pub use signals::TerminationReason;
pub use spawn::{WorkerEntry, WorkerEvent, WorkerSignal, spawn_worker};

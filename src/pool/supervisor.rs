//! The supervisor thread and the public pool handle.

use super::PoolStats;
use super::core::PoolCore;
use super::transport::ProcessTransport;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::events::{self, PoolEvent};
use crate::queue::{Job, JobId};
use crate::worker::spawn::{WorkerEntry, WorkerEvent};
use crossbeam_channel::{Receiver, Sender, bounded, select, tick, unbounded};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Requests from the pool handle to the supervisor thread.
enum Command {
    Start(Sender<Result<()>>),
    AddJob(Job),
    Stop,
    Stats(Sender<PoolStats>),
    Shutdown,
}

/// A pool of reusable worker processes fed from a FIFO job queue.
///
/// Construction spawns the supervisor thread but no workers; call
/// [`ForkPool::start`] to launch them. Dropping the pool stops it and waits
/// for the supervisor to finish.
///
/// ```no_run
/// use forkq::{ForkPool, PoolConfig, PoolEvent, WorkerEntry};
///
/// let entry = WorkerEntry::current_exe()?.arg("worker");
/// let pool = ForkPool::new(entry, PoolConfig::default())?;
/// for n in 0..10 {
///     pool.add_job(&n)?;
/// }
/// pool.start()?;
/// for event in pool.events() {
///     if let PoolEvent::AllJobsEnded { done_count } = event {
///         println!("{} jobs done", done_count);
///         break;
///     }
/// }
/// # Ok::<(), forkq::PoolError>(())
/// ```
pub struct ForkPool {
    commands: Sender<Command>,
    events: Receiver<PoolEvent>,
    next_job_id: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl ForkPool {
    pub fn new(entry: WorkerEntry, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let (sink, events) = events::channel();
        let (signal_tx, signal_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();

        let tick_every = config.tick_interval();
        let stop_grace = config.stop_grace;
        let core = PoolCore::new(config, ProcessTransport::new(entry, signal_tx), sink);

        let thread = std::thread::Builder::new()
            .name("forkq-supervisor".into())
            .spawn(move || supervise(core, command_rx, signal_rx, tick_every, stop_grace))
            .map_err(|e| PoolError::Worker(format!("Failed to spawn supervisor thread: {}", e)))?;

        Ok(Self {
            commands: command_tx,
            events,
            next_job_id: AtomicU64::new(1),
            thread: Some(thread),
        })
    }

    /// Queue a job, or hand it straight to an idle worker.
    pub fn add_job<T: Serialize + ?Sized>(&self, payload: &T) -> Result<JobId> {
        let payload = serde_json::to_value(payload)?;
        let id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        self.send(Command::AddJob(Job::new(id, payload)))?;
        Ok(id)
    }

    /// Launch workers. Fails with [`PoolError::AlreadyRunning`] if running.
    pub fn start(&self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Command::Start(reply_tx))?;
        reply_rx.recv().map_err(|_| PoolError::SupervisorGone)?
    }

    /// Terminate every worker. In-flight jobs are abandoned; queued jobs stay.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn stats(&self) -> Result<PoolStats> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Command::Stats(reply_tx))?;
        reply_rx.recv().map_err(|_| PoolError::SupervisorGone)
    }

    /// Stream of lifecycle events, in the order they happened.
    pub fn events(&self) -> &Receiver<PoolEvent> {
        &self.events
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PoolError::SupervisorGone)
    }
}

impl Drop for ForkPool {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("Supervisor thread panicked");
        }
    }
}

/// Own the pool state and apply commands, worker signals and watchdog ticks
/// one at a time.
fn supervise(
    mut core: PoolCore<ProcessTransport>,
    commands: Receiver<Command>,
    signals: Receiver<WorkerEvent>,
    tick_every: Duration,
    stop_grace: Duration,
) {
    let ticker = tick(tick_every);

    loop {
        select! {
            recv(commands) -> command => match command {
                Ok(Command::Start(reply)) => {
                    let _ = reply.send(core.start());
                }
                Ok(Command::AddJob(job)) => core.add_job(job),
                Ok(Command::Stop) => core.stop(),
                Ok(Command::Stats(reply)) => {
                    let _ = reply.send(core.stats());
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(signals) -> event => {
                if let Ok(event) = event {
                    core.on_worker_event(event);
                }
            }
            recv(ticker) -> now => {
                if let Ok(now) = now {
                    core.on_tick(now);
                }
            }
        }
    }

    core.stop();

    // Give terminated workers a moment to exit before forcing them
    let deadline = Instant::now() + stop_grace;
    while core.transport_mut().has_processes() {
        match signals.recv_deadline(deadline) {
            Ok(event) => core.on_worker_event(event),
            Err(_) => break,
        }
    }
    if core.transport_mut().has_processes() {
        tracing::debug!("Killing workers still alive after grace period");
    }
    core.transport_mut().kill_all();
    tracing::debug!("Supervisor exited");
}

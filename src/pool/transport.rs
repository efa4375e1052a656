//! The seam between scheduling and real processes.

use crate::error::{PoolError, Result};
use crate::queue::Job;
use crate::waiting::WorkerId;
use crate::worker::proc::Proc;
use crate::worker::protocol::SupervisorMessage;
use crate::worker::spawn::{WorkerEntry, WorkerEvent, spawn_worker};
use crossbeam_channel::Sender;
use std::collections::HashMap;

/// Process operations the pool core needs.
///
/// Signals about a launched worker (messages, then its exit) arrive out of
/// band. The core must call [`Transport::release`] once it has seen the exit.
pub(crate) trait Transport {
    /// Start a worker process under `id`.
    fn launch(&mut self, id: WorkerId) -> Result<()>;
    /// Send a job to a worker.
    fn assign(&mut self, id: WorkerId, job: &Job) -> Result<()>;
    /// Ask a worker to exit on its own.
    fn retire(&mut self, id: WorkerId) -> Result<()>;
    /// Close the worker's stdin and SIGTERM it.
    fn terminate(&mut self, id: WorkerId);
    /// SIGKILL.
    fn kill(&mut self, id: WorkerId);
    /// Forget a worker whose exit has been observed.
    fn release(&mut self, id: WorkerId);
}

/// Transport backed by real subprocesses.
pub(crate) struct ProcessTransport {
    entry: WorkerEntry,
    procs: HashMap<WorkerId, Proc>,
    signals: Sender<WorkerEvent>,
}

impl ProcessTransport {
    pub fn new(entry: WorkerEntry, signals: Sender<WorkerEvent>) -> Self {
        Self {
            entry,
            procs: HashMap::new(),
            signals,
        }
    }

    /// True while any launched process has not been released.
    pub fn has_processes(&self) -> bool {
        !self.procs.is_empty()
    }

    /// SIGKILL and drop every remaining process.
    pub fn kill_all(&mut self) {
        for (id, proc) in self.procs.drain() {
            tracing::debug!(worker_id = %id, pid = proc.pid().as_raw(), "Killing worker");
            let _ = proc.kill();
        }
    }

    fn proc_mut(&mut self, id: WorkerId) -> Result<&mut Proc> {
        self.procs
            .get_mut(&id)
            .ok_or_else(|| PoolError::Worker(format!("No process for worker {}", id)))
    }
}

impl Transport for ProcessTransport {
    fn launch(&mut self, id: WorkerId) -> Result<()> {
        let proc = spawn_worker(&self.entry, id, self.signals.clone())?;
        self.procs.insert(id, proc);
        Ok(())
    }

    fn assign(&mut self, id: WorkerId, job: &Job) -> Result<()> {
        self.proc_mut(id)?.send(&SupervisorMessage::assign(job))
    }

    fn retire(&mut self, id: WorkerId) -> Result<()> {
        let proc = self.proc_mut(id)?;
        let sent = proc.send(&SupervisorMessage::Exit);
        proc.close_stdin();
        sent
    }

    fn terminate(&mut self, id: WorkerId) {
        let Some(proc) = self.procs.get_mut(&id) else {
            return;
        };
        proc.close_stdin();
        if let Err(e) = proc.terminate() {
            tracing::warn!(worker_id = %id, error = %e, "Failed to terminate worker");
        }
    }

    fn kill(&mut self, id: WorkerId) {
        if let Some(proc) = self.procs.get(&id)
            && let Err(e) = proc.kill()
        {
            tracing::warn!(worker_id = %id, error = %e, "Failed to kill worker");
        }
    }

    fn release(&mut self, id: WorkerId) {
        if let Some(mut proc) = self.procs.remove(&id) {
            proc.reap();
        }
    }
}

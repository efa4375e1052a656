//! Supervisor-side handle to a worker subprocess.
//!
//! The handle owns the write end of the worker's stdin and the right to
//! signal it. Reading stdout and waiting for the exit belong to the watcher
//! thread started by [`super::spawn::spawn_worker`]. Where the watcher leaves
//! the exited child as a zombie, [`Proc::reap`] collects it, so the pid
//! cannot be reused while this handle can still signal it.

use super::ipc::LineWriter;
use super::protocol::SupervisorMessage;
use super::spawn::WATCHER_KEEPS_ZOMBIE;
use crate::error::{PoolError, Result};
use crate::waiting::WorkerId;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

/// Handle to a live worker subprocess.
#[derive(Debug)]
pub struct Proc {
    id: WorkerId,
    pid: Pid,
    /// `None` once stdin has been closed.
    writer: Option<LineWriter>,
    /// Set once the exit has been observed and the pid released.
    reaped: bool,
}

impl Proc {
    pub fn new(id: WorkerId, pid: Pid, writer: LineWriter) -> Self {
        Self {
            id,
            pid,
            writer: Some(writer),
            reaped: false,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send a message to the worker's stdin.
    pub fn send(&mut self, message: &SupervisorMessage) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PoolError::Worker(format!("Worker {} stdin is closed", self.id)))?;
        writer
            .write_line(&message.to_line())
            .map_err(|e| PoolError::Worker(format!("Failed to send to worker {}: {}", self.id, e)))
    }

    /// Close stdin. A worker in its request loop sees EOF and exits.
    pub fn close_stdin(&mut self) {
        self.writer = None;
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Send SIGKILL to the process. Reaping is left to the watcher.
    pub fn kill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }

    /// Release the pid once the watcher has reported the exit. The process
    /// is never signalled again.
    pub fn reap(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;
        if WATCHER_KEEPS_ZOMBIE
            && let Err(e) = waitpid(self.pid, None)
        {
            tracing::debug!(worker_id = %self.id, error = %e, "waitpid failed");
        }
    }

    fn signal(&self, sig: Signal) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        match signal::kill(self.pid, sig) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(PoolError::Worker(format!(
                "Failed to send {:?} to worker {} (pid {}): {}",
                sig, self.id, self.pid, e
            ))),
        }
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            self.reap();
        }
    }
}
